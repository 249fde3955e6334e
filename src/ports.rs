use crate::environment::GlobalTable;
use crate::reader::{ReadError, Reader};
use crate::types::Object;
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// A source of characters and data. The whole text is held in memory and
/// consumed through a `Reader`.
pub struct InputPort {
    name: String,
    reader: RefCell<Reader>,
    open: Cell<bool>,
}

impl InputPort {
    pub fn from_string(name: &str, text: impl Into<String>) -> Self {
        InputPort {
            name: name.to_string(),
            reader: RefCell::new(Reader::new(text)),
            open: Cell::new(true),
        }
    }

    pub fn open_file(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), bytes = text.len(), "opened input port");
        Ok(InputPort::from_string(&path.display().to_string(), text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    pub fn close(&self) {
        tracing::debug!(port = %self.name, "closed input port");
        self.open.set(false);
    }

    /// Reads the next datum; `None` at end of input.
    pub fn read(&self, globals: &GlobalTable) -> Result<Option<Object>, ReadError> {
        self.reader.borrow_mut().read(globals)
    }

    pub fn read_char(&self) -> Option<char> {
        self.reader.borrow_mut().read_char()
    }

    pub fn peek_char(&self) -> Option<char> {
        self.reader.borrow().peek_char()
    }
}

enum Sink {
    Stdout,
    File(BufWriter<File>),
    Buffer(String),
}

/// A destination for `display`/`write` output: the console, a file, or an
/// in-memory string.
pub struct OutputPort {
    name: String,
    sink: RefCell<Sink>,
    open: Cell<bool>,
}

impl OutputPort {
    fn with_sink(name: &str, sink: Sink) -> Self {
        OutputPort {
            name: name.to_string(),
            sink: RefCell::new(sink),
            open: Cell::new(true),
        }
    }

    pub fn stdout() -> Self {
        OutputPort::with_sink("stdout", Sink::Stdout)
    }

    pub fn string() -> Self {
        OutputPort::with_sink("string", Sink::Buffer(String::new()))
    }

    pub fn create_file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "opened output port");
        Ok(OutputPort::with_sink(
            &path.display().to_string(),
            Sink::File(BufWriter::new(file)),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    pub fn write_str(&self, text: &str) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::other(format!("port {} is closed", self.name)));
        }
        match &mut *self.sink.borrow_mut() {
            Sink::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()
            }
            Sink::File(writer) => writer.write_all(text.as_bytes()),
            Sink::Buffer(buffer) => {
                buffer.push_str(text);
                Ok(())
            }
        }
    }

    /// Everything written so far, for string ports only.
    pub fn contents(&self) -> Option<String> {
        match &*self.sink.borrow() {
            Sink::Buffer(buffer) => Some(buffer.clone()),
            Sink::Stdout | Sink::File(_) => None,
        }
    }

    /// Flushes and closes the port. Closing twice is harmless.
    pub fn close(&self) -> io::Result<()> {
        if !self.open.replace(false) {
            return Ok(());
        }
        tracing::debug!(port = %self.name, "closed output port");
        match &mut *self.sink.borrow_mut() {
            Sink::File(writer) => writer.flush(),
            Sink::Stdout => io::stdout().flush(),
            Sink::Buffer(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_string_output_port() {
        let port = OutputPort::string();
        port.write_str("hello ").unwrap();
        port.write_str("world").unwrap();
        assert_eq!(port.contents(), Some("hello world".to_string()));
    }

    #[test]
    fn test_write_after_close_fails() {
        let port = OutputPort::string();
        port.close().unwrap();
        assert!(port.write_str("x").is_err());
        assert!(port.close().is_ok());
    }

    #[test]
    fn test_input_port_chars_and_data() {
        let globals = GlobalTable::new(Rc::new(OutputPort::string()));
        let port = InputPort::from_string("test", "ab (1 2)");
        assert_eq!(port.peek_char(), Some('a'));
        assert_eq!(port.read_char(), Some('a'));
        assert_eq!(port.read_char(), Some('b'));
        let datum = port.read(&globals).unwrap().unwrap();
        assert_eq!(datum.to_string(), "(1 2)");
        assert_eq!(port.read(&globals), Ok(None));
        assert_eq!(port.read_char(), None);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("schemelet-port-{}.scm", std::process::id()));
        let out = OutputPort::create_file(&path).unwrap();
        out.write_str("(define x 1)").unwrap();
        out.close().unwrap();

        let input = InputPort::open_file(&path).unwrap();
        assert_eq!(input.read_char(), Some('('));
        std::fs::remove_file(&path).unwrap();
    }
}
