use std::fmt::Display;
use std::io;
use std::process::ExitCode;

use schemelet::{Interpreter, Reader};

// Falls back to the plain message when the ariadne report cannot be written.
fn report(printed: io::Result<()>, error: &impl Display) {
    if let Err(e) = printed {
        eprintln!("{}", error);
        eprintln!("(failed to render report: {})", e);
    }
}

// Runs each file argument in order in one interpreter.
fn run_file(interp: &Interpreter, path: &str) -> Result<(), ()> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return Err(());
        }
    };
    tracing::info!(path, "running file");

    let mut reader = Reader::new(source.as_str());
    loop {
        match reader.read_spanned(interp.globals()) {
            Ok(Some((datum, span))) => {
                if let Err(e) = interp.eval(&datum) {
                    report(e.pretty_print(path, &source, span), &e);
                    return Err(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                report(e.pretty_print(path, &source), &e);
                return Err(());
            }
        }
    }
}

fn main() -> ExitCode {
    schemelet::init_tracing();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: schemelet FILE...");
        eprintln!("Start the interactive prompt with `repl`.");
        return ExitCode::from(2);
    }

    let interp = Interpreter::new();
    for path in &paths {
        if run_file(&interp, path).is_err() {
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
