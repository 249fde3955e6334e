use crate::environment::{Environment, GlobalTable};
use crate::evaluator::{self, EvalResult};
use crate::ports::OutputPort;
use crate::primitives;
use crate::reader::{ReadError, Reader};
use crate::types::{Object, Symbol};
use std::path::Path;
use std::rc::Rc;

/// One independent interpreter: its own symbol table, globals and
/// top-level environment. Several may live side by side.
pub struct Interpreter {
    env: Environment,
}

impl Interpreter {
    /// An interpreter whose default output port is stdout.
    pub fn new() -> Self {
        Interpreter::with_output(Rc::new(OutputPort::stdout()))
    }

    /// An interpreter writing `display`/`write` output to `output` unless a
    /// port is passed explicitly.
    pub fn with_output(output: Rc<OutputPort>) -> Self {
        let globals = Rc::new(GlobalTable::new(output));
        evaluator::install_special_forms(&globals);
        primitives::install(&globals);
        tracing::debug!(
            globals = globals.identifiers().len(),
            "interpreter bootstrapped"
        );
        Interpreter {
            env: Environment::new_global(globals),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn globals(&self) -> &GlobalTable {
        self.env.globals()
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.env.intern(name)
    }

    /// Reads the next datum from `reader`, interning symbols in this
    /// interpreter's table.
    pub fn read(&self, reader: &mut Reader) -> Result<Option<Object>, ReadError> {
        reader.read(self.globals())
    }

    /// Evaluates one datum in the top-level environment.
    pub fn eval(&self, expr: &Object) -> EvalResult {
        evaluator::evaluate(expr, &self.env)
    }

    /// Reads and evaluates every datum in `input` in turn. Returns the last
    /// value, or Undefined when there was nothing to evaluate.
    pub fn eval_str(&self, input: &str) -> EvalResult {
        evaluator::evaluate_reader(&mut Reader::new(input), &self.env)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> EvalResult {
        evaluator::evaluate_file(path.as_ref(), &self.env)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}
