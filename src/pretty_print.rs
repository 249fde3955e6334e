use crate::environment::EnvError;
use crate::evaluator::EvalError;
use crate::reader::ReadError;
use crate::source::Span;
use ariadne::{Label, Report, ReportKind, Source};
use std::io::{self, Write};
use std::ops::Range;

type SourceSpan<'a> = (&'a str, Range<usize>);

fn build_report<'a>(
    name: &'a str,
    span: Span,
    message: String,
    label: String,
) -> Report<'a, SourceSpan<'a>> {
    Report::build(ReportKind::Error, (name, span.to_range()))
        .with_message(message)
        .with_label(Label::new((name, span.to_range())).with_message(label))
        .finish()
}

impl ReadError {
    fn report<'a>(&self, name: &'a str) -> Report<'a, SourceSpan<'a>> {
        match self {
            ReadError::Syntax { message, span, .. } => {
                build_report(name, *span, "Syntax error".to_string(), message.clone())
            }
            ReadError::UnsupportedDataType { found, span, .. } => build_report(
                name,
                *span,
                format!("Unsupported data type '{}'", found),
                "no datum starts with this character".to_string(),
            ),
        }
    }

    /// Renders the error against `input`, the text it was read from.
    pub fn write_report<W: Write>(&self, name: &str, input: &str, out: W) -> io::Result<()> {
        self.report(name).write((name, Source::from(input)), out)
    }

    pub fn pretty_print(&self, name: &str, input: &str) -> io::Result<()> {
        self.report(name).eprint((name, Source::from(input)))
    }
}

impl EvalError {
    // `datum` covers the top-level expression whose evaluation failed.
    fn report<'a>(&self, name: &'a str, datum: Span) -> Report<'a, SourceSpan<'a>> {
        match self {
            EvalError::Read(read_error) => read_error.report(name),
            EvalError::Env(EnvError::UnboundedVariable(symbol)) => build_report(
                name,
                datum,
                format!("Unbound variable `{}`", symbol),
                format!("`{}` is not defined in the current scope", symbol),
            ),
            EvalError::Env(EnvError::SymbolNotDefined(symbol)) => build_report(
                name,
                datum,
                format!("Cannot set! undefined variable `{}`", symbol),
                "define the variable before assigning to it".to_string(),
            ),
            EvalError::Syntax(message) => {
                build_report(name, datum, "Syntax error".to_string(), message.clone())
            }
            EvalError::WrongNumberArguments {
                name: callee,
                expected,
                got,
            } => build_report(
                name,
                datum,
                format!("Wrong number of arguments to '{}'", callee),
                format!("expected {}, got {}", expected, got),
            ),
            EvalError::WrongTypeArgument { procedure, value } => build_report(
                name,
                datum,
                format!("Wrong type argument to '{}'", procedure),
                format!("cannot use {} here", value),
            ),
            EvalError::Runtime(message) => {
                build_report(name, datum, "Runtime error".to_string(), message.clone())
            }
            EvalError::Internal(message) => {
                build_report(name, datum, "Internal error".to_string(), message.clone())
            }
        }
    }

    pub fn write_report<W: Write>(
        &self,
        name: &str,
        input: &str,
        datum: Span,
        out: W,
    ) -> io::Result<()> {
        self.report(name, datum)
            .write((name, Source::from(input)), out)
    }

    pub fn pretty_print(&self, name: &str, input: &str, datum: Span) -> io::Result<()> {
        self.report(name, datum).eprint((name, Source::from(input)))
    }
}
