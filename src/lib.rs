// Declare modules publicly so they are part of the library interface
pub mod environment;
pub mod evaluator;
pub mod interpreter;
pub mod lexer;
pub mod ports;
pub mod pretty_print;
pub mod primitives;
pub mod reader;
pub mod source;
pub mod types;

pub use environment::{EnvError, Environment, GlobalTable};
pub use evaluator::{EvalError, EvalResult};
pub use interpreter::Interpreter;
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use reader::{ReadError, Reader};
pub use source::{Position, Span};
pub use types::{Object, Symbol};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber for the binaries. Does nothing unless
/// `RUST_LOG` is set, so normal runs stay quiet.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
