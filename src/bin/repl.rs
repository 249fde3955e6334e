use std::borrow::Cow;
use std::fmt::Display;
use std::io;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{EditMode, Helper, Highlighter, Hinter, Validator};
use schemelet::{GlobalTable, Interpreter, Object, Reader, TokenKind, tokenize};

const HISTORY_FILE: &str = "schemelet_history.txt";
const EDIT_MODE_VAR: &str = "SCHEMELET_EDIT_MODE";

struct SchemeletCompleter {
    globals: Rc<GlobalTable>,
}

impl SchemeletCompleter {
    fn new(globals: Rc<GlobalTable>) -> Self {
        SchemeletCompleter { globals }
    }
}

impl rustyline::completion::Completer for SchemeletCompleter {
    type Candidate = String;
    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let prefix = match tokenize(&line[..pos]) {
            Ok(tokens) => match tokens.last() {
                Some(token) if token.span.end == pos => match &token.kind {
                    TokenKind::Symbol(prefix) => prefix.clone(),
                    _ => return Ok((pos, vec![])),
                },
                _ => return Ok((pos, vec![])),
            },
            Err(_) => return Ok((pos, vec![])),
        };

        let mut candidates: Vec<String> = self
            .globals
            .identifiers()
            .into_iter()
            .filter_map(|id| id.strip_prefix(prefix.as_str()).map(str::to_string))
            .filter(|rest| !rest.is_empty())
            .collect();
        candidates.sort();
        Ok((pos, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputValidator {
    #[rustyline(Validator)]
    validator: SchemeletValidator,
    #[rustyline(Highlighter)]
    highlighter: SchemeletHighlighter,
    #[rustyline(Completer)]
    completer: SchemeletCompleter,
}

/// What a character means for bracket matching, given everything before it.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Lexeme {
    Open,
    Close,
    StringPart,
    Comment,
    Other,
}

// Walks `input` tracking strings, comments and `#\x` character literals,
// so only structural parentheses count as brackets. The flag is set when
// the input ends inside a string.
fn classify(input: &str) -> (Vec<(usize, char, Lexeme)>, bool) {
    let mut result = Vec::new();
    let mut in_string = false;
    let mut in_comment = false;
    let mut escape = false;
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let lexeme = if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            Lexeme::Comment
        } else if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            Lexeme::StringPart
        } else {
            match c {
                '"' => {
                    in_string = true;
                    Lexeme::StringPart
                }
                ';' => {
                    in_comment = true;
                    Lexeme::Comment
                }
                '#' if chars.peek().is_some_and(|&(_, next)| next == '\\') => {
                    // `#\(` is a character, not a bracket.
                    result.push((i, c, Lexeme::Other));
                    if let Some((j, backslash)) = chars.next() {
                        result.push((j, backslash, Lexeme::Other));
                    }
                    if let Some((k, literal)) = chars.next() {
                        result.push((k, literal, Lexeme::Other));
                    }
                    continue;
                }
                '(' => Lexeme::Open,
                ')' => Lexeme::Close,
                _ => Lexeme::Other,
            }
        };
        result.push((i, c, lexeme));
    }
    (result, in_string)
}

struct SchemeletValidator;

impl Validator for SchemeletValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let (lexemes, in_string) = classify(ctx.input());
        let mut depth = 0usize;

        for (i, c, lexeme) in lexemes {
            match lexeme {
                Lexeme::Open => depth += 1,
                Lexeme::Close if depth == 0 => {
                    return Ok(ValidationResult::Invalid(Some(format!(
                        "  - Unmatched '{}' at position {}",
                        c, i
                    ))));
                }
                Lexeme::Close => depth -= 1,
                _ => {}
            }
        }

        if in_string || depth > 0 {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

struct SchemeletHighlighter;

impl Highlighter for SchemeletHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        let mut stack: Vec<(usize, usize)> = Vec::new();
        let mut highlighted = String::new();

        let (lexemes, _) = classify(line);
        for (i, c, lexeme) in lexemes {
            match lexeme {
                Lexeme::StringPart => {
                    highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c)); // Green for strings
                }
                Lexeme::Comment => {
                    highlighted.push_str(&format!("\x1b[90m{}\x1b[0m", c)); // Grey for comments
                }
                Lexeme::Open => {
                    stack.push((i, highlighted.len()));
                    highlighted.push(c);
                }
                Lexeme::Close => match stack.pop() {
                    Some((open_index, matching_pos)) if open_index + 1 == pos || i + 1 == pos => {
                        highlighted.push_str(&format!("\x1b[34m{}\x1b[0m", c)); // Blue for matching brackets
                        highlighted.replace_range(
                            matching_pos..=matching_pos,
                            "\x1b[1;34m(\x1b[0m",
                        );
                    }
                    Some(_) => highlighted.push(c),
                    None => {
                        highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c)); // Red for unmatched closing brackets
                    }
                },
                Lexeme::Other => highlighted.push(c),
            }
        }

        Cow::Owned(highlighted)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn edit_mode() -> EditMode {
    match std::env::var(EDIT_MODE_VAR) {
        Ok(mode) if mode.eq_ignore_ascii_case("vi") => EditMode::Vi,
        _ => EditMode::Emacs,
    }
}

// Falls back to the plain message when the ariadne report cannot be written.
fn report(printed: io::Result<()>, error: &impl Display) {
    if let Err(e) = printed {
        eprintln!("{}", error);
        eprintln!("(failed to render report: {})", e);
    }
}

// Evaluates every datum on the line, stopping at the first error.
fn evaluate_line(interp: &Interpreter, line: &str) {
    let mut reader = Reader::new(line);
    loop {
        match reader.read_spanned(interp.globals()) {
            Ok(Some((datum, span))) => match interp.eval(&datum) {
                Ok(Object::Undefined) => {}
                Ok(value) => println!("{}", value),
                Err(e) => {
                    report(e.pretty_print("REPL", line, span), &e);
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                report(e.pretty_print("REPL", line), &e);
                return;
            }
        }
    }
}

fn main() -> rustyline::Result<()> {
    schemelet::init_tracing();
    println!("Schemelet REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let interp = Interpreter::new();
    let h = InputValidator {
        highlighter: SchemeletHighlighter,
        validator: SchemeletValidator,
        completer: SchemeletCompleter::new(Rc::clone(interp.environment().globals())),
    };
    let config = rustyline::config::Config::builder()
        .edit_mode(edit_mode())
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(h));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(HISTORY_FILE).is_err() {
        println!("No previous history.");
    }

    loop {
        let readline = rl.readline("schemelet> ");
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let trimmed_input = line.trim();
                if trimmed_input.is_empty() {
                    continue;
                }
                if trimmed_input.eq_ignore_ascii_case("exit") {
                    break;
                }
                evaluate_line(&interp, &line);
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(HISTORY_FILE)
}
