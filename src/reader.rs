use crate::environment::GlobalTable;
use crate::lexer::{LexerError, LexerErrorKind, NumberLiteral, Token, TokenKind};
use crate::source::{Position, Span};
use crate::types::Object;
use logos::Logos;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    #[error("Syntax error at {position}: {message}")]
    Syntax {
        message: String,
        position: Position,
        span: Span,
    },
    #[error("Unsupported data type at {position}: '{found}'")]
    UnsupportedDataType {
        found: String,
        position: Position,
        span: Span,
    },
}

impl ReadError {
    pub fn span(&self) -> Span {
        match self {
            ReadError::Syntax { span, .. } | ReadError::UnsupportedDataType { span, .. } => *span,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            ReadError::Syntax { position, .. }
            | ReadError::UnsupportedDataType { position, .. } => *position,
        }
    }
}

// Result type alias for convenience
type ReadResult<T> = Result<T, ReadError>;

/// Characters that may legally follow an atom.
pub fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';')
}

/// Reads data out of an owned text one external representation at a time,
/// remembering where the previous read stopped.
#[derive(Debug, Clone)]
pub struct Reader {
    source: String,
    offset: usize,
}

impl Reader {
    pub fn new(source: impl Into<String>) -> Self {
        Reader {
            source: source.into(),
            offset: 0,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Where the next read starts.
    pub fn position(&self) -> Position {
        Position::locate(&self.source, self.offset)
    }

    /// Reads exactly one datum and leaves the cursor just after it.
    /// `Ok(None)` means the remaining text holds no token at all.
    pub fn read(&mut self, globals: &GlobalTable) -> ReadResult<Option<Object>> {
        Ok(self.read_spanned(globals)?.map(|(datum, _)| datum))
    }

    /// Like `read`, also returning where the datum's text starts and ends.
    pub fn read_spanned(&mut self, globals: &GlobalTable) -> ReadResult<Option<(Object, Span)>> {
        let mut parser = Parser::new(&self.source, self.offset, globals);
        let result = parser.parse_datum();
        self.offset = parser.consumed;
        let start = parser.first.unwrap_or(parser.consumed);
        Ok(result?.map(|datum| (datum, Span::new(start, parser.consumed))))
    }

    pub fn read_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.offset += c.len_utf8();
        Some(c)
    }

    pub fn peek_char(&self) -> Option<char> {
        self.source[self.offset..].chars().next()
    }
}

struct Parser<'src, 'g> {
    source: &'src str,
    lexer: logos::Lexer<'src, TokenKind>,
    // Byte offset of the lexer's input within `source`.
    base: usize,
    // End of the last token handed out.
    consumed: usize,
    // Start of the first token handed out.
    first: Option<usize>,
    globals: &'g GlobalTable,
}

impl<'src, 'g> Parser<'src, 'g> {
    fn new(source: &'src str, offset: usize, globals: &'g GlobalTable) -> Self {
        Parser {
            source,
            lexer: TokenKind::lexer(&source[offset..]),
            base: offset,
            consumed: offset,
            first: None,
            globals,
        }
    }

    fn syntax_error(&self, message: impl Into<String>, span: Span) -> ReadError {
        ReadError::Syntax {
            message: message.into(),
            position: Position::locate(self.source, span.start),
            span,
        }
    }

    fn eof_error(&self, expected: &str) -> ReadError {
        let end = Span::new(self.source.len(), self.source.len());
        self.syntax_error(format!("unexpected end of input, expected {}", expected), end)
    }

    // No datum starts with the text under `span`.
    fn unsupported(&self, span: Span) -> ReadError {
        ReadError::UnsupportedDataType {
            found: self.source[span.to_range()].to_string(),
            position: Position::locate(self.source, span.start),
            span,
        }
    }

    fn lexer_error(&self, err: LexerError) -> ReadError {
        match err.error {
            LexerErrorKind::InvalidToken => self.unsupported(err.span),
            other => self.syntax_error(other.to_string(), err.span),
        }
    }

    // Consumes the next token if available.
    fn next_token(&mut self) -> ReadResult<Option<Token>> {
        let Some(result) = self.lexer.next() else {
            return Ok(None);
        };
        let range = self.lexer.span();
        let span = Span::new(self.base + range.start, self.base + range.end);
        self.consumed = span.end;
        self.first.get_or_insert(span.start);
        match result {
            Ok(kind) => Ok(Some(Token { kind, span })),
            Err(error) => Err(self.lexer_error(LexerError { error, span })),
        }
    }

    // Atoms and the dot must be immediately followed by a delimiter or EOF.
    fn expect_delimiter(&self, token: &Token) -> ReadResult<()> {
        match self.source[token.span.end..].chars().next() {
            Some(c) if !is_delimiter(c) => Err(self.syntax_error(
                format!("'{}' is not followed by a delimiter", token.kind),
                token.span,
            )),
            _ => Ok(()),
        }
    }

    fn parse_datum(&mut self) -> ReadResult<Option<Object>> {
        match self.next_token()? {
            Some(token) => self.parse_expr_with_token(token).map(Some),
            None => Ok(None),
        }
    }

    fn parse_expr(&mut self, expected: &str) -> ReadResult<Object> {
        match self.next_token()? {
            Some(token) => self.parse_expr_with_token(token),
            None => Err(self.eof_error(expected)),
        }
    }

    /// Parses a single datum starting with `token`.
    fn parse_expr_with_token(&mut self, token: Token) -> ReadResult<Object> {
        match token.kind {
            TokenKind::LParen => self.parse_list(token.span),
            TokenKind::Quote => {
                let quoted = self.parse_expr("a datum after quote")?;
                Ok(Object::list(vec![
                    Object::Symbol(self.globals.intern("quote")),
                    quoted,
                ]))
            }
            TokenKind::RParen | TokenKind::Dot => Err(self.unsupported(token.span)),
            _ => self.parse_atom(token),
        }
    }

    /// Parses an atomic expression (symbol, number, boolean, character, string).
    fn parse_atom(&mut self, token: Token) -> ReadResult<Object> {
        if !matches!(token.kind, TokenKind::String(_)) {
            self.expect_delimiter(&token)?;
        }
        Ok(match token.kind {
            TokenKind::Symbol(name) => {
                // `+5x` lexes as one symbol, but a sign followed by a digit
                // always starts a number.
                let mut chars = name.chars();
                if matches!(chars.next(), Some('+' | '-'))
                    && chars.next().is_some_and(|c| c.is_ascii_digit())
                {
                    return Err(self.syntax_error(
                        format!("invalid number '{}'", name),
                        token.span,
                    ));
                }
                Object::Symbol(self.globals.intern(&name))
            }
            TokenKind::Number(NumberLiteral::Integer(n)) => Object::Integer(n),
            TokenKind::Number(NumberLiteral::Float(n)) => Object::Float(n),
            TokenKind::Boolean(b) => Object::Boolean(b),
            TokenKind::Character(c) => Object::Character(c),
            TokenKind::String(s) => Object::string(&s),
            TokenKind::LParen | TokenKind::RParen | TokenKind::Dot | TokenKind::Quote => {
                return Err(self.syntax_error("expected an atom", token.span));
            }
        })
    }

    /// Parses the rest of a list after its `(`, including a dotted tail.
    fn parse_list(&mut self, open: Span) -> ReadResult<Object> {
        let mut items = Vec::new();
        loop {
            let Some(token) = self.next_token()? else {
                return Err(self.syntax_error("unterminated list", open));
            };
            match token.kind {
                TokenKind::RParen => return Ok(Object::list(items)),
                TokenKind::Dot if !items.is_empty() => {
                    self.expect_delimiter(&token)?;
                    let tail = self.parse_expr("a datum after '.'")?;
                    return match self.next_token()? {
                        Some(Token {
                            kind: TokenKind::RParen,
                            ..
                        }) => Ok(Object::list_with_tail(items, tail)),
                        Some(found) => Err(self.syntax_error(
                            format!("expected ')' after dotted pair, found '{}'", found.kind),
                            found.span,
                        )),
                        None => Err(self.syntax_error("unterminated list", open)),
                    };
                }
                _ => items.push(self.parse_expr_with_token(token)?),
            }
        }
    }
}

/// Reads every datum in `input`.
pub fn read_all(input: &str, globals: &GlobalTable) -> ReadResult<Vec<Object>> {
    let mut reader = Reader::new(input);
    let mut data = Vec::new();
    while let Some(datum) = reader.read(globals)? {
        data.push(datum);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::OutputPort;
    use crate::types::Symbol;
    use std::rc::Rc;

    fn globals() -> GlobalTable {
        GlobalTable::new(Rc::new(OutputPort::string()))
    }

    fn read_one(input: &str, globals: &GlobalTable) -> Object {
        match Reader::new(input).read(globals) {
            Ok(Some(object)) => object,
            Ok(None) => panic!("No datum in input '{}'", input),
            Err(e) => panic!("Reading failed for input '{}': {}", input, e),
        }
    }

    // Helper for asserting a successful read by its printed form
    fn assert_read(input: &str, expected: &str) {
        let object = read_one(input, &globals());
        assert_eq!(object.to_string(), expected, "Input: '{}'", input);
    }

    fn assert_syntax_error(input: &str) {
        match Reader::new(input).read(&globals()) {
            Err(ReadError::Syntax { .. }) => {}
            other => panic!("Expected a syntax error for '{}', got {:?}", input, other),
        }
    }

    #[test]
    fn test_round_trip_atoms() {
        for input in ["42", "12.5", "#t", "#f", "\"foo\"", "#\\c", "foo", "-7", "()"] {
            assert_read(input, input);
        }
    }

    #[test]
    fn test_read_integers() {
        let g = globals();
        assert_eq!(read_one("  12345  ", &g), Object::Integer(12345));
        assert_eq!(read_one("-42", &g), Object::Integer(-42));
        assert!(matches!(read_one("1e2", &g), Object::Integer(100)));
    }

    #[test]
    fn test_read_floats() {
        let g = globals();
        assert!(matches!(read_one("123.5", &g), Object::Float(n) if n == 123.5));
        assert!(matches!(read_one("5e-1", &g), Object::Float(n) if n == 0.5));
        assert!(matches!(read_one("+2.5", &g), Object::Float(n) if n == 2.5));
    }

    #[test]
    fn test_invalid_numbers() {
        assert_syntax_error("123.5.123");
        assert_syntax_error("1e2e3");
        assert_syntax_error("12abc");
        assert_syntax_error("+5x");
    }

    #[test]
    fn test_read_characters_and_strings() {
        assert_read("#\\space", "#\\space");
        assert_read("#\\newline", "#\\newline");
        assert_read("\"a\\nb\"", "\"a\\nb\"");
        assert_syntax_error("#\\");
        assert_syntax_error("#\\ab");
        assert_syntax_error("\"never closed");
    }

    #[test]
    fn test_booleans_need_delimiter() {
        assert_read("(#t #f)", "(#t #f)");
        assert_syntax_error("#true");
    }

    #[test]
    fn test_read_lists() {
        assert_read("(1 2 3)", "(1 2 3)");
        assert_read("( + 10   20 )", "(+ 10 20)");
        assert_read("(a (b c) d)", "(a (b c) d)");
        assert_read("(()())", "(() ())");
        assert_read("(1 . 2)", "(1 . 2)");
        assert_read("(1 2 . 3)", "(1 2 . 3)");
        assert_read("(1 . (2 3))", "(1 2 3)");
        assert_read("(\"x\"\"y\")", "(\"x\" \"y\")");
    }

    #[test]
    fn test_list_errors() {
        assert_syntax_error("(1 2");
        assert_syntax_error("(");
        assert_syntax_error("(1 . 2 3)");
        assert_syntax_error("(1 .2)");
    }

    #[test]
    fn test_close_and_dot_cannot_start_a_datum() {
        for (input, found) in [(")", ")"), (".5", "."), ("(. 2)", "."), ("(1 . )", ")")] {
            match Reader::new(input).read(&globals()) {
                Err(ReadError::UnsupportedDataType { found: actual, .. }) => {
                    assert_eq!(actual, found, "Input: '{}'", input)
                }
                other => panic!("Expected UnsupportedDataType for '{}', got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_quote_sugar() {
        assert_read("'a", "(quote a)");
        assert_read("'(1 2)", "(quote (1 2))");
        assert_read("(list 'a 'b)", "(list (quote a) (quote b))");
        assert_syntax_error("'");
    }

    #[test]
    fn test_interning() {
        let g = globals();
        let a = read_one("foo", &g);
        let b = read_one("foo", &g);
        let c = read_one("bar", &g);
        assert!(a.is_eq(&b));
        assert!(!a.is_eq(&c));
        let quote = read_one("'x", &g).to_vec().unwrap();
        assert_eq!(quote[0].as_symbol(), Some(&g.intern("quote")));
        assert_ne!(quote[0].as_symbol(), Some(&Symbol::new("quote")));
    }

    #[test]
    fn test_comments_and_end_of_input() {
        let g = globals();
        let mut reader = Reader::new("; leading\n 1 ; one\n (2) ; two\n");
        assert_eq!(reader.read(&g), Ok(Some(Object::Integer(1))));
        assert_eq!(reader.read(&g).unwrap().unwrap().to_string(), "(2)");
        assert_eq!(reader.read(&g), Ok(None));
        assert_eq!(Reader::new("   ").read(&g), Ok(None));
    }

    #[test]
    fn test_reader_stops_just_after_datum() {
        let g = globals();
        let mut reader = Reader::new("(a)b");
        assert!(reader.read(&g).is_ok());
        assert_eq!(reader.peek_char(), Some('b'));
    }

    #[test]
    fn test_read_spanned() {
        let g = globals();
        let mut reader = Reader::new("  42 ; note\n (a b)");
        let (first, span) = reader.read_spanned(&g).unwrap().unwrap();
        assert_eq!(first, Object::Integer(42));
        assert_eq!(span, Span::new(2, 4));
        let (_, span) = reader.read_spanned(&g).unwrap().unwrap();
        assert_eq!(&reader.source()[span.to_range()], "(a b)");
        assert_eq!(reader.read_spanned(&g), Ok(None));
    }

    #[test]
    fn test_unsupported_data_type() {
        match Reader::new("  [1]").read(&globals()) {
            Err(ReadError::UnsupportedDataType { found, position, .. }) => {
                assert_eq!(found, "[");
                assert_eq!(position, Position { line: 1, column: 3 });
            }
            other => panic!("Expected UnsupportedDataType, got {:?}", other),
        }
    }

    #[test]
    fn test_error_positions() {
        let err = Reader::new("(define x\n  12.5.1)")
            .read(&globals())
            .unwrap_err();
        assert_eq!(err.position(), Position { line: 2, column: 3 });
    }

    #[test]
    fn test_read_all() {
        let data = read_all("(define x 1) x 'y", &globals()).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[2].to_string(), "(quote y)");
    }
}
