use super::error::{PDFError, PDFResult};
use super::stream::Stream;

/// PDF token types returned by the [`Lexer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of input
    EOF,

    Boolean(bool),

    Null,

    /// Numeric value (integers and reals share a representation)
    Number(f64),

    /// Literal `(...)` or hexadecimal `<...>` string, already unescaped
    String(Vec<u8>),

    /// `/Name`, with `#xx` escapes resolved
    Name(String),

    /// Bare keyword or content stream operator (`obj`, `R`, `re`, `BT`, ...)
    Command(String),

    ArrayStart,

    ArrayEnd,

    DictStart,

    DictEnd,
}

/// Longest keyword we accept before treating the input as garbage.
const MAX_COMMAND_LENGTH: usize = 128;

/// Tokenizer for PDF syntax.
///
/// The lexer never reads ahead: after a token is returned, the stream is
/// positioned on the first byte following it. The parser relies on this to
/// locate the first byte of stream data after the `stream` keyword, and the
/// content stream reader relies on it for inline image data.
pub struct Lexer {
    stream: Stream,
}

impl Lexer {
    pub fn new(stream: Stream) -> Self {
        Lexer { stream }
    }

    /// PDF whitespace: NUL, TAB, LF, FF, CR, SPACE
    pub fn is_whitespace(ch: u8) -> bool {
        matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
    }

    /// PDF delimiters: ( ) < > [ ] { } / %
    pub fn is_delimiter(ch: u8) -> bool {
        matches!(
            ch,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
    }

    fn is_regular(ch: u8) -> bool {
        !Self::is_whitespace(ch) && !Self::is_delimiter(ch)
    }

    pub fn position(&self) -> usize {
        self.stream.pos()
    }

    pub fn set_position(&mut self, pos: usize) -> PDFResult<()> {
        self.stream.set_pos(pos)
    }

    /// Gives raw access to the underlying bytes (stream data, inline images).
    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.stream.peek() {
            if ch == b'%' {
                while let Some(c) = self.stream.next_byte() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                }
            } else if Self::is_whitespace(ch) {
                self.stream.next_byte();
            } else {
                break;
            }
        }
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> PDFResult<Token> {
        self.skip_whitespace_and_comments();

        let Some(ch) = self.stream.peek() else {
            return Ok(Token::EOF);
        };

        match ch {
            b'0'..=b'9' | b'+' | b'-' | b'.' => self.read_number(),
            b'(' => self.read_literal_string(),
            b'/' => self.read_name(),
            b'[' => {
                self.stream.next_byte();
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.stream.next_byte();
                Ok(Token::ArrayEnd)
            }
            b'<' => {
                self.stream.next_byte();
                if self.stream.peek() == Some(b'<') {
                    self.stream.next_byte();
                    Ok(Token::DictStart)
                } else {
                    self.read_hex_string()
                }
            }
            b'>' => {
                let pos = self.stream.pos();
                self.stream.next_byte();
                if self.stream.peek() == Some(b'>') {
                    self.stream.next_byte();
                    Ok(Token::DictEnd)
                } else {
                    Err(PDFError::syntax(pos, "stray '>'"))
                }
            }
            b'{' | b'}' => {
                self.stream.next_byte();
                Ok(Token::Command((ch as char).to_string()))
            }
            b')' => {
                let pos = self.stream.pos();
                self.stream.next_byte();
                Err(PDFError::syntax(pos, "unbalanced ')'"))
            }
            _ => self.read_command(),
        }
    }

    /// Numbers are signed decimals without exponent. Malformed runs such as
    /// `--5` or `1-2` are accepted the way common viewers accept them: a
    /// doubled sign is ignored and stray minus signs inside the digits are
    /// dropped.
    fn read_number(&mut self) -> PDFResult<Token> {
        let start = self.stream.pos();
        let mut negative = false;
        let mut text = String::new();
        let mut seen_dot = false;
        let mut seen_digit = false;

        match self.stream.peek() {
            Some(b'-') => {
                negative = true;
                self.stream.next_byte();
                if self.stream.peek() == Some(b'-') {
                    self.stream.next_byte();
                }
            }
            Some(b'+') => {
                self.stream.next_byte();
            }
            _ => {}
        }

        while let Some(ch) = self.stream.peek() {
            match ch {
                b'0'..=b'9' => {
                    seen_digit = true;
                    text.push(ch as char);
                }
                b'.' if !seen_dot => {
                    seen_dot = true;
                    text.push('.');
                }
                b'-' if seen_digit => {}
                _ => break,
            }
            self.stream.next_byte();
        }

        if !seen_digit {
            // A lone sign or dot followed by a separator reads as zero.
            return match self.stream.peek() {
                None => Ok(Token::Number(0.0)),
                Some(ch) if !Self::is_regular(ch) => Ok(Token::Number(0.0)),
                Some(_) => Err(PDFError::syntax(start, "invalid number")),
            };
        }

        let value: f64 = text
            .parse()
            .map_err(|_| PDFError::syntax(start, format!("invalid number '{}'", text)))?;
        Ok(Token::Number(if negative { -value } else { value }))
    }

    fn read_literal_string(&mut self) -> PDFResult<Token> {
        self.stream.next_byte(); // '('
        let mut depth = 1usize;
        let mut buf = Vec::new();

        while let Some(ch) = self.stream.next_byte() {
            match ch {
                b'(' => {
                    depth += 1;
                    buf.push(ch);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    buf.push(ch);
                }
                b'\\' => {
                    let Some(esc) = self.stream.next_byte() else {
                        break;
                    };
                    match esc {
                        b'n' => buf.push(b'\n'),
                        b'r' => buf.push(b'\r'),
                        b't' => buf.push(b'\t'),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0C),
                        b'0'..=b'7' => {
                            let mut value = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.stream.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.stream.next_byte();
                                    }
                                    _ => break,
                                }
                            }
                            buf.push((value & 0xFF) as u8);
                        }
                        // Escaped end-of-line is a line continuation.
                        b'\r' => {
                            if self.stream.peek() == Some(b'\n') {
                                self.stream.next_byte();
                            }
                        }
                        b'\n' => {}
                        other => buf.push(other),
                    }
                }
                _ => buf.push(ch),
            }
        }

        Ok(Token::String(buf))
    }

    fn hex_value(ch: u8) -> Option<u8> {
        match ch {
            b'0'..=b'9' => Some(ch - b'0'),
            b'a'..=b'f' => Some(ch - b'a' + 10),
            b'A'..=b'F' => Some(ch - b'A' + 10),
            _ => None,
        }
    }

    fn read_hex_string(&mut self) -> PDFResult<Token> {
        let mut buf = Vec::new();
        let mut high: Option<u8> = None;

        while let Some(ch) = self.stream.next_byte() {
            if ch == b'>' {
                break;
            }
            let Some(nibble) = Self::hex_value(ch) else {
                // whitespace and junk are skipped
                continue;
            };
            match high.take() {
                Some(h) => buf.push((h << 4) | nibble),
                None => high = Some(nibble),
            }
        }

        // Odd digit count: the final digit is followed by an implied 0.
        if let Some(h) = high {
            buf.push(h << 4);
        }

        Ok(Token::String(buf))
    }

    fn read_name(&mut self) -> PDFResult<Token> {
        self.stream.next_byte(); // '/'
        let mut buf = Vec::new();

        while let Some(ch) = self.stream.peek() {
            if !Self::is_regular(ch) {
                break;
            }
            self.stream.next_byte();
            if ch == b'#' {
                let high = self.stream.peek().and_then(Self::hex_value);
                let low = self.stream.peek_at(1).and_then(Self::hex_value);
                if let (Some(h), Some(l)) = (high, low) {
                    self.stream.next_byte();
                    self.stream.next_byte();
                    buf.push((h << 4) | l);
                    continue;
                }
            }
            buf.push(ch);
        }

        Ok(Token::Name(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn read_command(&mut self) -> PDFResult<Token> {
        let start = self.stream.pos();
        let mut word = String::new();

        while let Some(ch) = self.stream.peek() {
            if !Self::is_regular(ch) {
                break;
            }
            if word.len() >= MAX_COMMAND_LENGTH {
                return Err(PDFError::syntax(start, "keyword too long"));
            }
            word.push(ch as char);
            self.stream.next_byte();
        }

        Ok(match word.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            _ => Token::Command(word),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &[u8]) -> Vec<Token> {
        let mut lexer = Lexer::new(Stream::from_bytes(input));
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token == Token::EOF {
                break;
            }
            out.push(token);
        }
        out
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens(b"42 -3.5 +.25 4. --7"),
            vec![
                Token::Number(42.0),
                Token::Number(-3.5),
                Token::Number(0.25),
                Token::Number(4.0),
                Token::Number(-7.0),
            ]
        );
    }

    #[test]
    fn test_lone_sign_reads_as_zero() {
        assert_eq!(tokens(b"- "), vec![Token::Number(0.0)]);
    }

    #[test]
    fn test_literal_string_escapes_and_nesting() {
        assert_eq!(
            tokens(b"(a(b)c\\n\\051\\\nd)"),
            vec![Token::String(b"a(b)c\n)d".to_vec())]
        );
    }

    #[test]
    fn test_hex_string_with_odd_digits() {
        assert_eq!(
            tokens(b"<48 65 6c6c 6f7>"),
            vec![Token::String(b"Hello\x70".to_vec())]
        );
    }

    #[test]
    fn test_name_hex_escape() {
        assert_eq!(
            tokens(b"/A#20B /Type"),
            vec![Token::Name("A B".to_string()), Token::Name("Type".to_string())]
        );
    }

    #[test]
    fn test_structure_tokens_and_comments() {
        assert_eq!(
            tokens(b"<< /K [ 1 ] >> % comment\nnull true obj"),
            vec![
                Token::DictStart,
                Token::Name("K".to_string()),
                Token::ArrayStart,
                Token::Number(1.0),
                Token::ArrayEnd,
                Token::DictEnd,
                Token::Null,
                Token::Boolean(true),
                Token::Command("obj".to_string()),
            ]
        );
    }

    #[test]
    fn test_position_follows_token_exactly() {
        let mut lexer = Lexer::new(Stream::from_bytes(b"stream\r\nDATA"));
        assert_eq!(lexer.next_token().unwrap(), Token::Command("stream".into()));
        assert_eq!(lexer.position(), 6);
    }

    #[test]
    fn test_unbalanced_close_paren_is_error() {
        let mut lexer = Lexer::new(Stream::from_bytes(b")"));
        assert!(lexer.next_token().is_err());
    }
}
