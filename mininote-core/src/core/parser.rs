use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Dictionary payload shared by dictionaries and stream objects.
pub type Dict = FxHashMap<String, PDFObject>;

/// Indirect object reference (`num generation R`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    pub num: u32,
    pub generation: u32,
}

impl ObjRef {
    pub fn new(num: u32, generation: u32) -> Self {
        ObjRef { num, generation }
    }
}

impl std::fmt::Display for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

/// A stream object: its dictionary plus the raw (still encoded) bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    pub dict: Dict,
    pub data: Arc<[u8]>,
}

/// PDF object model.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    Null,
    Boolean(bool),
    Number(f64),
    String(Vec<u8>),
    Name(String),
    Array(Vec<PDFObject>),
    Dictionary(Dict),
    Stream(PdfStream),
    Ref(ObjRef),
    /// Bare keyword; only meaningful in content streams and object headers
    Command(String),
    EOF,
}

impl PDFObject {
    pub fn is_eof(&self) -> bool {
        matches!(self, PDFObject::EOF)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, PDFObject::Command(c) if c == cmd)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_number().map(|n| n as f32)
    }

    /// Non-negative integral value, as used for counts, offsets and indices.
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            PDFObject::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PDFObject::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PDFObject]> {
        match self {
            PDFObject::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or of a stream object.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PDFObject::Dictionary(dict) => Some(dict),
            PDFObject::Stream(stream) => Some(&stream.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PDFObject::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjRef> {
        match self {
            PDFObject::Ref(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PDFObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Reads an array of numbers, e.g. a rectangle or a matrix.
    pub fn as_number_array(&self) -> Option<Vec<f64>> {
        self.as_array()?.iter().map(PDFObject::as_number).collect()
    }
}

/// Resolves an indirect `/Length` while a stream is being parsed.
pub type LengthResolver<'a> = dyn Fn(ObjRef) -> Option<usize> + 'a;

/// Builds [`PDFObject`]s from lexer tokens.
///
/// Two tokens of lookahead let the parser recognise `N G R` references and a
/// dictionary followed by the `stream` keyword.
pub struct Parser<'a> {
    lexer: Lexer,
    buf1: Token,
    buf2: Token,
    length_resolver: Option<&'a LengthResolver<'a>>,
}

impl<'a> Parser<'a> {
    pub fn new(mut lexer: Lexer) -> PDFResult<Self> {
        let buf1 = lexer.next_token()?;
        let buf2 = lexer.next_token()?;
        Ok(Parser {
            lexer,
            buf1,
            buf2,
            length_resolver: None,
        })
    }

    /// Installs a resolver used when a stream's `/Length` is an indirect reference.
    pub fn with_length_resolver(mut self, resolver: &'a LengthResolver<'a>) -> Self {
        self.length_resolver = Some(resolver);
        self
    }

    fn shift(&mut self) -> PDFResult<()> {
        self.buf1 = std::mem::replace(&mut self.buf2, Token::EOF);
        self.buf2 = self.lexer.next_token()?;
        Ok(())
    }

    /// Checks if there are more objects to parse.
    pub fn has_more(&self) -> bool {
        self.buf1 != Token::EOF
    }

    /// Parses the next object.
    pub fn get_object(&mut self) -> PDFResult<PDFObject> {
        let pos = self.lexer.position();
        let token = std::mem::replace(&mut self.buf1, Token::EOF);
        self.shift()?;

        match token {
            Token::ArrayStart => self.parse_array(),
            Token::DictStart => self.parse_dictionary(),
            Token::ArrayEnd => Err(PDFError::syntax(pos, "unexpected ']'")),
            Token::DictEnd => Err(PDFError::syntax(pos, "unexpected '>>'")),
            Token::Number(n) => {
                if let (Token::Number(generation), Token::Command(cmd)) = (&self.buf1, &self.buf2)
                {
                    if cmd == "R" && n >= 0.0 && *generation >= 0.0 {
                        let r = ObjRef::new(n as u32, *generation as u32);
                        self.shift()?;
                        self.shift()?;
                        return Ok(PDFObject::Ref(r));
                    }
                }
                Ok(PDFObject::Number(n))
            }
            Token::EOF => Ok(PDFObject::EOF),
            Token::Boolean(b) => Ok(PDFObject::Boolean(b)),
            Token::Null => Ok(PDFObject::Null),
            Token::String(s) => Ok(PDFObject::String(s)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::Command(c) => Ok(PDFObject::Command(c)),
        }
    }

    fn parse_array(&mut self) -> PDFResult<PDFObject> {
        let mut items = Vec::new();
        loop {
            match &self.buf1 {
                Token::ArrayEnd => {
                    self.shift()?;
                    return Ok(PDFObject::Array(items));
                }
                Token::EOF => {
                    return Err(PDFError::syntax(self.lexer.position(), "unterminated array"));
                }
                _ => items.push(self.get_object()?),
            }
        }
    }

    fn parse_dictionary(&mut self) -> PDFResult<PDFObject> {
        let mut dict = Dict::default();

        loop {
            let key = match &self.buf1 {
                Token::DictEnd => break,
                Token::EOF => {
                    return Err(PDFError::syntax(
                        self.lexer.position(),
                        "unterminated dictionary",
                    ));
                }
                Token::Name(name) => name.clone(),
                _ => {
                    // Malformed entry: skip tokens until the next key.
                    log::debug!("skipping non-name dictionary key {:?}", self.buf1);
                    self.shift()?;
                    continue;
                }
            };
            self.shift()?;

            if matches!(self.buf1, Token::DictEnd | Token::EOF) {
                dict.insert(key, PDFObject::Null);
                continue;
            }

            let value = self.get_object()?;
            dict.insert(key, value);
        }

        // buf1 is '>>'. If buf2 is the `stream` keyword, the lexer sits right
        // after it and the raw data follows.
        if matches!(&self.buf2, Token::Command(cmd) if cmd == "stream") {
            return self.parse_stream(dict);
        }

        self.shift()?;
        Ok(PDFObject::Dictionary(dict))
    }

    fn parse_stream(&mut self, dict: Dict) -> PDFResult<PDFObject> {
        // The keyword is followed by CRLF or LF (a lone CR is tolerated).
        {
            let stream = self.lexer.stream_mut();
            while matches!(stream.peek(), Some(b' ') | Some(b'\t')) {
                stream.next_byte();
            }
            match stream.peek() {
                Some(b'\r') => {
                    stream.next_byte();
                    if stream.peek() == Some(b'\n') {
                        stream.next_byte();
                    }
                }
                Some(b'\n') => {
                    stream.next_byte();
                }
                _ => {}
            }
        }

        let data_start = self.lexer.position();
        let declared = match dict.get("Length") {
            Some(PDFObject::Ref(r)) => self.length_resolver.and_then(|resolve| resolve(*r)),
            Some(other) => other.as_usize(),
            None => None,
        };

        let data_end = match declared.filter(|&len| self.length_is_plausible(data_start, len)) {
            Some(len) => data_start + len,
            None => self.scan_for_endstream(data_start)?,
        };

        let data: Arc<[u8]> = Arc::from(self.lexer.stream().slice(data_start, data_end)?);
        self.lexer.set_position(data_end)?;

        // Refill the lookahead; it should now start at `endstream`.
        self.buf1 = self.lexer.next_token()?;
        if matches!(&self.buf1, Token::Command(cmd) if cmd == "endstream") {
            self.buf1 = self.lexer.next_token()?;
        }
        self.buf2 = self.lexer.next_token()?;

        Ok(PDFObject::Stream(PdfStream { dict, data }))
    }

    /// A declared length is trusted only if `endstream` follows it.
    fn length_is_plausible(&self, data_start: usize, length: usize) -> bool {
        let stream = self.lexer.stream();
        let Some(end) = data_start.checked_add(length) else {
            return false;
        };
        if end > stream.end() {
            return false;
        }
        let Ok(after) = stream.slice(end, stream.end()) else {
            return false;
        };
        let trimmed = after
            .iter()
            .position(|&b| !Lexer::is_whitespace(b))
            .map(|skip| &after[skip..])
            .unwrap_or(&[]);
        trimmed.starts_with(b"endstream")
    }

    fn scan_for_endstream(&self, data_start: usize) -> PDFResult<usize> {
        let stream = self.lexer.stream();
        let body = stream.slice(data_start, stream.end())?;
        let offset = super::stream::find_subslice(body, b"endstream").ok_or_else(|| {
            PDFError::syntax(data_start, "stream without endstream")
        })?;
        // Drop the EOL that precedes the keyword.
        let mut end = data_start + offset;
        if end > data_start && body[end - data_start - 1] == b'\n' {
            end -= 1;
        }
        if end > data_start && body[end - data_start - 1] == b'\r' {
            end -= 1;
        }
        log::debug!(
            "stream at {} delimited by endstream scan ({} bytes)",
            data_start,
            end - data_start
        );
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::Stream;

    fn parse(input: &str) -> PDFResult<PDFObject> {
        let mut parser = Parser::new(Lexer::new(Stream::from_bytes(input.as_bytes())))?;
        parser.get_object()
    }

    #[test]
    fn test_parse_simple_values() {
        assert_eq!(parse("42").unwrap(), PDFObject::Number(42.0));
        assert_eq!(parse("true").unwrap(), PDFObject::Boolean(true));
        assert_eq!(parse("null").unwrap(), PDFObject::Null);
        assert_eq!(parse("/Type").unwrap(), PDFObject::Name("Type".into()));
        assert_eq!(parse("<414243>").unwrap(), PDFObject::String(b"ABC".to_vec()));
    }

    #[test]
    fn test_parse_reference_and_plain_numbers() {
        assert_eq!(parse("5 0 R").unwrap(), PDFObject::Ref(ObjRef::new(5, 0)));
        assert_eq!(
            parse("[5 0 R 7 1 2]").unwrap(),
            PDFObject::Array(vec![
                PDFObject::Ref(ObjRef::new(5, 0)),
                PDFObject::Number(7.0),
                PDFObject::Number(1.0),
                PDFObject::Number(2.0),
            ])
        );
    }

    #[test]
    fn test_parse_nested_dictionary() {
        let obj = parse("<< /Type /Page /MediaBox [0 0 612 792] /Res << /A 1 >> >>").unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Type").and_then(PDFObject::as_name), Some("Page"));
        assert_eq!(
            dict.get("MediaBox").and_then(PDFObject::as_number_array),
            Some(vec![0.0, 0.0, 612.0, 792.0])
        );
        let inner = dict.get("Res").and_then(PDFObject::as_dict).unwrap();
        assert_eq!(inner.get("A"), Some(&PDFObject::Number(1.0)));
    }

    #[test]
    fn test_parse_dictionary_key_without_value() {
        let obj = parse("<< /A >>").unwrap();
        assert_eq!(obj.as_dict().unwrap().get("A"), Some(&PDFObject::Null));
    }

    #[test]
    fn test_parse_stream_with_direct_length() {
        let obj = parse("<< /Length 5 >>\nstream\nHELLO\nendstream").unwrap();
        let stream = obj.as_stream().unwrap();
        assert_eq!(&*stream.data, b"HELLO");
    }

    #[test]
    fn test_parse_stream_with_wrong_length_scans() {
        let obj = parse("<< /Length 99 >>\r\nstream\r\nHELLO WORLD\r\nendstream").unwrap();
        assert_eq!(&*obj.as_stream().unwrap().data, b"HELLO WORLD");
    }

    #[test]
    fn test_parse_stream_with_indirect_length() {
        let resolver = |r: ObjRef| if r.num == 9 { Some(3) } else { None };
        let lexer = Lexer::new(Stream::from_bytes(b"<< /Length 9 0 R >>\nstream\nABC\nendstream"));
        let mut parser = Parser::new(lexer).unwrap().with_length_resolver(&resolver);
        let obj = parser.get_object().unwrap();
        assert_eq!(&*obj.as_stream().unwrap().data, b"ABC");
    }

    #[test]
    fn test_object_after_stream_is_readable() {
        let input = "<< /Length 2 >>\nstream\nXY\nendstream\nendobj 7";
        let mut parser = Parser::new(Lexer::new(Stream::from_bytes(input.as_bytes()))).unwrap();
        assert!(parser.get_object().unwrap().as_stream().is_some());
        assert!(parser.get_object().unwrap().is_command("endobj"));
        assert_eq!(parser.get_object().unwrap(), PDFObject::Number(7.0));
    }

    #[test]
    fn test_unterminated_containers_fail() {
        assert!(parse("[1 2 3").is_err());
        assert!(parse("<< /Type /Font").is_err());
    }
}
