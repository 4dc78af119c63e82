//! Content stream parsing.
//!
//! Turns the decoded bytes of a content stream into a sequence of
//! [`Operation`]s: an operator plus the operands that preceded it. Inline
//! images (`BI ... ID <data> EI`) are folded into a single operation carrying
//! the image dictionary and its raw bytes.

use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use super::parser::{Dict, PDFObject};
use super::stream::Stream;
use smallvec::SmallVec;
use std::fmt;

/// Nesting limit for arrays and dictionaries used as operands.
const MAX_OPERAND_DEPTH: usize = 32;

/// Operand lists beyond this length are truncated from the front.
const MAX_OPERANDS: usize = 64;

/// PDF content stream operator codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // Graphics state
    /// w - Set line width
    SetLineWidth,
    /// J - Set line cap style
    SetLineCap,
    /// j - Set line join style
    SetLineJoin,
    /// M - Set miter limit
    SetMiterLimit,
    /// d - Set line dash pattern
    SetDash,
    /// ri - Set rendering intent
    SetRenderingIntent,
    /// i - Set flatness tolerance
    SetFlatness,
    /// gs - Set graphics state from dictionary
    SetGState,
    /// q - Save graphics state
    Save,
    /// Q - Restore graphics state
    Restore,
    /// cm - Concatenate matrix to current transformation matrix
    Transform,

    // Path construction
    /// m - Begin new subpath
    MoveTo,
    /// l - Append straight line segment
    LineTo,
    /// c - Append cubic Bézier curve
    CurveTo,
    /// v - Append cubic Bézier curve (initial point replicated)
    CurveTo2,
    /// y - Append cubic Bézier curve (final point replicated)
    CurveTo3,
    /// h - Close subpath
    ClosePath,
    /// re - Append rectangle
    Rectangle,

    // Path painting
    /// S - Stroke path
    Stroke,
    /// s - Close and stroke path
    CloseStroke,
    /// f or F - Fill path (nonzero winding rule)
    Fill,
    /// f* - Fill path (even-odd rule)
    EOFill,
    /// B - Fill and stroke path (nonzero winding rule)
    FillStroke,
    /// B* - Fill and stroke path (even-odd rule)
    EOFillStroke,
    /// b - Close, fill, and stroke path (nonzero winding rule)
    CloseFillStroke,
    /// b* - Close, fill, and stroke path (even-odd rule)
    CloseEOFillStroke,
    /// n - End path without filling or stroking
    EndPath,

    // Clipping
    /// W - Set clipping path (nonzero winding rule)
    Clip,
    /// W* - Set clipping path (even-odd rule)
    EOClip,

    // Text. Recognised so they can be skipped cleanly; glyphs are not drawn.
    BeginText,
    EndText,
    SetCharSpacing,
    SetWordSpacing,
    SetHScale,
    SetLeading,
    SetFont,
    SetTextRenderingMode,
    SetTextRise,
    MoveText,
    SetLeadingMoveText,
    SetTextMatrix,
    NextLine,
    ShowText,
    ShowSpacedText,
    NextLineShowText,
    NextLineSetSpacingShowText,
    SetCharWidth,
    SetCharWidthAndBounds,

    // Colour
    /// CS - Set stroke color space
    SetStrokeColorSpace,
    /// cs - Set fill color space
    SetFillColorSpace,
    /// SC - Set stroke color
    SetStrokeColor,
    /// SCN - Set stroke color (Pattern, Separation, DeviceN)
    SetStrokeColorN,
    /// sc - Set fill color
    SetFillColor,
    /// scn - Set fill color (Pattern, Separation, DeviceN)
    SetFillColorN,
    /// G - Set stroke gray level
    SetStrokeGray,
    /// g - Set fill gray level
    SetFillGray,
    /// RG - Set stroke RGB color
    SetStrokeRGBColor,
    /// rg - Set fill RGB color
    SetFillRGBColor,
    /// K - Set stroke CMYK color
    SetStrokeCMYKColor,
    /// k - Set fill CMYK color
    SetFillCMYKColor,

    /// sh - Paint with shading pattern
    ShadingFill,

    /// BI ... ID ... EI, folded: args are `[image dict, image data]`
    PaintInlineImage,

    /// Do - Paint XObject
    PaintXObject,

    // Marked content
    MarkPoint,
    MarkPointProps,
    BeginMarkedContent,
    BeginMarkedContentProps,
    EndMarkedContent,

    // Compatibility
    BeginCompat,
    EndCompat,
}

impl OpCode {
    /// Maps an operator keyword to its opcode.
    pub fn from_command(cmd: &str) -> Option<OpCode> {
        let op = match cmd {
            "w" => OpCode::SetLineWidth,
            "J" => OpCode::SetLineCap,
            "j" => OpCode::SetLineJoin,
            "M" => OpCode::SetMiterLimit,
            "d" => OpCode::SetDash,
            "ri" => OpCode::SetRenderingIntent,
            "i" => OpCode::SetFlatness,
            "gs" => OpCode::SetGState,
            "q" => OpCode::Save,
            "Q" => OpCode::Restore,
            "cm" => OpCode::Transform,

            "m" => OpCode::MoveTo,
            "l" => OpCode::LineTo,
            "c" => OpCode::CurveTo,
            "v" => OpCode::CurveTo2,
            "y" => OpCode::CurveTo3,
            "h" => OpCode::ClosePath,
            "re" => OpCode::Rectangle,

            "S" => OpCode::Stroke,
            "s" => OpCode::CloseStroke,
            "f" | "F" => OpCode::Fill,
            "f*" => OpCode::EOFill,
            "B" => OpCode::FillStroke,
            "B*" => OpCode::EOFillStroke,
            "b" => OpCode::CloseFillStroke,
            "b*" => OpCode::CloseEOFillStroke,
            "n" => OpCode::EndPath,

            "W" => OpCode::Clip,
            "W*" => OpCode::EOClip,

            "BT" => OpCode::BeginText,
            "ET" => OpCode::EndText,
            "Tc" => OpCode::SetCharSpacing,
            "Tw" => OpCode::SetWordSpacing,
            "Tz" => OpCode::SetHScale,
            "TL" => OpCode::SetLeading,
            "Tf" => OpCode::SetFont,
            "Tr" => OpCode::SetTextRenderingMode,
            "Ts" => OpCode::SetTextRise,
            "Td" => OpCode::MoveText,
            "TD" => OpCode::SetLeadingMoveText,
            "Tm" => OpCode::SetTextMatrix,
            "T*" => OpCode::NextLine,
            "Tj" => OpCode::ShowText,
            "TJ" => OpCode::ShowSpacedText,
            "'" => OpCode::NextLineShowText,
            "\"" => OpCode::NextLineSetSpacingShowText,
            "d0" => OpCode::SetCharWidth,
            "d1" => OpCode::SetCharWidthAndBounds,

            "CS" => OpCode::SetStrokeColorSpace,
            "cs" => OpCode::SetFillColorSpace,
            "SC" => OpCode::SetStrokeColor,
            "SCN" => OpCode::SetStrokeColorN,
            "sc" => OpCode::SetFillColor,
            "scn" => OpCode::SetFillColorN,
            "G" => OpCode::SetStrokeGray,
            "g" => OpCode::SetFillGray,
            "RG" => OpCode::SetStrokeRGBColor,
            "rg" => OpCode::SetFillRGBColor,
            "K" => OpCode::SetStrokeCMYKColor,
            "k" => OpCode::SetFillCMYKColor,

            "sh" => OpCode::ShadingFill,
            "Do" => OpCode::PaintXObject,

            "MP" => OpCode::MarkPoint,
            "DP" => OpCode::MarkPointProps,
            "BMC" => OpCode::BeginMarkedContent,
            "BDC" => OpCode::BeginMarkedContentProps,
            "EMC" => OpCode::EndMarkedContent,

            "BX" => OpCode::BeginCompat,
            "EX" => OpCode::EndCompat,
            _ => return None,
        };
        Some(op)
    }

    /// Returns the PDF operator keyword for this opcode.
    pub fn to_command(&self) -> &'static str {
        match self {
            OpCode::SetLineWidth => "w",
            OpCode::SetLineCap => "J",
            OpCode::SetLineJoin => "j",
            OpCode::SetMiterLimit => "M",
            OpCode::SetDash => "d",
            OpCode::SetRenderingIntent => "ri",
            OpCode::SetFlatness => "i",
            OpCode::SetGState => "gs",
            OpCode::Save => "q",
            OpCode::Restore => "Q",
            OpCode::Transform => "cm",
            OpCode::MoveTo => "m",
            OpCode::LineTo => "l",
            OpCode::CurveTo => "c",
            OpCode::CurveTo2 => "v",
            OpCode::CurveTo3 => "y",
            OpCode::ClosePath => "h",
            OpCode::Rectangle => "re",
            OpCode::Stroke => "S",
            OpCode::CloseStroke => "s",
            OpCode::Fill => "f",
            OpCode::EOFill => "f*",
            OpCode::FillStroke => "B",
            OpCode::EOFillStroke => "B*",
            OpCode::CloseFillStroke => "b",
            OpCode::CloseEOFillStroke => "b*",
            OpCode::EndPath => "n",
            OpCode::Clip => "W",
            OpCode::EOClip => "W*",
            OpCode::BeginText => "BT",
            OpCode::EndText => "ET",
            OpCode::SetCharSpacing => "Tc",
            OpCode::SetWordSpacing => "Tw",
            OpCode::SetHScale => "Tz",
            OpCode::SetLeading => "TL",
            OpCode::SetFont => "Tf",
            OpCode::SetTextRenderingMode => "Tr",
            OpCode::SetTextRise => "Ts",
            OpCode::MoveText => "Td",
            OpCode::SetLeadingMoveText => "TD",
            OpCode::SetTextMatrix => "Tm",
            OpCode::NextLine => "T*",
            OpCode::ShowText => "Tj",
            OpCode::ShowSpacedText => "TJ",
            OpCode::NextLineShowText => "'",
            OpCode::NextLineSetSpacingShowText => "\"",
            OpCode::SetCharWidth => "d0",
            OpCode::SetCharWidthAndBounds => "d1",
            OpCode::SetStrokeColorSpace => "CS",
            OpCode::SetFillColorSpace => "cs",
            OpCode::SetStrokeColor => "SC",
            OpCode::SetStrokeColorN => "SCN",
            OpCode::SetFillColor => "sc",
            OpCode::SetFillColorN => "scn",
            OpCode::SetStrokeGray => "G",
            OpCode::SetFillGray => "g",
            OpCode::SetStrokeRGBColor => "RG",
            OpCode::SetFillRGBColor => "rg",
            OpCode::SetStrokeCMYKColor => "K",
            OpCode::SetFillCMYKColor => "k",
            OpCode::ShadingFill => "sh",
            OpCode::PaintInlineImage => "BI",
            OpCode::PaintXObject => "Do",
            OpCode::MarkPoint => "MP",
            OpCode::MarkPointProps => "DP",
            OpCode::BeginMarkedContent => "BMC",
            OpCode::BeginMarkedContentProps => "BDC",
            OpCode::EndMarkedContent => "EMC",
            OpCode::BeginCompat => "BX",
            OpCode::EndCompat => "EX",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_command())
    }
}

/// Operand storage; most operators take at most six operands.
pub type Operands = SmallVec<[PDFObject; 6]>;

/// A parsed content stream operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: OpCode,
    /// Operands in stream order
    pub args: Operands,
}

impl Operation {
    pub fn new(op: OpCode, args: Operands) -> Self {
        Operation { op, args }
    }

    /// Numeric operand `i`, if present.
    pub fn number(&self, i: usize) -> Option<f64> {
        self.args.get(i).and_then(PDFObject::as_number)
    }

    /// All operands as numbers, or `None` if any is not numeric.
    pub fn numbers(&self) -> Option<SmallVec<[f64; 6]>> {
        self.args.iter().map(PDFObject::as_number).collect()
    }

    /// Name operand `i`, if present.
    pub fn name(&self, i: usize) -> Option<&str> {
        self.args.get(i).and_then(PDFObject::as_name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.op)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", arg)?;
        }
        write!(f, ")")
    }
}

/// Reads operations from a content stream.
///
/// Unknown operators are skipped together with their operands. Operands left
/// dangling at the end of the stream are dropped.
pub struct ContentStreamEvaluator {
    lexer: Lexer,
}

impl ContentStreamEvaluator {
    pub fn new(data: &[u8]) -> Self {
        ContentStreamEvaluator {
            lexer: Lexer::new(Stream::from_bytes(data)),
        }
    }

    /// Reads the next operation, or `None` at the end of the stream.
    ///
    /// # Example
    /// ```
    /// use mininote_core::core::content_stream::{ContentStreamEvaluator, OpCode};
    ///
    /// let mut evaluator = ContentStreamEvaluator::new(b"10 20 m 30 40 l S");
    /// let mut ops = Vec::new();
    /// while let Some(op) = evaluator.read_operation().unwrap() {
    ///     ops.push(op.op);
    /// }
    /// assert_eq!(ops, vec![OpCode::MoveTo, OpCode::LineTo, OpCode::Stroke]);
    /// ```
    pub fn read_operation(&mut self) -> PDFResult<Option<Operation>> {
        let mut args = Operands::new();

        loop {
            let token = self.lexer.next_token()?;
            match token {
                Token::EOF => {
                    if !args.is_empty() {
                        log::debug!("content stream ended with {} stray operands", args.len());
                    }
                    return Ok(None);
                }
                Token::Command(cmd) => {
                    if cmd == "BI" {
                        return self.read_inline_image().map(Some);
                    }
                    match OpCode::from_command(&cmd) {
                        Some(op) => return Ok(Some(Operation::new(op, args))),
                        None => {
                            log::debug!("skipping unknown operator '{}'", cmd);
                            args.clear();
                        }
                    }
                }
                other => {
                    if args.len() >= MAX_OPERANDS {
                        args.remove(0);
                    }
                    args.push(self.read_operand(other, 0)?);
                }
            }
        }
    }

    fn read_operand(&mut self, token: Token, depth: usize) -> PDFResult<PDFObject> {
        if depth > MAX_OPERAND_DEPTH {
            return Err(PDFError::syntax(self.lexer.position(), "operand nesting too deep"));
        }
        Ok(match token {
            Token::Number(n) => PDFObject::Number(n),
            Token::String(s) => PDFObject::String(s),
            Token::Name(n) => PDFObject::Name(n),
            Token::Boolean(b) => PDFObject::Boolean(b),
            Token::Null => PDFObject::Null,
            Token::ArrayStart => {
                let mut items = Vec::new();
                loop {
                    match self.lexer.next_token()? {
                        Token::ArrayEnd => break,
                        Token::EOF => {
                            return Err(PDFError::syntax(self.lexer.position(), "unterminated array"));
                        }
                        inner => items.push(self.read_operand(inner, depth + 1)?),
                    }
                }
                PDFObject::Array(items)
            }
            Token::DictStart => PDFObject::Dictionary(self.read_dict_body(depth + 1, "dictionary")?),
            Token::Command(cmd) => PDFObject::Command(cmd),
            Token::ArrayEnd | Token::DictEnd => {
                return Err(PDFError::syntax(self.lexer.position(), "unbalanced delimiter"));
            }
            Token::EOF => PDFObject::EOF,
        })
    }

    /// Reads `/Key value` pairs up to `>>` (dictionaries) or `ID` (inline images).
    fn read_dict_body(&mut self, depth: usize, context: &str) -> PDFResult<Dict> {
        let inline = context == "inline image";
        let mut dict = Dict::default();
        loop {
            let key = match self.lexer.next_token()? {
                Token::DictEnd if !inline => return Ok(dict),
                Token::Command(cmd) if inline && cmd == "ID" => return Ok(dict),
                Token::Name(name) => name,
                Token::EOF => {
                    return Err(PDFError::syntax(
                        self.lexer.position(),
                        format!("unterminated {}", context),
                    ));
                }
                other => {
                    return Err(PDFError::syntax(
                        self.lexer.position(),
                        format!("bad {} key {:?}", context, other),
                    ));
                }
            };
            let token = self.lexer.next_token()?;
            let value = self.read_operand(token, depth)?;
            let key = if inline { expand_inline_key(&key).to_string() } else { key };
            dict.insert(key, value);
        }
    }

    fn read_inline_image(&mut self) -> PDFResult<Operation> {
        let start = self.lexer.position();
        let dict = self.read_dict_body(0, "inline image")?;

        // A single whitespace byte separates ID from the data.
        let stream = self.lexer.stream_mut();
        if stream.peek().is_some_and(Lexer::is_whitespace) {
            stream.next_byte();
        }
        let data_start = stream.pos();

        let explicit = dict
            .get("Length")
            .or_else(|| dict.get("L"))
            .and_then(PDFObject::as_usize);
        let data_end = match explicit {
            Some(len) if data_start + len <= stream.end() => data_start + len,
            _ => find_inline_image_end(stream.remaining())
                .map(|off| data_start + off)
                .ok_or_else(|| PDFError::syntax(start, "inline image without EI"))?,
        };

        let data = stream.slice(data_start, data_end)?.to_vec();
        stream.set_pos(data_end)?;

        // Consume the EI keyword.
        match self.lexer.next_token()? {
            Token::Command(cmd) if cmd == "EI" => {}
            other => log::debug!("inline image not followed by EI: {:?}", other),
        }

        let mut args = Operands::new();
        args.push(PDFObject::Dictionary(dict));
        args.push(PDFObject::String(data));
        Ok(Operation::new(OpCode::PaintInlineImage, args))
    }
}

/// Offset of the whitespace that precedes the terminating `EI`.
fn find_inline_image_end(data: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 2 < data.len() {
        if Lexer::is_whitespace(data[i])
            && data[i + 1] == b'E'
            && data[i + 2] == b'I'
            && data.get(i + 3).is_none_or(|&b| Lexer::is_whitespace(b))
        {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn expand_inline_key(key: &str) -> &str {
    match key {
        "BPC" => "BitsPerComponent",
        "CS" => "ColorSpace",
        "D" => "Decode",
        "DP" => "DecodeParms",
        "F" => "Filter",
        "H" => "Height",
        "W" => "Width",
        "IM" => "ImageMask",
        "I" => "Interpolate",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(content: &str) -> Vec<Operation> {
        let mut eval = ContentStreamEvaluator::new(content.as_bytes());
        let mut out = Vec::new();
        while let Some(op) = eval.read_operation().unwrap() {
            out.push(op);
        }
        out
    }

    #[test]
    fn test_opcode_round_trip() {
        for cmd in ["m", "l", "cm", "Tj", "q", "Q", "f*", "scn", "Do"] {
            assert_eq!(OpCode::from_command(cmd).unwrap().to_command(), cmd);
        }
        assert_eq!(OpCode::from_command("F"), Some(OpCode::Fill));
        assert_eq!(OpCode::from_command("XYZ"), None);
    }

    #[test]
    fn test_read_simple_path() {
        let ops = ops("10 20 m\n30 40 l\nS");
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].op, OpCode::MoveTo);
        assert_eq!(ops[0].numbers().unwrap().as_slice(), &[10.0, 20.0]);
        assert_eq!(ops[1].op, OpCode::LineTo);
        assert_eq!(ops[2].op, OpCode::Stroke);
        assert!(ops[2].args.is_empty());
    }

    #[test]
    fn test_unknown_operator_is_skipped_with_its_operands() {
        let ops = ops("1 2 XYZ 0.5 g");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, OpCode::SetFillGray);
        assert_eq!(ops[0].args.len(), 1);
    }

    #[test]
    fn test_array_and_dict_operands() {
        let ops = ops("[3 2] 0 d /P << /MCID 0 >> BDC EMC");
        assert_eq!(ops[0].op, OpCode::SetDash);
        assert_eq!(ops[0].args[0].as_number_array(), Some(vec![3.0, 2.0]));
        assert_eq!(ops[1].op, OpCode::BeginMarkedContentProps);
        assert!(ops[1].args[1].as_dict().is_some());
        assert_eq!(ops[2].op, OpCode::EndMarkedContent);
    }

    #[test]
    fn test_text_operators_are_recognised() {
        let ops = ops("BT /F1 12 Tf (Hello) Tj ET");
        let codes: Vec<_> = ops.iter().map(|o| o.op).collect();
        assert_eq!(
            codes,
            vec![OpCode::BeginText, OpCode::SetFont, OpCode::ShowText, OpCode::EndText]
        );
    }

    #[test]
    fn test_inline_image() {
        let mut content = b"q BI /W 2 /H 1 /BPC 8 /CS /G ID ".to_vec();
        content.extend_from_slice(&[0x00, 0xFF]);
        content.extend_from_slice(b" EI Q");
        let mut eval = ContentStreamEvaluator::new(&content);

        assert_eq!(eval.read_operation().unwrap().unwrap().op, OpCode::Save);
        let image = eval.read_operation().unwrap().unwrap();
        assert_eq!(image.op, OpCode::PaintInlineImage);
        let dict = image.args[0].as_dict().unwrap();
        assert_eq!(dict.get("Width"), Some(&PDFObject::Number(2.0)));
        assert_eq!(dict.get("ColorSpace"), Some(&PDFObject::Name("G".into())));
        assert_eq!(image.args[1], PDFObject::String(vec![0x00, 0xFF]));
        assert_eq!(eval.read_operation().unwrap().unwrap().op, OpCode::Restore);
        assert!(eval.read_operation().unwrap().is_none());
    }

    #[test]
    fn test_inline_image_data_containing_ei_letters() {
        // "EI" inside the data is not delimited by whitespace on both sides.
        let mut content = b"BI /W 4 /H 1 /BPC 8 /CS /G ID ".to_vec();
        content.extend_from_slice(b"xEIy");
        content.extend_from_slice(b"\nEI");
        let ops = ops(std::str::from_utf8(&content).unwrap());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].args[1], PDFObject::String(b"xEIy".to_vec()));
    }

    #[test]
    fn test_unbalanced_operand_is_error() {
        let mut eval = ContentStreamEvaluator::new(b"[1 2");
        assert!(eval.read_operation().is_err());
    }
}
