//! The MiniNote container: original PDF bytes followed by the ink layer.
//!
//! ```text
//! "MNIK" version:u8
//! pdf_len:varint pdf_bytes
//! page_entries:varint
//!   { page:varint stroke_count:varint
//!     { point_count:varint {x:f32 y:f32 pressure:f32 timestamp:u32}* color:u32 width:f32 }* }*
//! ```
//!
//! Varints are unsigned LEB128, at most ten bytes. Fixed-width values are
//! little-endian. Page entries are in ascending page order. Timestamps within
//! a stroke never decrease; pressure is clamped to `0.0..=1.0` on read.

use crate::error::DecodeError;
use crate::ink::{InkPoint, Stroke, StrokeStyle};
use std::collections::BTreeMap;

pub const MAGIC: &[u8; 4] = b"MNIK";
pub const VERSION: u8 = 1;

const MAX_VARINT_LEN: usize = 10;
const POINT_SIZE: usize = 16;
/// Point count varint plus color and width.
const MIN_STROKE_SIZE: usize = 1 + 8;
/// Page index varint plus stroke count varint.
const MIN_PAGE_ENTRY_SIZE: usize = 2;

/// A decoded container.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub pdf: Vec<u8>,
    pub pages: BTreeMap<usize, Vec<Stroke>>,
}

/// True if `bytes` starts with the container magic.
pub fn is_container(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Serializes `pdf` and the non-empty pages of `pages`.
pub fn encode(pdf: &[u8], pages: &BTreeMap<usize, Vec<Stroke>>) -> Vec<u8> {
    let ink_size: usize = pages
        .values()
        .flatten()
        .map(|s| MIN_STROKE_SIZE + s.points().len() * POINT_SIZE)
        .sum();
    let mut out = Vec::with_capacity(MAGIC.len() + 1 + MAX_VARINT_LEN + pdf.len() + ink_size + 16);

    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    write_varint(&mut out, pdf.len() as u64);
    out.extend_from_slice(pdf);

    let entries: Vec<(&usize, &Vec<Stroke>)> = pages.iter().filter(|(_, s)| !s.is_empty()).collect();
    write_varint(&mut out, entries.len() as u64);
    for (&page, strokes) in entries {
        write_varint(&mut out, page as u64);
        write_varint(&mut out, strokes.len() as u64);
        for stroke in strokes {
            write_varint(&mut out, stroke.points().len() as u64);
            for point in stroke.points() {
                out.extend_from_slice(&point.x.to_le_bytes());
                out.extend_from_slice(&point.y.to_le_bytes());
                out.extend_from_slice(&point.pressure.to_le_bytes());
                out.extend_from_slice(&point.timestamp.to_le_bytes());
            }
            out.extend_from_slice(&stroke.color().to_le_bytes());
            out.extend_from_slice(&stroke.width().to_le_bytes());
        }
    }
    out
}

/// Bounds-checked cursor over container bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::Container {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], DecodeError> {
        if length > self.remaining() {
            return Err(self.error(format!(
                "need {} bytes, {} left",
                length,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + length];
        self.pos += length;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.u8()?;
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                self.pos = start;
                return Err(self.error("varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        self.pos = start;
        Err(self.error("varint longer than 10 bytes"))
    }

    /// A count of items each at least `min_size` bytes long.
    fn count(&mut self, what: &str, min_size: usize) -> Result<usize, DecodeError> {
        let start = self.pos;
        let raw = self.varint()?;
        let fits = usize::try_from(raw)
            .ok()
            .filter(|n| n.checked_mul(min_size).is_some_and(|len| len <= self.remaining()));
        fits.ok_or_else(|| {
            let message = format!("{} count {} exceeds the {} bytes left", what, raw, self.remaining());
            self.pos = start;
            self.error(message)
        })
    }

    fn index(&mut self) -> Result<usize, DecodeError> {
        let raw = self.varint()?;
        usize::try_from(raw).map_err(|_| self.error(format!("page index {} too large", raw)))
    }
}

fn decode_stroke(reader: &mut Reader<'_>) -> Result<Stroke, DecodeError> {
    let point_count = reader.count("point", POINT_SIZE)?;
    if point_count == 0 {
        return Err(reader.error("stroke has no points"));
    }
    let mut points: Vec<InkPoint> = Vec::with_capacity(point_count);
    for i in 0..point_count {
        let at = reader.pos;
        let x = reader.f32()?;
        let y = reader.f32()?;
        let pressure = reader.f32()?;
        let timestamp = reader.u32()?;
        if let Some(last) = points.last().filter(|last| timestamp < last.timestamp) {
            let message = format!(
                "point {} timestamp {} precedes {}",
                i, timestamp, last.timestamp
            );
            reader.pos = at;
            return Err(reader.error(message));
        }
        points.push(InkPoint::new(x, y, pressure, timestamp).clamped());
    }
    let color = reader.u32()?;
    let width = reader.f32()?;
    Ok(Stroke::new(points, StrokeStyle::new(color, width)))
}

/// Parses a whole container. Any trailing byte is an error.
pub fn decode(bytes: &[u8]) -> Result<Container, DecodeError> {
    let mut reader = Reader::new(bytes);
    if reader.take(MAGIC.len())? != MAGIC {
        reader.pos = 0;
        return Err(reader.error("missing MNIK magic"));
    }
    let version = reader.u8()?;
    if version != VERSION {
        reader.pos -= 1;
        return Err(reader.error(format!("unsupported version {}", version)));
    }

    let pdf_len = reader.count("PDF byte", 1)?;
    let pdf = reader.take(pdf_len)?.to_vec();

    let entry_count = reader.count("page entry", MIN_PAGE_ENTRY_SIZE)?;
    let mut pages = BTreeMap::new();
    let mut previous: Option<usize> = None;
    for _ in 0..entry_count {
        let at = reader.pos;
        let page = reader.index()?;
        if previous.is_some_and(|p| page <= p) {
            reader.pos = at;
            return Err(reader.error(format!("page {} out of ascending order", page)));
        }
        previous = Some(page);

        let stroke_count = reader.count("stroke", MIN_STROKE_SIZE)?;
        let mut strokes = Vec::with_capacity(stroke_count);
        for _ in 0..stroke_count {
            strokes.push(decode_stroke(&mut reader)?);
        }
        if !strokes.is_empty() {
            pages.insert(page, strokes);
        }
    }

    if reader.remaining() > 0 {
        return Err(reader.error(format!("{} trailing bytes", reader.remaining())));
    }
    log::debug!(
        "decoded container: {} PDF bytes, ink on {} pages",
        pdf.len(),
        pages.len()
    );
    Ok(Container { pdf, pages })
}
