//! Stream filters.
//!
//! General-purpose filters (Flate, LZW, ASCIIHex, ASCII85, RunLength) are
//! decoded here, including the TIFF and PNG predictors carried in
//! `/DecodeParms`. Image codecs (DCT and friends) are reported to the caller
//! and left encoded.
use super::error::{PDFError, PDFResult};
use super::parser::{Dict, PDFObject};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// Image-specific codec found at the end of a filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCodec {
    Dct,
    Jpx,
    CcittFax,
    Jbig2,
}

impl ImageCodec {
    fn from_filter(name: &str) -> Option<Self> {
        match name {
            "DCTDecode" | "DCT" => Some(ImageCodec::Dct),
            "JPXDecode" => Some(ImageCodec::Jpx),
            "CCITTFaxDecode" | "CCF" => Some(ImageCodec::CcittFax),
            "JBIG2Decode" => Some(ImageCodec::Jbig2),
            _ => None,
        }
    }
}

/// Decodes a FlateDecode stream.
///
/// Zlib framing is expected; raw deflate data is accepted as a fallback, and
/// a truncated stream yields whatever was inflated before the damage.
pub fn decode_flate(compressed: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::new();
    let zlib_err = match ZlibDecoder::new(compressed).read_to_end(&mut out) {
        Ok(_) => return Ok(out),
        Err(e) => e,
    };
    if !out.is_empty() {
        log::warn!(
            "FlateDecode: corrupt zlib data after {} bytes ({}), keeping partial output",
            out.len(),
            zlib_err
        );
        return Ok(out);
    }

    out.clear();
    match DeflateDecoder::new(compressed).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(_) if !out.is_empty() => Ok(out),
        Err(deflate_err) => Err(PDFError::filter(
            "FlateDecode",
            format!(
                "zlib failed ({}), raw deflate failed ({}), {} input bytes",
                zlib_err,
                deflate_err,
                compressed.len()
            ),
        )),
    }
}

/// Decodes ASCIIHex data. Whitespace is ignored and `>` ends the data.
pub fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;

    for &byte in data {
        if byte == b'>' {
            break;
        }
        let nibble = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b if super::lexer::Lexer::is_whitespace(b) => continue,
            other => {
                return Err(PDFError::filter(
                    "ASCIIHexDecode",
                    format!("invalid character 0x{:02x}", other),
                ));
            }
        };
        match high.take() {
            Some(h) => out.push((h << 4) | nibble),
            None => high = Some(nibble),
        }
    }

    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

/// Decodes ASCII85 data up to the `~>` marker.
pub fn decode_ascii85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut tuple = 0u64;
    let mut count = 0usize;

    for &byte in data {
        match byte {
            b'~' => break,
            b'z' if count == 0 => out.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                tuple = tuple * 85 + u64::from(byte - b'!');
                count += 1;
                if count == 5 {
                    if tuple > u64::from(u32::MAX) {
                        return Err(PDFError::filter("ASCII85Decode", "group overflow"));
                    }
                    out.extend_from_slice(&(tuple as u32).to_be_bytes());
                    tuple = 0;
                    count = 0;
                }
            }
            b if super::lexer::Lexer::is_whitespace(b) => {}
            other => {
                return Err(PDFError::filter(
                    "ASCII85Decode",
                    format!("invalid character 0x{:02x}", other),
                ));
            }
        }
    }

    if count == 1 {
        return Err(PDFError::filter("ASCII85Decode", "dangling final character"));
    }
    if count > 1 {
        for _ in count..5 {
            tuple = tuple * 85 + 84;
        }
        let bytes = (tuple.min(u64::from(u32::MAX)) as u32).to_be_bytes();
        out.extend_from_slice(&bytes[..count - 1]);
    }
    Ok(out)
}

/// Decodes RunLengthDecode data.
pub fn decode_run_length(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let len = data[i];
        i += 1;
        match len {
            128 => break,
            0..=127 => {
                let count = usize::from(len) + 1;
                let end = (i + count).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let Some(&byte) = data.get(i) else { break };
                out.extend(std::iter::repeat_n(byte, 257 - usize::from(len)));
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Decodes LZWDecode data with the given `/EarlyChange` setting.
pub fn decode_lzw(data: &[u8], early_change: bool) -> PDFResult<Vec<u8>> {
    const CLEAR: u16 = 256;
    const EOD: u16 = 257;

    let mut out = Vec::new();
    let mut table: Vec<Vec<u8>> = Vec::with_capacity(4096);
    let reset = |table: &mut Vec<Vec<u8>>| {
        table.clear();
        table.extend((0..=255u8).map(|b| vec![b]));
        table.push(Vec::new());
        table.push(Vec::new());
    };
    reset(&mut table);

    let mut code_len = 9u32;
    let mut bit_buf = 0u32;
    let mut bit_count = 0u32;
    let mut prev: Option<Vec<u8>> = None;
    let early = u32::from(early_change);

    for &byte in data {
        bit_buf = (bit_buf << 8) | u32::from(byte);
        bit_count += 8;

        while bit_count >= code_len {
            let code = ((bit_buf >> (bit_count - code_len)) & ((1 << code_len) - 1)) as u16;
            bit_count -= code_len;
            bit_buf &= (1 << bit_count) - 1;

            if code == CLEAR {
                reset(&mut table);
                code_len = 9;
                prev = None;
                continue;
            }
            if code == EOD {
                return Ok(out);
            }

            let entry = if usize::from(code) < table.len() {
                table[usize::from(code)].clone()
            } else if let Some(p) = &prev {
                let mut e = p.clone();
                e.push(p[0]);
                e
            } else {
                return Err(PDFError::filter("LZWDecode", format!("invalid code {}", code)));
            };
            out.extend_from_slice(&entry);

            if let Some(mut p) = prev.take() {
                if table.len() < 4096 {
                    p.push(entry[0]);
                    table.push(p);
                }
            }
            prev = Some(entry);

            let next = table.len() as u32 + early;
            code_len = match next {
                n if n >= 2048 => 12,
                n if n >= 1024 => 11,
                n if n >= 512 => 10,
                _ => 9,
            };
        }
    }
    Ok(out)
}

/// Reverses a PNG predictor (`/Predictor` 10..=15).
pub fn decode_png_predictor(
    data: &[u8],
    colors: usize,
    bits_per_component: usize,
    columns: usize,
) -> PDFResult<Vec<u8>> {
    let pix_bytes = (colors * bits_per_component).div_ceil(8).max(1);
    let row_bytes = (columns * colors * bits_per_component).div_ceil(8);
    if row_bytes == 0 {
        return Err(PDFError::filter("Predictor", "zero-width rows"));
    }
    let stride = row_bytes + 1;

    let mut output = Vec::with_capacity(data.len() / stride * row_bytes);
    let mut prev_row = vec![0u8; row_bytes];
    let mut row = vec![0u8; row_bytes];

    for chunk in data.chunks(stride) {
        let predictor = chunk[0];
        let raw = &chunk[1..];
        row.fill(0);
        row[..raw.len()].copy_from_slice(raw);

        for i in 0..row_bytes {
            let left = if i >= pix_bytes { row[i - pix_bytes] } else { 0 };
            let up = prev_row[i];
            let up_left = if i >= pix_bytes { prev_row[i - pix_bytes] } else { 0 };
            let prediction = match predictor {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(PDFError::filter(
                        "Predictor",
                        format!("unsupported PNG predictor {}", other),
                    ));
                }
            };
            row[i] = row[i].wrapping_add(prediction);
        }

        output.extend_from_slice(&row[..raw.len()]);
        std::mem::swap(&mut prev_row, &mut row);
    }

    Ok(output)
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = i16::from(left) + i16::from(up) - i16::from(up_left);
    let pa = (p - i16::from(left)).abs();
    let pb = (p - i16::from(up)).abs();
    let pc = (p - i16::from(up_left)).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

/// Reverses TIFF predictor 2 for 8-bit components.
pub fn decode_tiff_predictor(
    data: &[u8],
    colors: usize,
    bits_per_component: usize,
    columns: usize,
) -> PDFResult<Vec<u8>> {
    if bits_per_component != 8 {
        return Err(PDFError::filter(
            "Predictor",
            format!("TIFF predictor with {} bits per component", bits_per_component),
        ));
    }
    let row_bytes = columns * colors;
    if row_bytes == 0 {
        return Err(PDFError::filter("Predictor", "zero-width rows"));
    }
    let mut out = data.to_vec();
    for row in out.chunks_mut(row_bytes) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(out)
}

fn parm_usize(parms: Option<&Dict>, key: &str, default: usize) -> usize {
    parms
        .and_then(|p| p.get(key))
        .and_then(PDFObject::as_usize)
        .unwrap_or(default)
}

fn apply_predictor(data: Vec<u8>, parms: Option<&Dict>) -> PDFResult<Vec<u8>> {
    let predictor = parm_usize(parms, "Predictor", 1);
    if predictor <= 1 {
        return Ok(data);
    }
    let colors = parm_usize(parms, "Colors", 1);
    let bpc = parm_usize(parms, "BitsPerComponent", 8);
    let columns = parm_usize(parms, "Columns", 1);
    match predictor {
        2 => decode_tiff_predictor(&data, colors, bpc, columns),
        _ => decode_png_predictor(&data, colors, bpc, columns),
    }
}

/// One step of a filter chain: the filter name and its parameters.
pub type FilterStep<'a> = (&'a str, Option<&'a Dict>);

/// Pairs each filter name with its `/DecodeParms` entry.
///
/// Both values must already be resolved (no indirect references at the top
/// level). Non-name entries are ignored.
pub fn filter_chain<'a>(
    filter: Option<&'a PDFObject>,
    parms: Option<&'a PDFObject>,
) -> Vec<FilterStep<'a>> {
    let names: Vec<&str> = match filter {
        Some(PDFObject::Name(name)) => vec![name.as_str()],
        Some(PDFObject::Array(items)) => items.iter().filter_map(PDFObject::as_name).collect(),
        _ => Vec::new(),
    };
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let p = match parms {
                Some(PDFObject::Dictionary(d)) if i == 0 => Some(d),
                Some(PDFObject::Array(items)) => items.get(i).and_then(|o| match o {
                    PDFObject::Dictionary(d) => Some(d),
                    _ => None,
                }),
                _ => None,
            };
            (name, p)
        })
        .collect()
}

fn apply_filter(data: &[u8], name: &str, parms: Option<&Dict>) -> PDFResult<Vec<u8>> {
    match name {
        "FlateDecode" | "Fl" => apply_predictor(decode_flate(data)?, parms),
        "LZWDecode" | "LZW" => {
            let early = parm_usize(parms, "EarlyChange", 1) != 0;
            apply_predictor(decode_lzw(data, early)?, parms)
        }
        "ASCIIHexDecode" | "AHx" => decode_ascii_hex(data),
        "ASCII85Decode" | "A85" => decode_ascii85(data),
        "RunLengthDecode" | "RL" => decode_run_length(data),
        other => Err(PDFError::filter(other, "unsupported filter")),
    }
}

/// Decodes data through a filter chain, stopping at an image codec.
///
/// Filters are applied in the order they are listed. If the chain ends in an
/// image codec, the data handed to that codec is returned together with it.
pub fn decode_until_image_codec(
    data: &[u8],
    filter: Option<&PDFObject>,
    parms: Option<&PDFObject>,
) -> PDFResult<(Vec<u8>, Option<ImageCodec>)> {
    let chain = filter_chain(filter, parms);
    let mut current = data.to_vec();
    for (i, (name, p)) in chain.iter().enumerate() {
        if let Some(codec) = ImageCodec::from_filter(name) {
            if i + 1 != chain.len() {
                return Err(PDFError::filter(name, "image codec must be the last filter"));
            }
            return Ok((current, Some(codec)));
        }
        current = apply_filter(&current, name, *p)?;
    }
    Ok((current, None))
}

/// Fully decodes data through a filter chain.
pub fn decode_stream(
    data: &[u8],
    filter: Option<&PDFObject>,
    parms: Option<&PDFObject>,
) -> PDFResult<Vec<u8>> {
    match decode_until_image_codec(data, filter, parms)? {
        (decoded, None) => Ok(decoded),
        (_, Some(codec)) => Err(PDFError::filter(
            &format!("{:?}", codec),
            "image codec in a non-image stream",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn name(n: &str) -> PDFObject {
        PDFObject::Name(n.to_string())
    }

    #[test]
    fn test_decode_flate_zlib_and_raw() {
        let original = b"Hello, PDF world! This is test data.";
        assert_eq!(decode_flate(&zlib(original)).unwrap(), original);

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(original).unwrap();
        assert_eq!(decode_flate(&raw.finish().unwrap()).unwrap(), original);
    }

    #[test]
    fn test_decode_flate_garbage_fails() {
        assert!(decode_flate(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_decode_ascii_hex() {
        assert_eq!(decode_ascii_hex(b"48 65\n6C\t6C 6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"414>").unwrap(), b"A@");
        assert!(decode_ascii_hex(b"4G").is_err());
    }

    #[test]
    fn test_decode_ascii85() {
        assert_eq!(decode_ascii85(b"87cURD]i,\"Ebo80~>").unwrap(), b"Hello World!");
        assert_eq!(decode_ascii85(b"z~>").unwrap(), b"\0\0\0\0");
        assert_eq!(decode_ascii85(b"87cURDZ~>").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_run_length() {
        // literal run of 3, then 4 copies of 'z', then EOD
        let data = [2, b'a', b'b', b'c', 253, b'z', 128];
        assert_eq!(decode_run_length(&data).unwrap(), b"abczzzz");
    }

    #[test]
    fn test_decode_lzw_known_sequence() {
        // Example from the PDF reference: 45 45 45 45 45 65 45 45 45 66
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        assert_eq!(
            decode_lzw(&encoded, true).unwrap(),
            vec![45, 45, 45, 45, 45, 65, 45, 45, 45, 66]
        );
    }

    #[test]
    fn test_png_up_predictor() {
        // two rows, 3 columns, 1 color; second row uses Up
        let data = [0, 1, 2, 3, 2, 1, 1, 1];
        assert_eq!(decode_png_predictor(&data, 1, 8, 3).unwrap(), vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_and_paeth_predictors() {
        let data = [1, 10, 5, 5, 4, 1, 1, 1];
        // row 1 Sub: 10, 15, 20; row 2 Paeth over it
        let out = decode_png_predictor(&data, 1, 8, 3).unwrap();
        assert_eq!(&out[..3], &[10, 15, 20]);
        assert_eq!(out[3], 11);
    }

    #[test]
    fn test_tiff_predictor() {
        let out = decode_tiff_predictor(&[1, 1, 1, 5, 1, 1], 1, 8, 3).unwrap();
        assert_eq!(out, vec![1, 2, 3, 5, 6, 7]);
    }

    #[test]
    fn test_filter_chain_runs_in_listed_order() {
        let original = b"Hello, World! Testing multi-filter decode.";
        let compressed = zlib(original);
        let hex: String = compressed.iter().map(|b| format!("{:02X}", b)).collect();

        let filters = PDFObject::Array(vec![name("ASCIIHexDecode"), name("FlateDecode")]);
        let decoded = decode_stream(hex.as_bytes(), Some(&filters), None).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_flate_with_png_predictor_parms() {
        let rows = [2u8, 1, 2, 3, 2, 1, 1, 1];
        let mut parms = Dict::default();
        parms.insert("Predictor".into(), PDFObject::Number(12.0));
        parms.insert("Columns".into(), PDFObject::Number(3.0));
        let decoded = decode_stream(
            &zlib(&rows),
            Some(&name("FlateDecode")),
            Some(&PDFObject::Dictionary(parms)),
        )
        .unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_image_codec_is_left_encoded() {
        let filters = PDFObject::Array(vec![name("ASCIIHexDecode"), name("DCTDecode")]);
        let (data, codec) = decode_until_image_codec(b"FFD8>", Some(&filters), None).unwrap();
        assert_eq!(data, vec![0xFF, 0xD8]);
        assert_eq!(codec, Some(ImageCodec::Dct));
        assert!(decode_stream(b"FFD8>", Some(&filters), None).is_err());
    }

    #[test]
    fn test_unsupported_filter() {
        assert!(decode_stream(b"data", Some(&name("Bogus")), None).is_err());
    }
}
