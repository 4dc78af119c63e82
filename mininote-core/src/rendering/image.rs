//! Image XObject and inline image decoding.
//!
//! Samples are converted to 8-bit RGBA (not premultiplied) ready for the
//! device. Supported:
//! - DeviceGray, DeviceRGB, DeviceCMYK and their Cal/ICC equivalents
//! - Indexed over any of the above
//! - 1, 2, 4, 8 and 16 bits per component, `/Decode` arrays
//! - stencil masks (`/ImageMask true`) painted with the fill colour
//! - `/SMask` soft masks of the same size
//! - DCTDecode through zune-jpeg (feature `jpeg-decoding`)

use super::device::{ImageData, Paint};
use crate::core::decode::ImageCodec;
use crate::core::error::{PDFError, PDFResult};
use crate::core::parser::{Dict, PDFObject, PdfStream};
use crate::core::xref::XRef;

/// Images larger than this many pixels are rejected.
const MAX_IMAGE_PIXELS: u64 = 1 << 26;

/// Colour space of image samples.
#[derive(Debug, Clone, PartialEq)]
enum SampleSpace {
    Gray,
    /// Separation or DeviceN with one colourant; tint 1 is full ink
    Tint,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<SampleSpace>,
        hival: usize,
        lookup: Vec<u8>,
    },
}

impl SampleSpace {
    fn components(&self) -> usize {
        match self {
            SampleSpace::Gray | SampleSpace::Tint | SampleSpace::Indexed { .. } => 1,
            SampleSpace::Rgb => 3,
            SampleSpace::Cmyk => 4,
        }
    }

    fn from_components(n: usize) -> Option<Self> {
        match n {
            1 => Some(SampleSpace::Gray),
            3 => Some(SampleSpace::Rgb),
            4 => Some(SampleSpace::Cmyk),
            _ => None,
        }
    }

    fn parse(xref: &XRef, obj: &PDFObject, resources: Option<&Dict>, depth: usize) -> PDFResult<Self> {
        if depth > 4 {
            return Err(PDFError::Structure("colour space nesting too deep".into()));
        }
        let obj = xref.resolve(obj)?;
        match &obj {
            PDFObject::Name(name) => match name.as_str() {
                "DeviceGray" | "G" | "CalGray" => Ok(SampleSpace::Gray),
                "DeviceRGB" | "RGB" | "CalRGB" => Ok(SampleSpace::Rgb),
                "DeviceCMYK" | "CMYK" => Ok(SampleSpace::Cmyk),
                other => {
                    // Named resource, e.g. /CS0 from the page's /ColorSpace dict
                    let named = match resources {
                        Some(res) => match xref.get(res, "ColorSpace")? {
                            Some(PDFObject::Dictionary(spaces)) => spaces.get(other).cloned(),
                            _ => None,
                        },
                        None => None,
                    };
                    match named {
                        Some(space) => Self::parse(xref, &space, None, depth + 1),
                        None => Err(PDFError::Generic(format!("unsupported colour space /{}", other))),
                    }
                }
            },
            PDFObject::Array(items) => {
                let family = items.first().and_then(PDFObject::as_name).unwrap_or("");
                match family {
                    "DeviceGray" | "CalGray" | "G" => Ok(SampleSpace::Gray),
                    "DeviceRGB" | "CalRGB" | "RGB" => Ok(SampleSpace::Rgb),
                    "DeviceCMYK" | "CMYK" => Ok(SampleSpace::Cmyk),
                    "ICCBased" => {
                        let stream = match items.get(1) {
                            Some(item) => xref.resolve(item)?,
                            None => PDFObject::Null,
                        };
                        let n = stream
                            .as_dict()
                            .and_then(|d| d.get("N"))
                            .and_then(PDFObject::as_usize)
                            .unwrap_or(3);
                        Self::from_components(n)
                            .ok_or_else(|| PDFError::Generic(format!("ICCBased with {} components", n)))
                    }
                    "Separation" => Ok(SampleSpace::Tint),
                    "DeviceN" => match items.get(1).map(|n| xref.resolve(n)).transpose()? {
                        Some(PDFObject::Array(names)) if names.len() == 1 => Ok(SampleSpace::Tint),
                        _ => Err(PDFError::Generic("multi-colourant DeviceN images".into())),
                    },
                    "Indexed" | "I" => {
                        let base = items
                            .get(1)
                            .ok_or_else(|| PDFError::Structure("Indexed without base".into()))?;
                        let base = Self::parse(xref, base, resources, depth + 1)?;
                        let hival = match items.get(2) {
                            Some(h) => xref.resolve(h)?.as_usize().unwrap_or(0).min(255),
                            None => 0,
                        };
                        let lookup = match items.get(3).map(|l| xref.resolve(l)).transpose()? {
                            Some(PDFObject::String(bytes)) => bytes,
                            Some(PDFObject::Stream(stream)) => xref.decode_stream(&stream)?,
                            _ => Vec::new(),
                        };
                        Ok(SampleSpace::Indexed {
                            base: Box::new(base),
                            hival,
                            lookup,
                        })
                    }
                    other => Err(PDFError::Generic(format!("unsupported colour space /{}", other))),
                }
            }
            other => Err(PDFError::Generic(format!("invalid colour space {:?}", other))),
        }
    }

    /// Writes the RGB of `values` (each in 0..=1) into `out`.
    fn to_rgb(&self, values: &[f64], out: &mut [u8]) {
        let byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            SampleSpace::Gray => {
                let g = byte(values[0]);
                out[..3].copy_from_slice(&[g, g, g]);
            }
            SampleSpace::Tint => {
                let g = byte(1.0 - values[0]);
                out[..3].copy_from_slice(&[g, g, g]);
            }
            SampleSpace::Rgb => {
                out[0] = byte(values[0]);
                out[1] = byte(values[1]);
                out[2] = byte(values[2]);
            }
            SampleSpace::Cmyk => {
                let k = 1.0 - values[3].clamp(0.0, 1.0);
                out[0] = byte((1.0 - values[0].clamp(0.0, 1.0)) * k);
                out[1] = byte((1.0 - values[1].clamp(0.0, 1.0)) * k);
                out[2] = byte((1.0 - values[2].clamp(0.0, 1.0)) * k);
            }
            SampleSpace::Indexed { base, hival, lookup } => {
                let index = (values[0].round().max(0.0) as usize).min(*hival);
                let n = base.components();
                let mut components = [0.0f64; 4];
                for (c, slot) in components.iter_mut().enumerate().take(n) {
                    *slot = lookup.get(index * n + c).map_or(0.0, |&b| f64::from(b) / 255.0);
                }
                base.to_rgb(&components[..n], out);
            }
        }
    }
}

/// Reads `bits`-wide samples MSB first; rows start on a byte boundary.
struct SampleReader<'a> {
    data: &'a [u8],
    bits: u32,
    pos: usize,
}

impl<'a> SampleReader<'a> {
    fn new(data: &'a [u8], bits: u32) -> Self {
        SampleReader { data, bits, pos: 0 }
    }

    fn seek_row(&mut self, row: usize, row_bytes: usize) {
        self.pos = row * row_bytes * 8;
    }

    fn next(&mut self) -> u32 {
        let value = match self.bits {
            8 => u32::from(self.data.get(self.pos / 8).copied().unwrap_or(0)),
            16 => {
                let i = self.pos / 8;
                let hi = u32::from(self.data.get(i).copied().unwrap_or(0));
                let lo = u32::from(self.data.get(i + 1).copied().unwrap_or(0));
                (hi << 8) | lo
            }
            bits => {
                let byte = u32::from(self.data.get(self.pos / 8).copied().unwrap_or(0));
                let shift = 8 - bits - (self.pos % 8) as u32;
                (byte >> shift) & ((1 << bits) - 1)
            }
        };
        self.pos += self.bits as usize;
        value
    }
}

fn dict_number(xref: &XRef, dict: &Dict, keys: &[&str]) -> PDFResult<Option<f64>> {
    for key in keys {
        if let Some(value) = xref.get(dict, key)? {
            return Ok(value.as_number());
        }
    }
    Ok(None)
}

fn dict_entry(xref: &XRef, dict: &Dict, keys: &[&str]) -> PDFResult<Option<PDFObject>> {
    for key in keys {
        if let Some(value) = xref.get(dict, key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn dimensions(xref: &XRef, dict: &Dict) -> PDFResult<(u32, u32)> {
    let width = dict_number(xref, dict, &["Width", "W"])?.unwrap_or(0.0);
    let height = dict_number(xref, dict, &["Height", "H"])?.unwrap_or(0.0);
    if !(width >= 1.0 && height >= 1.0) || width * height > MAX_IMAGE_PIXELS as f64 {
        return Err(PDFError::Structure(format!("invalid image size {}x{}", width, height)));
    }
    Ok((width as u32, height as u32))
}

/// Decodes an image XObject or inline image to RGBA.
///
/// `fill` paints stencil masks. `resources` resolves named colour spaces of
/// inline images.
pub fn decode_image(
    xref: &XRef,
    stream: &PdfStream,
    fill: &Paint,
    resources: Option<&Dict>,
) -> PDFResult<ImageData> {
    let dict = &stream.dict;
    let (width, height) = dimensions(xref, dict)?;
    let is_mask = dict_entry(xref, dict, &["ImageMask", "IM"])?
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let decode_array = dict_entry(xref, dict, &["Decode", "D"])?.and_then(|v| v.as_number_array());

    let (data, codec) = xref.decode_image_stream(stream)?;

    let mut image = match codec {
        None if is_mask => decode_stencil(&data, width, height, decode_array.as_deref(), fill),
        None => {
            let space = match dict_entry(xref, dict, &["ColorSpace", "CS"])? {
                Some(cs) => SampleSpace::parse(xref, &cs, resources, 0)?,
                None => return Err(PDFError::Structure("image without /ColorSpace".into())),
            };
            let bpc = dict_number(xref, dict, &["BitsPerComponent", "BPC"])?.unwrap_or(8.0) as u32;
            if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
                return Err(PDFError::Structure(format!("unsupported BitsPerComponent {}", bpc)));
            }
            decode_samples(&data, width, height, bpc, &space, decode_array.as_deref())
        }
        Some(ImageCodec::Dct) => decode_jpeg(&data, decode_array.as_deref())?,
        Some(other) => {
            return Err(PDFError::filter(&format!("{:?}", other), "image codec not supported"));
        }
    };

    if !is_mask {
        if let Some(PDFObject::Stream(smask)) = xref.get(dict, "SMask")? {
            apply_soft_mask(xref, &smask, &mut image)?;
        }
    }
    Ok(image)
}

fn decode_samples(
    data: &[u8],
    width: u32,
    height: u32,
    bpc: u32,
    space: &SampleSpace,
    decode: Option<&[f64]>,
) -> ImageData {
    let n = space.components();
    let (w, h) = (width as usize, height as usize);
    let row_bytes = (w * n * bpc as usize).div_ceil(8);
    if data.len() < row_bytes * h {
        log::warn!(
            "image data short: {} of {} bytes, padding with zeros",
            data.len(),
            row_bytes * h
        );
    }

    let max = ((1u64 << bpc) - 1) as f64;
    let indexed = matches!(space, SampleSpace::Indexed { .. });
    let ranges: Vec<(f64, f64)> = (0..n)
        .map(|c| match decode {
            Some(d) if d.len() >= 2 * n => (d[2 * c], d[2 * c + 1]),
            _ if indexed => (0.0, max),
            _ => (0.0, 1.0),
        })
        .collect();

    let mut rgba = vec![255u8; w * h * 4];
    let mut reader = SampleReader::new(data, bpc);
    let mut values = [0.0f64; 4];
    for y in 0..h {
        reader.seek_row(y, row_bytes);
        for x in 0..w {
            for (c, value) in values.iter_mut().enumerate().take(n) {
                let (lo, hi) = ranges[c];
                *value = lo + f64::from(reader.next()) * (hi - lo) / max;
            }
            let at = (y * w + x) * 4;
            space.to_rgb(&values[..n], &mut rgba[at..at + 3]);
        }
    }
    ImageData { width, height, rgba }
}

/// A 1-bit stencil: samples equal to 0 (1 with `/Decode [1 0]`) are painted.
fn decode_stencil(data: &[u8], width: u32, height: u32, decode: Option<&[f64]>, fill: &Paint) -> ImageData {
    let inverted = matches!(decode, Some([first, ..]) if *first >= 1.0);
    let [r, g, b, a] = fill.to_rgba8();
    let (w, h) = (width as usize, height as usize);
    let row_bytes = w.div_ceil(8);
    let mut rgba = vec![0u8; w * h * 4];
    let mut reader = SampleReader::new(data, 1);
    for y in 0..h {
        reader.seek_row(y, row_bytes);
        for x in 0..w {
            let painted = (reader.next() == 0) != inverted;
            if painted {
                let at = (y * w + x) * 4;
                rgba[at..at + 4].copy_from_slice(&[r, g, b, a]);
            }
        }
    }
    ImageData { width, height, rgba }
}

fn apply_soft_mask(xref: &XRef, smask: &PdfStream, image: &mut ImageData) -> PDFResult<()> {
    let (width, height) = match dimensions(xref, &smask.dict) {
        Ok(size) => size,
        Err(e) => {
            log::warn!("ignoring soft mask: {}", e);
            return Ok(());
        }
    };
    if (width, height) != (image.width, image.height) {
        log::warn!(
            "ignoring {}x{} soft mask on {}x{} image",
            width,
            height,
            image.width,
            image.height
        );
        return Ok(());
    }
    let (data, codec) = xref.decode_image_stream(smask)?;
    let mask = match codec {
        None => {
            let bpc = dict_number(xref, &smask.dict, &["BitsPerComponent"])?.unwrap_or(8.0) as u32;
            if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
                log::warn!("ignoring soft mask with BitsPerComponent {}", bpc);
                return Ok(());
            }
            decode_samples(&data, width, height, bpc, &SampleSpace::Gray, None)
        }
        Some(ImageCodec::Dct) => decode_jpeg(&data, None)?,
        Some(other) => {
            log::warn!("ignoring soft mask encoded with {:?}", other);
            return Ok(());
        }
    };
    for (pixel, gray) in image.rgba.chunks_exact_mut(4).zip(mask.rgba.chunks_exact(4)) {
        pixel[3] = ((u16::from(pixel[3]) * u16::from(gray[0]) + 127) / 255) as u8;
    }
    Ok(())
}

#[cfg(feature = "jpeg-decoding")]
fn decode_jpeg(data: &[u8], decode: Option<&[f64]>) -> PDFResult<ImageData> {
    use std::io::Cursor;
    use zune_jpeg::zune_core::options::DecoderOptions;

    let options = DecoderOptions::default()
        .set_max_width(u16::MAX as usize)
        .set_max_height(u16::MAX as usize);
    let mut decoder = zune_jpeg::JpegDecoder::new_with_options(Cursor::new(data), options);
    decoder
        .decode_headers()
        .map_err(|e| PDFError::filter("DCTDecode", format!("header: {:?}", e)))?;
    let info = decoder
        .info()
        .ok_or_else(|| PDFError::filter("DCTDecode", "missing image info"))?;
    let (width, height) = (info.width as u32, info.height as u32);
    let pixels = decoder
        .decode()
        .map_err(|e| PDFError::filter("DCTDecode", format!("{:?}", e)))?;

    let count = width as usize * height as usize;
    if count == 0 {
        return Err(PDFError::filter("DCTDecode", "empty image"));
    }
    let channels = pixels.len() / count;
    let space = match channels {
        1 => SampleSpace::Gray,
        3 => SampleSpace::Rgb,
        4 => SampleSpace::Cmyk,
        n => return Err(PDFError::filter("DCTDecode", format!("{} channels", n))),
    };
    let ranges: Vec<(f64, f64)> = (0..channels)
        .map(|c| match decode {
            Some(d) if d.len() >= 2 * channels => (d[2 * c], d[2 * c + 1]),
            _ => (0.0, 1.0),
        })
        .collect();

    let mut rgba = vec![255u8; count * 4];
    let mut values = [0.0f64; 4];
    for (i, sample) in pixels.chunks_exact(channels).enumerate() {
        for (c, value) in values.iter_mut().enumerate().take(channels) {
            let (lo, hi) = ranges[c];
            *value = lo + f64::from(sample[c]) * (hi - lo) / 255.0;
        }
        space.to_rgb(&values[..channels], &mut rgba[i * 4..i * 4 + 3]);
    }
    Ok(ImageData { width, height, rgba })
}

#[cfg(not(feature = "jpeg-decoding"))]
fn decode_jpeg(_data: &[u8], _decode: Option<&[f64]>) -> PDFResult<ImageData> {
    Err(PDFError::filter(
        "DCTDecode",
        "JPEG decoding not enabled, build with the 'jpeg-decoding' feature",
    ))
}
