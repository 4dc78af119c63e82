use super::error::PDFResult;
use super::parser::{Dict, ObjRef, PDFObject};
use super::xref::XRef;

/// US Letter, used when neither the page nor its ancestors carry a MediaBox.
pub const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Page attributes that may be set on an ancestor `Pages` node.
#[derive(Debug, Clone, Default)]
pub(crate) struct Inherited {
    pub media_box: Option<[f64; 4]>,
    pub crop_box: Option<[f64; 4]>,
    pub resources: Option<Dict>,
    pub rotate: Option<i64>,
}

/// A single page of a parsed document.
///
/// Inheritable attributes are resolved when the page tree is walked, so a
/// `Page` is self-contained apart from its content streams, which are
/// fetched through the [`XRef`] on demand.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    dict: Dict,
    page_ref: Option<ObjRef>,
    media_box: [f64; 4],
    crop_box: Option<[f64; 4]>,
    rotate: u16,
    resources: Dict,
}

/// Normalises a rectangle so that `[x0, y0]` is the lower-left corner.
pub(crate) fn normalize_rect(values: &[f64]) -> Option<[f64; 4]> {
    if values.len() != 4 || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some([
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ])
}

impl Page {
    pub(crate) fn new(
        index: usize,
        dict: Dict,
        page_ref: Option<ObjRef>,
        inherited: Inherited,
    ) -> Self {
        let media_box = match inherited.media_box {
            Some(rect) if rect[2] > rect[0] && rect[3] > rect[1] => rect,
            _ => {
                log::warn!("page {} has no usable MediaBox, assuming Letter", index);
                DEFAULT_MEDIA_BOX
            }
        };
        let rotate = inherited.rotate.unwrap_or(0).rem_euclid(360);
        let rotate = if rotate % 90 == 0 { rotate as u16 } else { 0 };

        Page {
            index,
            dict,
            page_ref,
            media_box,
            crop_box: inherited.crop_box,
            rotate,
            resources: inherited.resources.unwrap_or_default(),
        }
    }

    /// 0-based page index.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    pub fn reference(&self) -> Option<ObjRef> {
        self.page_ref
    }

    pub fn media_box(&self) -> [f64; 4] {
        self.media_box
    }

    /// Visible region: the CropBox clipped to the MediaBox.
    pub fn view_box(&self) -> [f64; 4] {
        let media = self.media_box;
        match self.crop_box {
            Some(crop) => {
                let clipped = [
                    crop[0].max(media[0]),
                    crop[1].max(media[1]),
                    crop[2].min(media[2]),
                    crop[3].min(media[3]),
                ];
                if clipped[2] > clipped[0] && clipped[3] > clipped[1] {
                    clipped
                } else {
                    media
                }
            }
            None => media,
        }
    }

    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub fn rotate(&self) -> u16 {
        self.rotate
    }

    /// Displayed size in points, after rotation.
    pub fn size(&self) -> (f64, f64) {
        let [x0, y0, x1, y1] = self.view_box();
        let (w, h) = (x1 - x0, y1 - y0);
        if self.rotate % 180 == 90 { (h, w) } else { (w, h) }
    }

    pub fn resources(&self) -> &Dict {
        &self.resources
    }

    /// Decoded content of the page: every content stream, in order, joined
    /// by newlines. Streams that fail to decode are skipped with a warning.
    pub fn content_data(&self, xref: &XRef) -> PDFResult<Vec<u8>> {
        let Some(contents) = xref.get(&self.dict, "Contents")? else {
            return Ok(Vec::new());
        };

        let streams = match contents {
            PDFObject::Stream(stream) => vec![stream],
            PDFObject::Array(items) => {
                let mut streams = Vec::with_capacity(items.len());
                for item in &items {
                    match xref.resolve(item)? {
                        PDFObject::Stream(stream) => streams.push(stream),
                        other => {
                            log::warn!(
                                "page {}: skipping non-stream content entry {:?}",
                                self.index,
                                other
                            );
                        }
                    }
                }
                streams
            }
            other => {
                log::warn!("page {}: unexpected /Contents {:?}", self.index, other);
                Vec::new()
            }
        };

        let mut data = Vec::new();
        for (i, stream) in streams.iter().enumerate() {
            match xref.decode_stream(stream) {
                Ok(decoded) => {
                    data.extend_from_slice(&decoded);
                    data.push(b'\n');
                }
                Err(e) => {
                    log::warn!("page {}: content stream {} undecodable: {}", self.index, i, e);
                }
            }
        }
        Ok(data)
    }
}
