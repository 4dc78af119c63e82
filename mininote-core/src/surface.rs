//! Raster surfaces shared between the renderer, compositor and callers.

use crate::error::{EngineError, EngineResult};
use tiny_skia::Pixmap;

/// An RGBA raster, premultiplied alpha, row-major, top row first.
#[derive(Clone, PartialEq)]
pub struct Surface {
    pixmap: Pixmap,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Surface {
    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Surface { pixmap }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Raw premultiplied RGBA bytes.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    /// Premultiplied RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixmap
            .pixel(x, y)
            .map(|p| [p.red(), p.green(), p.blue(), p.alpha()])
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub(crate) fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    pub fn encode_png(&self) -> EngineResult<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_signature() {
        let mut pixmap = Pixmap::new(3, 2).unwrap();
        pixmap.fill(tiny_skia::Color::WHITE);
        let surface = Surface::from_pixmap(pixmap);
        assert_eq!(surface.pixel(2, 1), Some([255, 255, 255, 255]));
        assert_eq!(surface.pixel(3, 0), None);
        let png = surface.encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
