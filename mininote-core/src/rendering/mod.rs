//! PDF rendering layer.
//!
//! Content streams are interpreted by a [`RenderingContext`] that drives a
//! [`Device`]:
//! - [`SkiaDevice`] rasterizes with tiny-skia
//! - [`TestDevice`] records calls, for tests

pub mod context;
pub mod device;
pub mod graphics_state;
pub mod image;
pub mod skia_device;

pub use context::{MAX_FORM_DEPTH, RenderingContext, page_transform};
pub use device::{Device, ImageData, Paint, PathDrawMode, TestDevice};
pub use graphics_state::{
    Color, ColorSpace, FillRule, GraphicsState, LineCap, LineJoin, Matrix, StrokeProps,
};
pub use image::decode_image;
pub use skia_device::SkiaDevice;

use crate::core::error::PDFResult;
use crate::core::page::Page;
use crate::core::xref::XRef;

/// Renders one page at `scale` onto a new white pixmap.
///
/// The pixmap is `ceil(width * scale) x ceil(height * scale)` where width and
/// height are the page's displayed size.
pub fn render_page(xref: &XRef, page: &Page, scale: f64) -> PDFResult<tiny_skia::Pixmap> {
    let (width, height) = page.size();
    let pixel_width = (width * scale).ceil().max(1.0) as u32;
    let pixel_height = (height * scale).ceil().max(1.0) as u32;
    let device = SkiaDevice::new(pixel_width, pixel_height)?;
    let ctm = page_transform(page.view_box(), page.rotate(), scale);

    let content = page.content_data(xref)?;
    let mut context = RenderingContext::new(device, xref, page.resources().clone(), ctm);
    context.render_content(&content)?;
    Ok(context.into_device().into_pixmap())
}
