//! Device trait for rendering backend abstraction.
//!
//! The [`RenderingContext`](super::RenderingContext) interprets content
//! streams and forwards paths, clips and images to a `Device`, so the
//! interpretation logic stays independent of the rasterizer.

use super::graphics_state::{Color, FillRule, Matrix, StrokeProps};
use crate::core::error::PDFResult;

/// How to draw a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDrawMode {
    Fill(FillRule),
    Stroke,
    /// Fill with the first paint, then stroke with the second
    FillStroke(FillRule),
}

/// Solid paint with constant alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
    pub alpha: f64,
}

impl Paint {
    pub fn new(color: Color, alpha: f64) -> Self {
        Paint { color, alpha }
    }

    pub fn black() -> Self {
        Paint::new(Color::black(), 1.0)
    }

    /// RGBA bytes, not premultiplied.
    pub fn to_rgba8(&self) -> [u8; 4] {
        let [r, g, b] = self.color.to_rgb8();
        [r, g, b, (self.alpha.clamp(0.0, 1.0) * 255.0).round() as u8]
    }
}

impl Default for Paint {
    fn default() -> Self {
        Paint::black()
    }
}

/// Decoded image pixels, 8-bit RGBA, not premultiplied, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A rendering backend.
///
/// Path coordinates are in user space; the device applies the matrix set
/// with [`Device::set_transform`]. Images occupy the unit square of user
/// space, top row at `y = 1`, as in PDF.
pub trait Device {
    /// Begin a new path.
    fn begin_path(&mut self);

    fn move_to(&mut self, x: f64, y: f64);

    fn line_to(&mut self, x: f64, y: f64);

    fn curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64);

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64);

    fn close_path(&mut self);

    /// Paints the current path. The path stays current until the next
    /// [`Device::begin_path`].
    ///
    /// `stroke_paint` is only used for [`PathDrawMode::FillStroke`].
    fn draw_path(
        &mut self,
        mode: PathDrawMode,
        paint: &Paint,
        stroke_paint: &Paint,
        stroke_props: &StrokeProps,
    ) -> PDFResult<()>;

    /// Intersects the clip region with the current path.
    fn clip_path(&mut self, rule: FillRule) -> PDFResult<()>;

    /// Pushes the clip region.
    fn save_state(&mut self);

    /// Pops the clip region.
    fn restore_state(&mut self);

    /// Sets the user-space to device matrix used by subsequent operations.
    fn set_transform(&mut self, matrix: &Matrix);

    fn draw_image(&mut self, image: &ImageData, alpha: f64) -> PDFResult<()>;

    /// Device size in pixels.
    fn page_bounds(&self) -> (f64, f64);
}

/// A device that records calls instead of drawing.
#[derive(Debug, Default)]
pub struct TestDevice {
    width: f64,
    height: f64,
    depth: usize,
    operations: Vec<String>,
}

impl TestDevice {
    pub fn new(width: f64, height: f64) -> Self {
        TestDevice {
            width,
            height,
            depth: 0,
            operations: Vec::new(),
        }
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    /// Current save/restore nesting.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Device for TestDevice {
    fn begin_path(&mut self) {
        self.operations.push("begin_path".to_string());
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.operations.push(format!("move_to({},{})", x, y));
    }

    fn line_to(&mut self, x: f64, y: f64) {
        self.operations.push(format!("line_to({},{})", x, y));
    }

    fn curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        self.operations.push(format!(
            "curve_to({},{},{},{},{},{})",
            cp1x, cp1y, cp2x, cp2y, x, y
        ));
    }

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.operations
            .push(format!("rect({},{},{},{})", x, y, width, height));
    }

    fn close_path(&mut self) {
        self.operations.push("close_path".to_string());
    }

    fn draw_path(
        &mut self,
        mode: PathDrawMode,
        paint: &Paint,
        _stroke_paint: &Paint,
        stroke_props: &StrokeProps,
    ) -> PDFResult<()> {
        let [r, g, b, a] = paint.to_rgba8();
        let op = match mode {
            PathDrawMode::Fill(rule) => format!("fill({:?}, #{:02x}{:02x}{:02x}{:02x})", rule, r, g, b, a),
            PathDrawMode::Stroke => format!(
                "stroke(#{:02x}{:02x}{:02x}{:02x}, w={})",
                r, g, b, a, stroke_props.line_width
            ),
            PathDrawMode::FillStroke(rule) => format!("fill_stroke({:?})", rule),
        };
        self.operations.push(op);
        Ok(())
    }

    fn clip_path(&mut self, rule: FillRule) -> PDFResult<()> {
        self.operations.push(format!("clip({:?})", rule));
        Ok(())
    }

    fn save_state(&mut self) {
        self.depth += 1;
        self.operations.push("save".to_string());
    }

    fn restore_state(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.operations.push("restore".to_string());
    }

    fn set_transform(&mut self, matrix: &Matrix) {
        self.operations.push(format!("transform({:?})", matrix));
    }

    fn draw_image(&mut self, image: &ImageData, alpha: f64) -> PDFResult<()> {
        self.operations
            .push(format!("image({}x{}, alpha={})", image.width, image.height, alpha));
        Ok(())
    }

    fn page_bounds(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}
