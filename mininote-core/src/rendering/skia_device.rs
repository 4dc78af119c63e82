//! A tiny-skia based rendering device.

use super::device::{Device, ImageData, Paint, PathDrawMode};
use super::graphics_state::{FillRule, LineCap, LineJoin, Matrix, StrokeProps};
use crate::core::error::{PDFError, PDFResult};
use std::sync::Arc;
use tiny_skia::{
    FillRule as SkiaFillRule, FilterQuality, IntSize, LineCap as SkiaLineCap,
    LineJoin as SkiaLineJoin, Mask, Paint as SkiaPaint, Path, PathBuilder, Pixmap, PixmapPaint,
    Stroke, StrokeDash, Transform,
};

// --- Conversion helpers ---

fn to_skia_paint(paint: &Paint) -> SkiaPaint<'static> {
    let [r, g, b, a] = paint.to_rgba8();
    let mut sk_paint = SkiaPaint::default();
    sk_paint.set_color_rgba8(r, g, b, a);
    sk_paint.anti_alias = true;
    sk_paint
}

fn to_skia_line_cap(line_cap: LineCap) -> SkiaLineCap {
    match line_cap {
        LineCap::Butt => SkiaLineCap::Butt,
        LineCap::Round => SkiaLineCap::Round,
        LineCap::ProjectingSquare => SkiaLineCap::Square,
    }
}

fn to_skia_line_join(line_join: LineJoin) -> SkiaLineJoin {
    match line_join {
        LineJoin::Miter => SkiaLineJoin::Miter,
        LineJoin::Round => SkiaLineJoin::Round,
        LineJoin::Bevel => SkiaLineJoin::Bevel,
    }
}

fn to_skia_fill_rule(fill_rule: FillRule) -> SkiaFillRule {
    match fill_rule {
        FillRule::NonZero => SkiaFillRule::Winding,
        FillRule::EvenOdd => SkiaFillRule::EvenOdd,
    }
}

fn to_skia_dash(props: &StrokeProps) -> Option<StrokeDash> {
    if props.dash_array.is_empty() {
        return None;
    }
    let mut intervals: Vec<f32> = props.dash_array.iter().map(|d| *d as f32).collect();
    // An odd-length pattern repeats to become even
    if intervals.len() % 2 == 1 {
        intervals.extend_from_within(..);
    }
    StrokeDash::new(intervals, props.dash_offset as f32)
}

fn to_skia_stroke(props: &StrokeProps) -> Stroke {
    Stroke {
        width: props.line_width as f32,
        miter_limit: props.miter_limit as f32,
        line_cap: to_skia_line_cap(props.line_cap),
        line_join: to_skia_line_join(props.line_join),
        dash: to_skia_dash(props),
    }
}

pub(crate) fn to_skia_transform(m: &Matrix) -> Transform {
    Transform::from_row(
        m[0] as f32,
        m[1] as f32,
        m[2] as f32,
        m[3] as f32,
        m[4] as f32,
        m[5] as f32,
    )
}

/// Premultiplies straight RGBA in place.
pub(crate) fn premultiply(rgba: &mut [u8]) {
    for pixel in rgba.chunks_exact_mut(4) {
        let a = u16::from(pixel[3]);
        if a == 255 {
            continue;
        }
        for c in &mut pixel[..3] {
            *c = ((u16::from(*c) * a + 127) / 255) as u8;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Close,
}

/// Rasterizes onto an owned [`Pixmap`].
pub struct SkiaDevice {
    pixmap: Pixmap,
    transform: Transform,
    /// Clip mask per saved state; `None` means unclipped
    clip_stack: Vec<Option<Arc<Mask>>>,
    segments: Vec<Segment>,
}

impl std::fmt::Debug for SkiaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkiaDevice")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .field("depth", &self.clip_stack.len())
            .finish()
    }
}

impl SkiaDevice {
    /// Creates a device over a white pixmap.
    pub fn new(width: u32, height: u32) -> PDFResult<Self> {
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| PDFError::Generic(format!("cannot allocate a {}x{} pixmap", width, height)))?;
        pixmap.fill(tiny_skia::Color::WHITE);
        Ok(SkiaDevice {
            pixmap,
            transform: Transform::identity(),
            clip_stack: vec![None],
            segments: Vec::new(),
        })
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }

    fn clip(&self) -> Option<&Mask> {
        self.clip_stack.last().and_then(|c| c.as_deref())
    }

    fn build_path(&self) -> Option<Path> {
        let mut builder = PathBuilder::new();
        for segment in &self.segments {
            match *segment {
                Segment::MoveTo(x, y) => builder.move_to(x, y),
                Segment::LineTo(x, y) => builder.line_to(x, y),
                Segment::CurveTo(x1, y1, x2, y2, x, y) => builder.cubic_to(x1, y1, x2, y2, x, y),
                Segment::Close => builder.close(),
            }
        }
        builder.finish()
    }
}

impl Device for SkiaDevice {
    fn begin_path(&mut self) {
        self.segments.clear();
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.segments.push(Segment::MoveTo(x as f32, y as f32));
    }

    fn line_to(&mut self, x: f64, y: f64) {
        self.segments.push(Segment::LineTo(x as f32, y as f32));
    }

    fn curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        self.segments.push(Segment::CurveTo(
            cp1x as f32,
            cp1y as f32,
            cp2x as f32,
            cp2y as f32,
            x as f32,
            y as f32,
        ));
    }

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        // Same winding as the PDF `re` operator
        let (x0, y0) = (x as f32, y as f32);
        let (x1, y1) = ((x + width) as f32, (y + height) as f32);
        self.segments.extend_from_slice(&[
            Segment::MoveTo(x0, y0),
            Segment::LineTo(x1, y0),
            Segment::LineTo(x1, y1),
            Segment::LineTo(x0, y1),
            Segment::Close,
        ]);
    }

    fn close_path(&mut self) {
        self.segments.push(Segment::Close);
    }

    fn draw_path(
        &mut self,
        mode: PathDrawMode,
        paint: &Paint,
        stroke_paint: &Paint,
        stroke_props: &StrokeProps,
    ) -> PDFResult<()> {
        let Some(path) = self.build_path() else {
            return Ok(());
        };
        let transform = self.transform;
        let clip = self.clip_stack.last().cloned().flatten();
        let clip = clip.as_deref();

        match mode {
            PathDrawMode::Fill(rule) => {
                self.pixmap
                    .fill_path(&path, &to_skia_paint(paint), to_skia_fill_rule(rule), transform, clip);
            }
            PathDrawMode::Stroke => {
                self.pixmap
                    .stroke_path(&path, &to_skia_paint(paint), &to_skia_stroke(stroke_props), transform, clip);
            }
            PathDrawMode::FillStroke(rule) => {
                self.pixmap
                    .fill_path(&path, &to_skia_paint(paint), to_skia_fill_rule(rule), transform, clip);
                self.pixmap.stroke_path(
                    &path,
                    &to_skia_paint(stroke_paint),
                    &to_skia_stroke(stroke_props),
                    transform,
                    clip,
                );
            }
        }
        Ok(())
    }

    fn clip_path(&mut self, rule: FillRule) -> PDFResult<()> {
        let (width, height) = (self.pixmap.width(), self.pixmap.height());
        let mut mask = Mask::new(width, height)
            .ok_or_else(|| PDFError::Generic(format!("cannot allocate a {}x{} clip mask", width, height)))?;
        // An empty path clips everything away
        if let Some(path) = self.build_path() {
            mask.fill_path(&path, to_skia_fill_rule(rule), true, self.transform);
        }
        if let Some(previous) = self.clip() {
            for (value, old) in mask.data_mut().iter_mut().zip(previous.data()) {
                *value = ((u16::from(*value) * u16::from(*old) + 127) / 255) as u8;
            }
        }
        if let Some(top) = self.clip_stack.last_mut() {
            *top = Some(Arc::new(mask));
        }
        Ok(())
    }

    fn save_state(&mut self) {
        let current = self.clip_stack.last().cloned().flatten();
        self.clip_stack.push(current);
    }

    fn restore_state(&mut self) {
        if self.clip_stack.len() > 1 {
            self.clip_stack.pop();
        }
    }

    fn set_transform(&mut self, matrix: &Matrix) {
        self.transform = to_skia_transform(matrix);
    }

    fn draw_image(&mut self, image: &ImageData, alpha: f64) -> PDFResult<()> {
        let size = IntSize::from_wh(image.width, image.height)
            .ok_or_else(|| PDFError::Generic("empty image".into()))?;
        let mut data = image.rgba.clone();
        premultiply(&mut data);
        let image_pixmap = Pixmap::from_vec(data, size)
            .ok_or_else(|| PDFError::Generic("image data does not match its size".into()))?;

        // Image space (pixels, top row first) to the unit square, y up
        let unit = Transform::from_row(
            1.0 / image.width as f32,
            0.0,
            0.0,
            -1.0 / image.height as f32,
            0.0,
            1.0,
        );
        let paint = PixmapPaint {
            opacity: alpha.clamp(0.0, 1.0) as f32,
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let transform = self.transform.pre_concat(unit);
        let clip = self.clip_stack.last().cloned().flatten();
        self.pixmap
            .draw_pixmap(0, 0, image_pixmap.as_ref(), &paint, transform, clip.as_deref());
        Ok(())
    }

    fn page_bounds(&self) -> (f64, f64) {
        (f64::from(self.pixmap.width()), f64::from(self.pixmap.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::graphics_state::Color;

    fn pixel(device: &SkiaDevice, x: u32, y: u32) -> [u8; 4] {
        let p = device.pixmap().pixel(x, y).unwrap();
        [p.red(), p.green(), p.blue(), p.alpha()]
    }

    #[test]
    fn test_new_device_is_white() {
        let device = SkiaDevice::new(4, 4).unwrap();
        assert_eq!(pixel(&device, 2, 2), [255, 255, 255, 255]);
    }

    #[test]
    fn test_fill_rect() {
        let mut device = SkiaDevice::new(20, 20).unwrap();
        device.rect(5.0, 5.0, 10.0, 10.0);
        device
            .draw_path(
                PathDrawMode::Fill(FillRule::NonZero),
                &Paint::new(Color::RGB(1.0, 0.0, 0.0), 1.0),
                &Paint::black(),
                &StrokeProps::default(),
            )
            .unwrap();
        assert_eq!(pixel(&device, 10, 10), [255, 0, 0, 255]);
        assert_eq!(pixel(&device, 1, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn test_clip_limits_painting_and_restores() {
        let mut device = SkiaDevice::new(20, 20).unwrap();
        let black = Paint::black();
        let props = StrokeProps::default();

        device.save_state();
        device.rect(0.0, 0.0, 10.0, 20.0);
        device.clip_path(FillRule::NonZero).unwrap();
        device.begin_path();
        device.rect(0.0, 0.0, 20.0, 20.0);
        device
            .draw_path(PathDrawMode::Fill(FillRule::NonZero), &black, &black, &props)
            .unwrap();
        assert_eq!(pixel(&device, 5, 5), [0, 0, 0, 255]);
        assert_eq!(pixel(&device, 15, 5), [255, 255, 255, 255]);

        device.restore_state();
        device
            .draw_path(PathDrawMode::Fill(FillRule::NonZero), &black, &black, &props)
            .unwrap();
        assert_eq!(pixel(&device, 15, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn test_draw_image_fills_unit_square() {
        let mut device = SkiaDevice::new(10, 10).unwrap();
        // Unit square scaled to the whole device, y flipped
        device.set_transform(&[10.0, 0.0, 0.0, -10.0, 0.0, 10.0]);
        let image = ImageData {
            width: 1,
            height: 2,
            rgba: vec![255, 0, 0, 255, 0, 0, 255, 255],
        };
        device.draw_image(&image, 1.0).unwrap();
        // First row of the image lands at the top
        assert_eq!(pixel(&device, 5, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(&device, 5, 8), [0, 0, 255, 255]);
    }

    #[test]
    fn test_premultiply() {
        let mut data = vec![255, 128, 0, 128, 10, 20, 30, 255];
        premultiply(&mut data);
        assert_eq!(data, vec![128, 64, 0, 128, 10, 20, 30, 255]);
    }
}
