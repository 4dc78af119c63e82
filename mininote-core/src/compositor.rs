//! Merges a rendered page with its ink.
//!
//! A frame is a pure function of the page surface, the stroke list and the
//! viewport. The compositor remembers the previous frame so that appending
//! one stroke redraws only that stroke's rectangle; the result is the same,
//! byte for byte, as a full recomposite.

use crate::config::InkConfig;
use crate::ink::{InkPoint, Stroke, StrokeId};
use crate::surface::Surface;
use std::sync::Arc;
use tiny_skia::{
    FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke as SkiaStroke,
    Transform,
};

/// Pixels added around a stroke's geometric bounds for anti-aliasing.
const DIRTY_PADDING: f32 = 2.0;

/// Which page is shown and at what scale (surface pixels per page point).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub page: usize,
    pub scale: f64,
}

impl Viewport {
    pub fn new(page: usize, scale: f64) -> Self {
        Viewport { page, scale }
    }
}

/// A pixel rectangle of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DirtyRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub surface: Arc<Surface>,
    /// Region that changed since the previous frame; `None` if nothing did
    pub dirty: Option<DirtyRect>,
    pub full_redraw: bool,
}

/// Width multiplier for a pressure in 0..=1.
pub fn pressure_factor(pressure: f32, min_factor: f32) -> f32 {
    min_factor + (1.0 - min_factor) * pressure.clamp(0.0, 1.0)
}

fn unpack_rgba(color: u32) -> [u8; 4] {
    color.to_be_bytes()
}

/// Pixel area a stroke can touch at `scale`, clipped to the surface.
pub fn stroke_dirty_rect(
    stroke: &Stroke,
    scale: f64,
    min_factor: f32,
    surface_width: u32,
    surface_height: u32,
) -> Option<DirtyRect> {
    let [x0, y0, x1, y1] = stroke.bounds()?;
    let scale = scale as f32;
    let max_pressure = stroke.points().iter().map(|p| p.pressure).fold(0.0f32, f32::max);
    let half = stroke.width() * pressure_factor(max_pressure, min_factor) * scale / 2.0 + DIRTY_PADDING;

    let left = (x0 * scale - half).floor().max(0.0);
    let top = (y0 * scale - half).floor().max(0.0);
    let right = (x1 * scale + half).ceil().min(surface_width as f32);
    let bottom = (y1 * scale + half).ceil().min(surface_height as f32);
    if !(right > left && bottom > top) {
        return None;
    }
    Some(DirtyRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Renders one stroke opaque into a scratch pixmap covering `rect`.
fn rasterize_stroke(stroke: &Stroke, scale: f32, min_factor: f32, rect: &DirtyRect) -> Option<Pixmap> {
    let mut scratch = Pixmap::new(rect.width, rect.height)?;
    let [r, g, b, _] = unpack_rgba(stroke.color());
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, 255);
    paint.anti_alias = true;

    let transform = Transform::from_translate(-(rect.x as f32), -(rect.y as f32)).pre_scale(scale, scale);
    let width_at = |pressure: f32| stroke.width() * pressure_factor(pressure, min_factor);

    let dot = |scratch: &mut Pixmap, p: &InkPoint, pressure: f32| {
        if let Some(circle) = PathBuilder::from_circle(p.x, p.y, width_at(pressure) / 2.0) {
            scratch.fill_path(&circle, &paint, FillRule::Winding, transform, None);
        }
    };

    match stroke.points() {
        [] => return None,
        [p] => dot(&mut scratch, p, p.pressure),
        points => {
            for pair in points.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let pressure = (a.pressure + b.pressure) / 2.0;
                if a.x == b.x && a.y == b.y {
                    dot(&mut scratch, a, pressure);
                    continue;
                }
                let mut builder = PathBuilder::new();
                builder.move_to(a.x, a.y);
                builder.line_to(b.x, b.y);
                let Some(path) = builder.finish() else {
                    continue;
                };
                let segment = SkiaStroke {
                    width: width_at(pressure),
                    line_cap: LineCap::Round,
                    line_join: LineJoin::Round,
                    ..SkiaStroke::default()
                };
                scratch.stroke_path(&path, &paint, &segment, transform, None);
            }
        }
    }
    Some(scratch)
}

/// Draws `stroke` onto `target` with source-over alpha; returns the area touched.
pub fn draw_stroke(target: &mut Pixmap, stroke: &Stroke, scale: f64, min_factor: f32) -> Option<DirtyRect> {
    let rect = stroke_dirty_rect(stroke, scale, min_factor, target.width(), target.height())?;
    let alpha = unpack_rgba(stroke.color())[3];
    if alpha == 0 {
        return None;
    }
    let scratch = rasterize_stroke(stroke, scale as f32, min_factor, &rect)?;
    let paint = PixmapPaint {
        opacity: f32::from(alpha) / 255.0,
        ..PixmapPaint::default()
    };
    target.draw_pixmap(
        rect.x as i32,
        rect.y as i32,
        scratch.as_ref(),
        &paint,
        Transform::identity(),
        None,
    );
    Some(rect)
}

/// Full recomposite: the page surface with every stroke drawn in order.
pub fn compose(page_surface: &Surface, strokes: &[Stroke], viewport: Viewport, min_factor: f32) -> Surface {
    let mut frame = page_surface.clone();
    for stroke in strokes {
        draw_stroke(frame.pixmap_mut(), stroke, viewport.scale, min_factor);
    }
    frame
}

struct LastFrame {
    viewport: Viewport,
    page_surface: Arc<Surface>,
    strokes: Vec<StrokeId>,
    frame: Arc<Surface>,
}

/// Produces frames, redrawing incrementally when possible.
pub struct Compositor {
    min_pressure_factor: f32,
    last: Option<LastFrame>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("min_pressure_factor", &self.min_pressure_factor)
            .field("has_previous_frame", &self.last.is_some())
            .finish()
    }
}

impl Compositor {
    pub fn new(config: &InkConfig) -> Self {
        Compositor {
            min_pressure_factor: config.min_pressure_factor,
            last: None,
        }
    }

    pub fn min_pressure_factor(&self) -> f32 {
        self.min_pressure_factor
    }

    /// Forgets the previous frame; the next one is a full redraw.
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    pub fn frame(&mut self, page_surface: &Arc<Surface>, strokes: &[Stroke], viewport: Viewport) -> FrameOutput {
        let ids: Vec<StrokeId> = strokes.iter().map(Stroke::id).collect();

        if let Some(last) = &self.last {
            let same_base = last.viewport == viewport && Arc::ptr_eq(&last.page_surface, page_surface);
            if same_base && last.strokes == ids {
                return FrameOutput {
                    surface: Arc::clone(&last.frame),
                    dirty: None,
                    full_redraw: false,
                };
            }
            let one_appended = ids.len() == last.strokes.len() + 1 && ids.starts_with(&last.strokes);
            if same_base && one_appended {
                if let Some(stroke) = strokes.last() {
                    let mut frame = (*last.frame).clone();
                    let dirty = draw_stroke(frame.pixmap_mut(), stroke, viewport.scale, self.min_pressure_factor);
                    log::trace!("partial redraw of page {}: {:?}", viewport.page, dirty);
                    return self.remember(viewport, page_surface, ids, frame, dirty, false);
                }
            }
        }

        log::trace!("full redraw of page {} with {} strokes", viewport.page, strokes.len());
        let frame = compose(page_surface, strokes, viewport, self.min_pressure_factor);
        let whole = DirtyRect {
            x: 0,
            y: 0,
            width: frame.width(),
            height: frame.height(),
        };
        self.remember(viewport, page_surface, ids, frame, Some(whole), true)
    }

    fn remember(
        &mut self,
        viewport: Viewport,
        page_surface: &Arc<Surface>,
        strokes: Vec<StrokeId>,
        frame: Surface,
        dirty: Option<DirtyRect>,
        full_redraw: bool,
    ) -> FrameOutput {
        let frame = Arc::new(frame);
        self.last = Some(LastFrame {
            viewport,
            page_surface: Arc::clone(page_surface),
            strokes,
            frame: Arc::clone(&frame),
        });
        FrameOutput {
            surface: frame,
            dirty,
            full_redraw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ink::StrokeStyle;

    fn white(width: u32, height: u32) -> Arc<Surface> {
        let mut pixmap = Pixmap::new(width, height).unwrap();
        pixmap.fill(tiny_skia::Color::WHITE);
        Arc::new(Surface::from_pixmap(pixmap))
    }

    fn line(points: &[(f32, f32)], color: u32, width: f32) -> Stroke {
        let points = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| InkPoint::new(x, y, 1.0, i as u32))
            .collect();
        Stroke::new(points, StrokeStyle::new(color, width))
    }

    #[test]
    fn test_pressure_factor() {
        assert_eq!(pressure_factor(0.0, 0.25), 0.25);
        assert_eq!(pressure_factor(1.0, 0.25), 1.0);
        assert_eq!(pressure_factor(0.5, 0.0), 0.5);
        assert_eq!(pressure_factor(7.0, 0.25), 1.0);
    }

    #[test]
    fn test_partial_redraw_matches_full() {
        let page = white(64, 64);
        let viewport = Viewport::new(0, 2.0);
        let mut strokes = vec![line(&[(2.0, 2.0), (30.0, 30.0)], 0xFF00_0080, 3.0)];
        let mut compositor = Compositor::new(&InkConfig::default());
        let first = compositor.frame(&page, &strokes, viewport);
        assert!(first.full_redraw);

        strokes.push(line(&[(30.0, 2.0), (2.0, 30.0), (16.0, 16.0)], 0x0000_FFC0, 4.0));
        let partial = compositor.frame(&page, &strokes, viewport);
        assert!(!partial.full_redraw);
        let dirty = partial.dirty.unwrap();
        assert!(dirty.width < 64 * 2 || dirty.height < 64 * 2);

        let full = compose(&page, &strokes, viewport, InkConfig::default().min_pressure_factor);
        assert_eq!(partial.surface.data(), full.data());
    }

    #[test]
    fn test_later_strokes_occlude() {
        let page = white(40, 40);
        let viewport = Viewport::new(0, 1.0);
        let red = line(&[(0.0, 20.0), (40.0, 20.0)], 0xFF00_00FF, 6.0);
        let blue = line(&[(20.0, 0.0), (20.0, 40.0)], 0x0000_FFFF, 6.0);
        let frame = compose(&page, &[red, blue], viewport, 0.25);
        assert_eq!(frame.pixel(20, 20), Some([0, 0, 255, 255]));
        assert_eq!(frame.pixel(5, 20), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_single_point_draws_dot() {
        let page = white(20, 20);
        let dot = line(&[(10.0, 10.0)], 0x0000_00FF, 6.0);
        let frame = compose(&page, &[dot], Viewport::new(0, 1.0), 0.25);
        assert_eq!(frame.pixel(10, 10), Some([0, 0, 0, 255]));
        assert_eq!(frame.pixel(1, 1), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_unchanged_inputs_reuse_frame() {
        let page = white(16, 16);
        let strokes = vec![line(&[(1.0, 1.0), (8.0, 8.0)], 0x0000_00FF, 1.0)];
        let mut compositor = Compositor::new(&InkConfig::default());
        let a = compositor.frame(&page, &strokes, Viewport::new(0, 1.0));
        let b = compositor.frame(&page, &strokes, Viewport::new(0, 1.0));
        assert!(Arc::ptr_eq(&a.surface, &b.surface));
        assert_eq!(b.dirty, None);
    }

    #[test]
    fn test_removal_or_scale_change_forces_full_redraw() {
        let page = white(16, 16);
        let a = line(&[(1.0, 1.0), (8.0, 8.0)], 0x0000_00FF, 1.0);
        let b = line(&[(8.0, 1.0), (1.0, 8.0)], 0x0000_00FF, 1.0);
        let mut compositor = Compositor::new(&InkConfig::default());
        compositor.frame(&page, &[a.clone(), b.clone()], Viewport::new(0, 1.0));
        assert!(compositor.frame(&page, &[a.clone()], Viewport::new(0, 1.0)).full_redraw);
        assert!(!compositor.frame(&page, &[a.clone(), b], Viewport::new(0, 1.0)).full_redraw);
        let other = white(16, 16);
        assert!(compositor.frame(&other, &[a], Viewport::new(0, 1.0)).full_redraw);
    }

    #[test]
    fn test_dirty_rect_clipped_to_surface() {
        let stroke = line(&[(-10.0, -10.0), (5.0, 5.0)], 0x0000_00FF, 2.0);
        let rect = stroke_dirty_rect(&stroke, 1.0, 0.25, 8, 8).unwrap();
        assert_eq!((rect.x, rect.y), (0, 0));
        assert!(rect.width <= 8 && rect.height <= 8);
        let outside = line(&[(100.0, 100.0)], 0x0000_00FF, 2.0);
        assert_eq!(stroke_dirty_rect(&outside, 1.0, 0.25, 8, 8), None);
    }
}
