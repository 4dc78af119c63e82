//! Page-addressable vector ink.
//!
//! Strokes are captured point by point through a [`StrokeHandle`] and, once
//! finalized, appended to their page's list. List order is z-order.

use crate::error::{EngineError, EngineResult};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One sampled point in page space (PDF points, origin top-left, y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InkPoint {
    pub x: f32,
    pub y: f32,
    /// 0.0..=1.0
    pub pressure: f32,
    /// Milliseconds since capture start
    pub timestamp: u32,
}

impl InkPoint {
    pub fn new(x: f32, y: f32, pressure: f32, timestamp: u32) -> Self {
        InkPoint {
            x,
            y,
            pressure,
            timestamp,
        }
    }

    pub(crate) fn clamped(mut self) -> Self {
        self.pressure = if self.pressure.is_nan() { 0.0 } else { self.pressure.clamp(0.0, 1.0) };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    /// `0xRRGGBBAA`
    pub color: u32,
    /// Page units
    pub width: f32,
}

impl StrokeStyle {
    pub fn new(color: u32, width: f32) -> Self {
        StrokeStyle { color, width }
    }
}

/// Process-local identity of a finalized stroke. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrokeId(u64);

static NEXT_STROKE_ID: AtomicU64 = AtomicU64::new(1);

impl StrokeId {
    fn next() -> Self {
        StrokeId(NEXT_STROKE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A finalized stroke. Immutable.
///
/// Equality compares the ink (points, colour, width) and ignores the id.
#[derive(Debug, Clone)]
pub struct Stroke {
    id: StrokeId,
    points: Vec<InkPoint>,
    style: StrokeStyle,
}

impl PartialEq for Stroke {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points && self.style == other.style
    }
}

impl Stroke {
    /// Builds a finalized stroke from already-validated points.
    pub fn new(points: Vec<InkPoint>, style: StrokeStyle) -> Self {
        Stroke {
            id: StrokeId::next(),
            points,
            style,
        }
    }

    pub fn id(&self) -> StrokeId {
        self.id
    }

    pub fn points(&self) -> &[InkPoint] {
        &self.points
    }

    pub fn style(&self) -> StrokeStyle {
        self.style
    }

    pub fn color(&self) -> u32 {
        self.style.color
    }

    pub fn width(&self) -> f32 {
        self.style.width
    }

    /// Page-space bounding box of the centre line: `[x0, y0, x1, y1]`.
    pub fn bounds(&self) -> Option<[f32; 4]> {
        let first = self.points.first()?;
        let mut rect = [first.x, first.y, first.x, first.y];
        for p in &self.points[1..] {
            rect[0] = rect[0].min(p.x);
            rect[1] = rect[1].min(p.y);
            rect[2] = rect[2].max(p.x);
            rect[3] = rect[3].max(p.y);
        }
        Some(rect)
    }

    /// Distance from `(x, y)` to the stroke's centre line.
    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        match self.points.as_slice() {
            [] => f32::INFINITY,
            [p] => (p.x - x).hypot(p.y - y),
            points => points
                .windows(2)
                .map(|w| segment_distance((w[0].x, w[0].y), (w[1].x, w[1].y), (x, y)))
                .fold(f32::INFINITY, f32::min),
        }
    }
}

fn segment_distance(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    (p.0 - cx).hypot(p.1 - cy)
}

/// Index of the first point timestamped earlier than the point before it.
pub fn first_out_of_order(points: &[InkPoint]) -> Option<usize> {
    points
        .windows(2)
        .position(|w| w[1].timestamp < w[0].timestamp)
        .map(|i| i + 1)
}

/// Handle to a stroke being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrokeHandle(u64);

impl StrokeHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct ActiveStroke {
    page: usize,
    points: Vec<InkPoint>,
    style: StrokeStyle,
}

/// Strokes per page, plus the strokes currently being captured.
#[derive(Debug)]
pub struct InkLayer {
    pages: BTreeMap<usize, Vec<Stroke>>,
    active: FxHashMap<u64, ActiveStroke>,
    next_handle: u64,
    stroke_budget: usize,
    revision: u64,
}

impl Default for InkLayer {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl PartialEq for InkLayer {
    /// Compares finalized ink only.
    fn eq(&self, other: &Self) -> bool {
        self.pages == other.pages
    }
}

impl InkLayer {
    /// `stroke_budget` is the per-page count past which a warning is logged.
    pub fn new(stroke_budget: usize) -> Self {
        InkLayer {
            pages: BTreeMap::new(),
            active: FxHashMap::default(),
            next_handle: 1,
            stroke_budget,
            revision: 0,
        }
    }

    /// Builds a layer from finalized strokes. Empty pages are dropped.
    ///
    /// Timestamps are not rechecked; container decoding already rejects
    /// out-of-order strokes.
    pub fn from_pages(pages: BTreeMap<usize, Vec<Stroke>>, stroke_budget: usize) -> Self {
        let mut layer = Self::new(stroke_budget);
        layer.pages = pages.into_iter().filter(|(_, s)| !s.is_empty()).collect();
        for (page, strokes) in &layer.pages {
            layer.warn_if_over_budget(*page, strokes.len());
        }
        layer
    }

    pub fn set_stroke_budget(&mut self, budget: usize) {
        self.stroke_budget = budget;
    }

    /// Starts a stroke on `page` with its first point.
    pub fn begin_stroke(&mut self, page: usize, point: InkPoint, style: StrokeStyle) -> StrokeHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.active.insert(
            handle,
            ActiveStroke {
                page,
                points: vec![point.clamped()],
                style,
            },
        );
        log::trace!("stroke {} started on page {}", handle, page);
        StrokeHandle(handle)
    }

    /// Appends a point to an active stroke.
    ///
    /// Timestamps must not decrease; on error the stroke is unchanged.
    pub fn append_point(&mut self, handle: StrokeHandle, point: InkPoint) -> EngineResult<()> {
        let stroke = self
            .active
            .get_mut(&handle.0)
            .ok_or(EngineError::InvalidHandle { handle: handle.0 })?;
        if let Some(last) = stroke.points.last() {
            if point.timestamp < last.timestamp {
                return Err(EngineError::Ordering {
                    page: stroke.page,
                    previous: last.timestamp,
                    offending: point.timestamp,
                });
            }
        }
        stroke.points.push(point.clamped());
        Ok(())
    }

    /// Finalizes a stroke and appends it to its page.
    pub fn end_stroke(&mut self, handle: StrokeHandle) -> EngineResult<Stroke> {
        let active = self
            .active
            .remove(&handle.0)
            .ok_or(EngineError::InvalidHandle { handle: handle.0 })?;
        let stroke = Stroke::new(active.points, active.style);
        self.push(active.page, stroke.clone());
        Ok(stroke)
    }

    /// Drops an active stroke without adding it to any page.
    pub fn cancel_stroke(&mut self, handle: StrokeHandle) -> EngineResult<()> {
        self.active
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(EngineError::InvalidHandle { handle: handle.0 })
    }

    /// Appends an already finalized stroke to `page`.
    ///
    /// Fails like [`Self::append_point`] if its timestamps ever decrease.
    pub fn add_stroke(&mut self, page: usize, stroke: Stroke) -> EngineResult<()> {
        if let Some(i) = first_out_of_order(stroke.points()) {
            return Err(EngineError::Ordering {
                page,
                previous: stroke.points()[i - 1].timestamp,
                offending: stroke.points()[i].timestamp,
            });
        }
        self.push(page, stroke);
        Ok(())
    }

    fn push(&mut self, page: usize, stroke: Stroke) {
        let strokes = self.pages.entry(page).or_default();
        strokes.push(stroke);
        let count = strokes.len();
        if count == self.stroke_budget.saturating_add(1) {
            self.warn_if_over_budget(page, count);
        }
        self.revision += 1;
    }

    fn warn_if_over_budget(&self, page: usize, count: usize) {
        if count > self.stroke_budget {
            log::warn!(
                "page {} has {} strokes, over the budget of {}",
                page,
                count,
                self.stroke_budget
            );
        }
    }

    /// Strokes of `page` in z-order; empty if the page has none.
    pub fn strokes(&self, page: usize) -> &[Stroke] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stroke_count(&self, page: usize) -> usize {
        self.strokes(page).len()
    }

    pub fn total_strokes(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    /// Pages with at least one stroke, ascending.
    pub fn pages_with_ink(&self) -> Vec<usize> {
        self.pages.keys().copied().collect()
    }

    pub fn pages(&self) -> &BTreeMap<usize, Vec<Stroke>> {
        &self.pages
    }

    pub fn has_ink(&self, page: usize) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn active_strokes(&self) -> usize {
        self.active.len()
    }

    /// Bumped by every change to finalized ink.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Removes a whole stroke.
    pub fn remove_stroke(&mut self, page: usize, index: usize) -> EngineResult<Stroke> {
        let strokes = self
            .pages
            .get_mut(&page)
            .filter(|s| index < s.len())
            .ok_or(EngineError::StrokeNotFound { page, index })?;
        let stroke = strokes.remove(index);
        if strokes.is_empty() {
            self.pages.remove(&page);
        }
        self.revision += 1;
        Ok(stroke)
    }

    /// Index of the top-most stroke within `tolerance` of its edge.
    pub fn hit_test(&self, page: usize, x: f32, y: f32, tolerance: f32) -> Option<usize> {
        self.strokes(page)
            .iter()
            .rposition(|s| s.distance_to(x, y) <= tolerance + s.width() / 2.0)
    }

    pub fn clear_page(&mut self, page: usize) -> Vec<Stroke> {
        match self.pages.remove(&page) {
            Some(strokes) => {
                self.revision += 1;
                strokes
            }
            None => Vec::new(),
        }
    }

    /// Pages at or beyond `page_count` with their stroke counts.
    pub fn out_of_range_pages(&self, page_count: usize) -> Vec<(usize, usize)> {
        self.pages
            .range(page_count..)
            .map(|(page, strokes)| (*page, strokes.len()))
            .collect()
    }

    /// Drops ink on pages at or beyond `page_count`; returns what was dropped.
    pub fn retain_pages(&mut self, page_count: usize) -> Vec<(usize, Vec<Stroke>)> {
        let dropped: Vec<(usize, Vec<Stroke>)> = self.pages.split_off(&page_count).into_iter().collect();
        for (page, strokes) in &dropped {
            log::warn!("dropping {} stroke(s) on page {}", strokes.len(), page);
        }
        if !dropped.is_empty() {
            self.revision += 1;
        }
        dropped
    }
}
