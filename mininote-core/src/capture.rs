//! Pointer input to ink strokes.

use crate::config::{CaptureConfig, CapturePolicy, InkConfig};
use crate::error::EngineResult;
use crate::ink::{InkLayer, InkPoint, Stroke, StrokeHandle, StrokeStyle};
use rustc_hash::FxHashMap;

/// Pressure used for pointers that do not report any.
pub const DEFAULT_PRESSURE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Stylus,
    Touch,
    Mouse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

/// One sample from a pointing device, already mapped to page space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u64,
    pub kind: PointerKind,
    pub phase: PointerPhase,
    pub page: usize,
    pub x: f32,
    pub y: f32,
    pub pressure: Option<f32>,
    pub timestamp: u32,
}

impl PointerEvent {
    fn point(&self) -> InkPoint {
        InkPoint::new(self.x, self.y, self.pressure.unwrap_or(DEFAULT_PRESSURE), self.timestamp)
    }
}

/// Tracks one in-progress stroke per pointer.
#[derive(Debug)]
pub struct InkCapture {
    policy: CapturePolicy,
    style: StrokeStyle,
    active: FxHashMap<u64, StrokeHandle>,
}

impl InkCapture {
    pub fn new(capture: &CaptureConfig, ink: &InkConfig) -> Self {
        InkCapture {
            policy: capture.policy,
            style: StrokeStyle::new(ink.default_color, ink.default_width),
            active: FxHashMap::default(),
        }
    }

    pub fn style(&self) -> StrokeStyle {
        self.style
    }

    /// Style for strokes begun after this call.
    pub fn set_style(&mut self, style: StrokeStyle) {
        self.style = style;
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: CapturePolicy) {
        self.policy = policy;
    }

    pub fn is_capturing(&self, pointer_id: u64) -> bool {
        self.active.contains_key(&pointer_id)
    }

    fn accepts(&self, kind: PointerKind) -> bool {
        match self.policy {
            CapturePolicy::AnyInput => true,
            CapturePolicy::StylusOnly => kind == PointerKind::Stylus,
        }
    }

    /// Feeds one event to `layer`. Returns the stroke finished by an `Up`.
    ///
    /// Events for pointers with no stroke in progress (other than `Down`) are
    /// ignored. A `Move` or `Up` whose timestamp precedes the stroke's last
    /// point fails with [`EngineError::Ordering`](crate::error::EngineError)
    /// and leaves the stroke as it was, still in progress.
    pub fn handle(&mut self, layer: &mut InkLayer, event: &PointerEvent) -> EngineResult<Option<Stroke>> {
        match event.phase {
            PointerPhase::Down => {
                if !self.accepts(event.kind) {
                    log::trace!("ignoring {:?} pointer {}", event.kind, event.pointer_id);
                    return Ok(None);
                }
                if let Some(previous) = self.active.remove(&event.pointer_id) {
                    log::debug!("pointer {} pressed again, dropping its open stroke", event.pointer_id);
                    layer.cancel_stroke(previous)?;
                }
                let handle = layer.begin_stroke(event.page, event.point(), self.style);
                self.active.insert(event.pointer_id, handle);
                Ok(None)
            }
            PointerPhase::Move => {
                if let Some(&handle) = self.active.get(&event.pointer_id) {
                    layer.append_point(handle, event.point())?;
                }
                Ok(None)
            }
            PointerPhase::Up => {
                let Some(&handle) = self.active.get(&event.pointer_id) else {
                    return Ok(None);
                };
                // A rejected final sample leaves the stroke open for a later Up or Cancel.
                layer.append_point(handle, event.point())?;
                self.active.remove(&event.pointer_id);
                layer.end_stroke(handle).map(Some)
            }
            PointerPhase::Cancel => {
                if let Some(handle) = self.active.remove(&event.pointer_id) {
                    layer.cancel_stroke(handle)?;
                }
                Ok(None)
            }
        }
    }

    /// Discards every stroke in progress.
    pub fn cancel_all(&mut self, layer: &mut InkLayer) {
        for (_, handle) in self.active.drain() {
            // Handles become invalid when the layer is replaced.
            let _ = layer.cancel_stroke(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn event(id: u64, kind: PointerKind, phase: PointerPhase, x: f32, t: u32) -> PointerEvent {
        PointerEvent {
            pointer_id: id,
            kind,
            phase,
            page: 1,
            x,
            y: 10.0,
            pressure: if kind == PointerKind::Stylus { Some(0.8) } else { None },
            timestamp: t,
        }
    }

    fn capture(policy: CapturePolicy) -> InkCapture {
        InkCapture::new(&CaptureConfig { policy }, &InkConfig::default())
    }

    #[test]
    fn test_down_move_up() {
        let mut layer = InkLayer::default();
        let mut cap = capture(CapturePolicy::AnyInput);
        assert!(cap.handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Down, 0.0, 0)).unwrap().is_none());
        cap.handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Move, 1.0, 5)).unwrap();
        let stroke = cap
            .handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Up, 2.0, 9))
            .unwrap()
            .unwrap();
        assert_eq!(stroke.points().len(), 3);
        assert!(stroke.points().iter().all(|p| p.pressure == DEFAULT_PRESSURE));
        assert_eq!(layer.stroke_count(1), 1);
        assert!(!cap.is_capturing(1));
    }

    #[test]
    fn test_cancel_never_reaches_page() {
        let mut layer = InkLayer::default();
        let mut cap = capture(CapturePolicy::AnyInput);
        cap.handle(&mut layer, &event(3, PointerKind::Stylus, PointerPhase::Down, 0.0, 0)).unwrap();
        cap.handle(&mut layer, &event(3, PointerKind::Stylus, PointerPhase::Cancel, 0.0, 1)).unwrap();
        assert!(layer.is_empty());
        assert_eq!(layer.active_strokes(), 0);
    }

    #[test]
    fn test_stylus_only_ignores_fingers() {
        let mut layer = InkLayer::default();
        let mut cap = capture(CapturePolicy::StylusOnly);
        cap.handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Down, 0.0, 0)).unwrap();
        cap.handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Up, 1.0, 1)).unwrap();
        assert!(layer.is_empty());

        cap.handle(&mut layer, &event(2, PointerKind::Stylus, PointerPhase::Down, 0.0, 0)).unwrap();
        let stroke = cap
            .handle(&mut layer, &event(2, PointerKind::Stylus, PointerPhase::Up, 1.0, 1))
            .unwrap()
            .unwrap();
        assert_eq!(stroke.points()[0].pressure, 0.8);
    }

    #[test]
    fn test_two_pointers_interleave() {
        let mut layer = InkLayer::default();
        let mut cap = capture(CapturePolicy::AnyInput);
        cap.handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Down, 0.0, 0)).unwrap();
        cap.handle(&mut layer, &event(2, PointerKind::Touch, PointerPhase::Down, 50.0, 0)).unwrap();
        cap.handle(&mut layer, &event(2, PointerKind::Touch, PointerPhase::Up, 51.0, 2)).unwrap();
        cap.handle(&mut layer, &event(1, PointerKind::Touch, PointerPhase::Up, 1.0, 3)).unwrap();
        let strokes = layer.strokes(1);
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0].points()[0].x, 50.0);
        assert_eq!(strokes[1].points()[0].x, 0.0);
    }

    #[test]
    fn test_ordering_error_propagates() {
        let mut layer = InkLayer::default();
        let mut cap = capture(CapturePolicy::AnyInput);
        cap.handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Down, 0.0, 10)).unwrap();
        let err = cap
            .handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Move, 1.0, 5))
            .unwrap_err();
        assert!(matches!(err, EngineError::Ordering { page: 1, previous: 10, offending: 5 }));
        assert!(cap.is_capturing(1));
    }

    #[test]
    fn test_late_up_keeps_stroke_open() {
        let mut layer = InkLayer::default();
        let mut cap = capture(CapturePolicy::AnyInput);
        cap.handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Down, 0.0, 10)).unwrap();
        cap.handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Move, 1.0, 20)).unwrap();
        cap.handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Move, 2.0, 30)).unwrap();

        let err = cap
            .handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Up, 3.0, 25))
            .unwrap_err();
        assert!(matches!(err, EngineError::Ordering { page: 1, previous: 30, offending: 25 }));
        assert!(cap.is_capturing(1));
        assert_eq!(layer.active_strokes(), 1);
        assert!(layer.is_empty());

        let stroke = cap
            .handle(&mut layer, &event(1, PointerKind::Mouse, PointerPhase::Up, 3.0, 31))
            .unwrap()
            .unwrap();
        let xs: Vec<f32> = stroke.points().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(layer.stroke_count(1), 1);
        assert!(!cap.is_capturing(1));
    }
}
