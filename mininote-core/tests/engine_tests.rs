//! End-to-end tests for the engine: rendering, ink, compositing and
//! persistence working together.


use mininote_core::compositor::compose;
use mininote_core::*;
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;

fn store() -> DocumentStore {
    DocumentStore::new(EngineConfig::default()).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_three_page_stroke_survives_save_and_reload() {
    let original = blank_pdf(3);
    let mut store = store();
    store.open(original.clone()).unwrap();

    let points = line_points(5, 100.0);
    let ink = store.ink_mut().unwrap();
    let handle = ink.begin_stroke(1, points[0], StrokeStyle::new(0x2040_80FF, 2.5));
    for point in &points[1..] {
        ink.append_point(handle, *point).unwrap();
    }
    ink.end_stroke(handle).unwrap();
    assert!(store.is_dirty());

    let saved = store.save().unwrap();
    assert!(!store.is_dirty());

    let mut reloaded = DocumentStore::new(EngineConfig::default()).unwrap();
    reloaded.open(saved).unwrap();
    assert_eq!(reloaded.page_count().unwrap(), 3);
    assert_eq!(&reloaded.document().unwrap().bytes()[..], &original[..]);

    let ink = reloaded.ink().unwrap();
    assert!(ink.strokes(0).is_empty());
    assert!(ink.strokes(2).is_empty());
    assert_eq!(ink.strokes(1).len(), 1);
    assert_eq!(ink.strokes(1)[0].points(), &points[..]);
    assert_eq!(ink.strokes(1)[0].color(), 0x2040_80FF);
}

#[test]
fn test_render_past_last_page_fails_and_caches_nothing() {
    let document = PDFDocument::open(blank_pdf(3)).unwrap();
    let mut renderer = PageRenderer::new(&RenderConfig::default());
    let err = renderer.render(&document, 5, 1.0).unwrap_err();
    assert!(matches!(err, DecodeError::PageOutOfRange { page: 5, page_count: 3 }));
    assert!(renderer.cached_pages().is_empty());
}

#[test]
fn test_save_with_ink_beyond_last_page_fails() {
    let mut store = store();
    store.open(blank_pdf(2)).unwrap();
    store.ink_mut().unwrap().add_stroke(7, line_stroke(2, 50.0, 0x0000_00FF)).unwrap();
    let err = store.save().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Encode(EncodeError::PageOutOfRange { page: 7, page_count: 2, strokes: 1 })
    ));
}

// ============================================================================
// Ink contracts
// ============================================================================

#[test]
fn test_end_stroke_returns_input_points() {
    let mut ink = InkLayer::default();
    let points = line_points(40, 20.0);
    let handle = ink.begin_stroke(0, points[0], StrokeStyle::new(0xFF00_00FF, 1.0));
    for point in &points[1..] {
        ink.append_point(handle, *point).unwrap();
    }
    let stroke = ink.end_stroke(handle).unwrap();
    assert_eq!(stroke.points(), &points[..]);
    assert!(matches!(ink.end_stroke(handle), Err(EngineError::InvalidHandle { .. })));
    assert!(matches!(
        ink.append_point(handle, points[0]),
        Err(EngineError::InvalidHandle { .. })
    ));
}

#[test]
fn test_out_of_order_point_leaves_stroke_unchanged() {
    let mut ink = InkLayer::default();
    let handle = ink.begin_stroke(2, InkPoint::new(0.0, 0.0, 0.5, 100), StrokeStyle::new(0, 1.0));
    ink.append_point(handle, InkPoint::new(1.0, 0.0, 0.5, 120)).unwrap();
    let err = ink.append_point(handle, InkPoint::new(2.0, 0.0, 0.5, 110)).unwrap_err();
    assert!(matches!(err, EngineError::Ordering { page: 2, previous: 120, offending: 110 }));
    let stroke = ink.end_stroke(handle).unwrap();
    assert_eq!(stroke.points().len(), 2);
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_render_is_deterministic_across_eviction() {
    let pdf = build_pdf(&[
        PageSpec::with_content(100.0, 100.0, "0 0 1 rg 10 10 50 50 re f 1 0 0 RG 4 w 0 0 m 100 100 l S"),
        PageSpec::blank(100.0, 100.0),
        PageSpec::blank(100.0, 100.0),
    ]);
    let document = PDFDocument::open(pdf).unwrap();
    let mut renderer = PageRenderer::new(&RenderConfig::default());
    let first = renderer.render(&document, 0, 1.5).unwrap();

    renderer.set_visible(2..3);
    assert!(!renderer.is_cached(0));
    let second = renderer.render(&document, 0, 1.5).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.data(), second.data());
}

#[test]
fn test_fill_lands_top_down() {
    // PDF y=10..30 is 70..90 from the top of a 100pt page
    let pdf = build_pdf(&[PageSpec::with_content(100.0, 100.0, "1 0 0 rg 10 10 30 20 re f")]);
    let document = PDFDocument::open(pdf).unwrap();
    let mut renderer = PageRenderer::new(&RenderConfig::default());
    let surface = renderer.render(&document, 0, 1.0).unwrap();
    assert_eq!((surface.width(), surface.height()), (100, 100));
    assert_eq!(surface.pixel(20, 80), Some([255, 0, 0, 255]));
    assert_eq!(surface.pixel(20, 20), Some([255, 255, 255, 255]));
}

#[test]
fn test_rotated_page_dimensions() {
    let mut page = PageSpec::blank(200.0, 100.0);
    page.rotate = Some(90);
    let document = PDFDocument::open(build_pdf(&[page])).unwrap();
    let mut renderer = PageRenderer::new(&RenderConfig::default());
    let surface = renderer.render(&document, 0, 1.0).unwrap();
    assert_eq!((surface.width(), surface.height()), (100, 200));
}

// ============================================================================
// Compositing
// ============================================================================

#[test]
fn test_frame_overlays_ink_on_page() {
    let pdf = build_pdf(&[PageSpec::with_content(100.0, 100.0, "0 1 0 rg 0 0 100 50 re f")]);
    let mut store = store();
    store.open(pdf).unwrap();
    store.ink_mut().unwrap().add_stroke(
        0,
        Stroke::new(
            vec![InkPoint::new(10.0, 75.0, 1.0, 0), InkPoint::new(90.0, 75.0, 1.0, 10)],
            StrokeStyle::new(0x0000_FFFF, 6.0),
        ),
    ).unwrap();
    let frame = store.frame(0, 2.0).unwrap();
    assert_eq!(frame.surface.pixel(100, 150), Some([0, 0, 255, 255]));
    assert_eq!(frame.surface.pixel(100, 180), Some([0, 255, 0, 255]));
    assert_eq!(frame.surface.pixel(100, 40), Some([255, 255, 255, 255]));
}

#[test]
fn test_incremental_frames_match_full_recomposite() {
    let mut store = store();
    store.open(build_pdf(&[PageSpec::with_content(120.0, 80.0, "0.8 g 0 0 60 80 re f")])).unwrap();
    store.frame(0, 1.25).unwrap();

    let colors = [0xFF00_0080, 0x00AA_00FF, 0x0000_FF40, 0x1010_10C0];
    for (i, color) in colors.into_iter().enumerate() {
        let stroke = line_stroke(6, 10.0 + 12.0 * i as f32, color);
        store.ink_mut().unwrap().add_stroke(0, stroke).unwrap();
        let frame = store.frame(0, 1.25).unwrap();
        assert!(!frame.full_redraw, "stroke {} should redraw partially", i);

        let page = store.render(0, 1.25).unwrap();
        let strokes = store.ink().unwrap().strokes(0).to_vec();
        let full = compose(&page, &strokes, Viewport::new(0, 1.25), 0.25);
        assert_eq!(frame.surface.data(), full.data(), "mismatch after stroke {}", i);
    }
}

#[test]
fn test_erasing_forces_full_redraw() {
    let mut store = store();
    store.open(blank_pdf(1)).unwrap();
    store.ink_mut().unwrap().add_stroke(0, line_stroke(3, 50.0, 0x0000_00FF)).unwrap();
    store.ink_mut().unwrap().add_stroke(0, line_stroke(3, 90.0, 0x0000_00FF)).unwrap();
    store.frame(0, 0.5).unwrap();
    assert!(store.erase_at(0, 20.0, 90.0, 2.0).unwrap().is_some());
    let frame = store.frame(0, 0.5).unwrap();
    assert!(frame.full_redraw);
    assert_eq!(store.ink().unwrap().stroke_count(0), 1);
}

// ============================================================================
// Background rendering
// ============================================================================

#[test]
fn test_cancelled_render_never_delivers() {
    let document = Arc::new(PDFDocument::open(blank_pdf(4)).unwrap());
    let mut renderer = PageRenderer::new(&RenderConfig::default());
    let mut scheduler = RenderScheduler::new(&RenderConfig::default()).unwrap();

    let cancelled = scheduler.schedule(Arc::clone(&document), 3, 1.0);
    assert!(scheduler.cancel(3));
    let kept = scheduler.schedule(Arc::clone(&document), 0, 1.0);

    let mut results = scheduler.wait_idle(&mut renderer, Duration::from_secs(10));
    std::thread::sleep(Duration::from_millis(50));
    results.extend(scheduler.poll(&mut renderer));

    for result in &results {
        if result.id == cancelled {
            assert!(matches!(result.outcome, RenderOutcome::Cancelled));
        }
        if result.id == kept {
            assert!(matches!(result.outcome, RenderOutcome::Rendered(_)));
        }
    }
    assert!(results.iter().any(|r| r.id == kept));
    assert!(!renderer.is_cached(3));
    assert!(renderer.is_cached(0));
}

#[test]
fn test_store_replaced_document_discards_pending_renders() {
    let mut store = store();
    store.open(blank_pdf(3)).unwrap();
    store.request_render(1, 1.0).unwrap();
    store.open(blank_pdf(2)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    for result in store.wait_idle(Duration::from_secs(5)) {
        assert!(matches!(result.outcome, RenderOutcome::Cancelled));
    }
    assert!(!store.renderer().is_cached(1));
}
