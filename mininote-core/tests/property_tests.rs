//! Property-based tests for persistence and robustness.
//!
//! These tests use proptest to generate random ink and random bytes.


use mininote_core::container::{self, MAGIC};
use mininote_core::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use test_utils::*;

/// Strokes whose timestamps never decrease, as capture produces them.
fn stroke() -> impl Strategy<Value = Stroke> {
    let sample = (-1000.0f32..1000.0, -1000.0f32..1000.0, 0.0f32..=1.0, 0u32..500);
    (prop::collection::vec(sample, 1..12), any::<u32>(), 0.1f32..40.0).prop_map(|(samples, color, width)| {
        let mut timestamp = 0u32;
        let points = samples
            .into_iter()
            .map(|(x, y, pressure, step)| {
                timestamp += step;
                InkPoint::new(x, y, pressure, timestamp)
            })
            .collect();
        Stroke::new(points, StrokeStyle::new(color, width))
    })
}

fn ink_pages(max_page: usize) -> impl Strategy<Value = BTreeMap<usize, Vec<Stroke>>> {
    prop::collection::btree_map(0..max_page, prop::collection::vec(stroke(), 1..4), 0..4)
}

// ============================================================================
// Round trips
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: load(save(load(pdf) + ink)) keeps pages, PDF bytes and ink
    #[test]
    fn prop_save_load_round_trip(pages in ink_pages(3)) {
        let pdf = blank_pdf(3);
        let loaded = load(pdf.clone(), usize::MAX).unwrap();
        let ink = InkLayer::from_pages(pages.clone(), usize::MAX);

        let bytes = save(&loaded.document, &ink).unwrap();
        let reloaded = load(bytes, usize::MAX).unwrap();

        prop_assert!(reloaded.from_container);
        prop_assert_eq!(reloaded.document.page_count(), 3);
        prop_assert_eq!(&reloaded.document.bytes()[..], &pdf[..]);
        prop_assert_eq!(reloaded.ink.pages(), &pages);
    }

    /// Property: container bytes are a pure function of PDF and ink
    #[test]
    fn prop_encoding_is_stable(pages in ink_pages(8), pdf in prop::collection::vec(any::<u8>(), 0..64)) {
        let first = container::encode(&pdf, &pages);
        let decoded = container::decode(&first).unwrap();
        prop_assert_eq!(container::encode(&decoded.pdf, &decoded.pages), first);
    }

    /// Property: saving fails exactly when ink lies beyond the last page
    #[test]
    fn prop_stale_pages_fail_to_save(pages in ink_pages(6)) {
        let loaded = load(blank_pdf(3), usize::MAX).unwrap();
        let ink = InkLayer::from_pages(pages.clone(), usize::MAX);
        let result = save(&loaded.document, &ink);
        match pages.range(3..).next() {
            Some((&page, strokes)) => {
                prop_assert_eq!(
                    result.unwrap_err(),
                    EncodeError::PageOutOfRange { page, page_count: 3, strokes: strokes.len() }
                );
            }
            None => prop_assert!(result.is_ok()),
        }
    }
}

// ============================================================================
// Malformed input never panics
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = load(bytes.clone(), usize::MAX);
        let _ = container::decode(&bytes);
    }

    #[test]
    fn prop_random_container_bodies_never_panic(body in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut bytes = MAGIC.to_vec();
        bytes.push(container::VERSION);
        bytes.extend_from_slice(&body);
        let _ = load(bytes, usize::MAX);
    }

    #[test]
    fn prop_random_pdf_bodies_never_panic(body in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.extend_from_slice(&body);
        if let Ok(document) = PDFDocument::open(bytes) {
            let mut renderer = PageRenderer::new(&RenderConfig::default());
            for page in 0..document.page_count().min(2) {
                let _ = renderer.render(&document, page, 0.25);
            }
        }
    }

    /// Property: every strict prefix of a valid container is rejected
    #[test]
    fn prop_truncated_containers_fail(pages in ink_pages(2), cut in any::<prop::sample::Index>()) {
        let bytes = container::encode(b"%PDF-1.4 tiny", &pages);
        let len = cut.index(bytes.len());
        prop_assert!(container::decode(&bytes[..len]).is_err());
    }

    /// Property: flipping one byte of a PDF never panics the renderer
    #[test]
    fn prop_corrupted_pdf_never_panics(index in any::<prop::sample::Index>(), value in any::<u8>()) {
        let mut bytes = build_pdf(&[PageSpec::with_content(50.0, 50.0, "1 0 0 rg 5 5 20 20 re f 0 0 1 RG 10 10 m 40 40 l S")]);
        let at = index.index(bytes.len());
        bytes[at] = value;
        if let Ok(document) = PDFDocument::open(bytes) {
            let mut renderer = PageRenderer::new(&RenderConfig::default());
            let _ = renderer.render(&document, 0, 1.0);
        }
    }
}
