//! Page rendering with a bounded surface cache.

use crate::config::RenderConfig;
use crate::core::document::PDFDocument;
use crate::error::DecodeError;
use crate::rendering;
use crate::surface::Surface;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;

/// Validates a render request and returns the surface size in pixels.
pub fn surface_size(
    document: &PDFDocument,
    page: usize,
    scale: f64,
    max_surface_pixels: u64,
) -> Result<(u32, u32), DecodeError> {
    let page_count = document.page_count();
    let Some(info) = document.page(page) else {
        return Err(DecodeError::PageOutOfRange { page, page_count });
    };
    if !scale.is_finite() || scale <= 0.0 {
        return Err(DecodeError::InvalidScale { page, scale });
    }
    let (width, height) = info.size();
    let (w, h) = ((width * scale).ceil(), (height * scale).ceil());
    let too_large = |w: f64, h: f64| DecodeError::SurfaceTooLarge {
        page,
        scale,
        width: w as u64,
        height: h as u64,
        limit: max_surface_pixels,
    };
    if w > f64::from(u32::MAX) || h > f64::from(u32::MAX) || w * h > max_surface_pixels as f64 {
        return Err(too_large(w, h));
    }
    Ok((w.max(1.0) as u32, h.max(1.0) as u32))
}

/// Renders a page without touching any cache.
///
/// The surface is white where the page draws nothing.
pub fn render_surface(
    document: &PDFDocument,
    page: usize,
    scale: f64,
    max_surface_pixels: u64,
) -> Result<Surface, DecodeError> {
    surface_size(document, page, scale, max_surface_pixels)?;
    let info = document
        .page(page)
        .ok_or(DecodeError::PageOutOfRange { page, page_count: document.page_count() })?;
    let pixmap = rendering::render_page(document.xref(), info, scale)?;
    Ok(Surface::from_pixmap(pixmap))
}

#[derive(Debug, Clone)]
struct CachedSurface {
    scale: f64,
    surface: Arc<Surface>,
}

/// Renders pages and keeps recent surfaces in an LRU keyed by page index.
///
/// Capacity follows the visible range: visible pages plus `margin` on each
/// side.
pub struct PageRenderer {
    cache: LruCache<usize, CachedSurface>,
    visible: Range<usize>,
    margin: usize,
    scale_threshold: f64,
    max_surface_pixels: u64,
}

impl std::fmt::Debug for PageRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRenderer")
            .field("cached", &self.cache.len())
            .field("capacity", &self.cache.cap())
            .field("visible", &self.visible)
            .finish()
    }
}

fn capacity_for(visible: &Range<usize>, margin: usize) -> NonZeroUsize {
    let pages = visible.end.saturating_sub(visible.start).max(1);
    NonZeroUsize::new(pages + 2 * margin).unwrap_or(NonZeroUsize::MIN)
}

impl PageRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        let visible = 0..1;
        PageRenderer {
            cache: LruCache::new(capacity_for(&visible, config.visible_margin)),
            visible,
            margin: config.visible_margin,
            scale_threshold: config.scale_threshold,
            max_surface_pixels: config.max_surface_pixels,
        }
    }

    pub fn max_surface_pixels(&self) -> u64 {
        self.max_surface_pixels
    }

    /// Returns the surface of `page` at `scale`, rendering it if needed.
    ///
    /// Nothing is cached when rendering fails.
    pub fn render(
        &mut self,
        document: &PDFDocument,
        page: usize,
        scale: f64,
    ) -> Result<Arc<Surface>, DecodeError> {
        surface_size(document, page, scale, self.max_surface_pixels)?;
        if let Some(surface) = self.cached(page, scale) {
            log::trace!("surface cache hit for page {} at {}", page, scale);
            return Ok(surface);
        }

        log::debug!("rendering page {} at scale {}", page, scale);
        let surface = Arc::new(render_surface(document, page, scale, self.max_surface_pixels)?);
        self.install(page, scale, Arc::clone(&surface));
        Ok(surface)
    }

    /// A cached surface usable for `scale`, promoting it in the LRU.
    ///
    /// A surface outside the threshold is dropped.
    pub fn cached(&mut self, page: usize, scale: f64) -> Option<Arc<Surface>> {
        let threshold = self.scale_threshold;
        let entry = self.cache.get(&page)?;
        if (entry.scale - scale).abs() <= threshold * scale {
            return Some(Arc::clone(&entry.surface));
        }
        log::debug!(
            "page {} cached at scale {}, requested {}: invalidating",
            page,
            entry.scale,
            scale
        );
        self.cache.pop(&page);
        None
    }

    /// Scale of the cached surface for `page`, without promoting it.
    pub fn cached_scale(&self, page: usize) -> Option<f64> {
        self.cache.peek(&page).map(|entry| entry.scale)
    }

    /// Stores a surface rendered elsewhere, replacing any previous one.
    pub fn install(&mut self, page: usize, scale: f64, surface: Arc<Surface>) {
        if let Some((evicted, _)) = self.cache.push(page, CachedSurface { scale, surface }) {
            if evicted != page {
                log::trace!("evicted surface of page {}", evicted);
            }
        }
    }

    pub fn is_cached(&self, page: usize) -> bool {
        self.cache.contains(&page)
    }

    pub fn cached_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.cache.iter().map(|(page, _)| *page).collect();
        pages.sort_unstable();
        pages
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Pages worth keeping: the visible range widened by the margin.
    pub fn retained_range(&self) -> Range<usize> {
        self.visible.start.saturating_sub(self.margin)..self.visible.end.saturating_add(self.margin)
    }

    /// Updates the visible pages, resizing the cache and releasing
    /// surfaces of pages that are neither visible nor adjacent.
    pub fn set_visible(&mut self, visible: Range<usize>) {
        self.visible = visible;
        self.cache.resize(capacity_for(&self.visible, self.margin));
        let keep = self.retained_range();
        let stale: Vec<usize> = self
            .cache
            .iter()
            .map(|(page, _)| *page)
            .filter(|page| !keep.contains(page))
            .collect();
        for page in stale {
            log::trace!("releasing surface of page {}", page);
            self.cache.pop(&page);
        }
    }

    pub fn release(&mut self, page: usize) -> bool {
        self.cache.pop(&page).is_some()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
