//! Document ownership, persistence and the per-document state machine.

use crate::capture::{InkCapture, PointerEvent};
use crate::compositor::{Compositor, FrameOutput, Viewport};
use crate::config::EngineConfig;
use crate::container;
use crate::core::document::PDFDocument;
use crate::error::{DecodeError, EncodeError, EngineError, EngineResult};
use crate::ink::{InkLayer, Stroke};
use crate::renderer::PageRenderer;
use crate::scheduler::{JobId, RenderResult, RenderScheduler};
use crate::surface::Surface;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A decoded input file.
#[derive(Debug)]
pub struct Loaded {
    pub document: PDFDocument,
    pub ink: InkLayer,
    /// Whether the input was a container rather than a bare PDF
    pub from_container: bool,
}

/// Decodes a bare PDF or a container.
///
/// Container ink referring to pages the embedded PDF lacks is rejected.
pub fn load(bytes: Vec<u8>, stroke_budget: usize) -> Result<Loaded, DecodeError> {
    if !container::is_container(&bytes) {
        let document = PDFDocument::open(bytes)?;
        return Ok(Loaded {
            document,
            ink: InkLayer::new(stroke_budget),
            from_container: false,
        });
    }

    let decoded = container::decode(&bytes)?;
    let document = PDFDocument::open(decoded.pdf)?;
    let page_count = document.page_count();
    if let Some((&page, _)) = decoded.pages.range(page_count..).next() {
        return Err(DecodeError::InkPageOutOfRange { page, page_count });
    }
    Ok(Loaded {
        document,
        ink: InkLayer::from_pages(decoded.pages, stroke_budget),
        from_container: true,
    })
}

/// Serializes the original PDF bytes with `ink`.
///
/// Fails, naming the first offending page, if any ink lies beyond the
/// document's last page.
pub fn save(document: &PDFDocument, ink: &InkLayer) -> Result<Vec<u8>, EncodeError> {
    let page_count = document.page_count();
    let stale = ink.out_of_range_pages(page_count);
    if let Some(&(page, strokes)) = stale.first() {
        for (page, strokes) in &stale {
            log::warn!("cannot save {} stroke(s) on page {} of {}", strokes, page, page_count);
        }
        return Err(EncodeError::PageOutOfRange {
            page,
            page_count,
            strokes,
        });
    }
    Ok(container::encode(document.bytes(), ink.pages()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Unloaded,
    Loaded,
    Closed,
}

impl StoreState {
    fn name(self) -> &'static str {
        match self {
            StoreState::Unloaded => "unloaded",
            StoreState::Loaded => "loaded",
            StoreState::Closed => "closed",
        }
    }
}

/// Owns one open document with its ink, surfaces and render workers.
///
/// ```no_run
/// use mininote_core::{DocumentStore, EngineConfig};
///
/// let mut store = DocumentStore::new(EngineConfig::default()).unwrap();
/// store.open_file("notes.pdf").unwrap();
/// let frame = store.frame(0, 2.0).unwrap();
/// std::fs::write("page0.png", frame.surface.encode_png().unwrap()).unwrap();
/// ```
pub struct DocumentStore {
    config: EngineConfig,
    state: StoreState,
    document: Option<Arc<PDFDocument>>,
    ink: InkLayer,
    saved_revision: u64,
    capture: InkCapture,
    renderer: PageRenderer,
    compositor: Compositor,
    scheduler: Option<RenderScheduler>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("state", &self.state)
            .field("document", &self.document)
            .field("strokes", &self.ink.total_strokes())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl DocumentStore {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(DocumentStore {
            state: StoreState::Unloaded,
            document: None,
            ink: InkLayer::new(config.ink.stroke_budget_per_page),
            saved_revision: 0,
            capture: InkCapture::new(&config.capture, &config.ink),
            renderer: PageRenderer::new(&config.render),
            compositor: Compositor::new(&config.ink),
            scheduler: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    /// Whether ink changed since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.state == StoreState::Loaded && self.ink.revision() != self.saved_revision
    }

    fn require_loaded(&self, operation: &'static str) -> EngineResult<&Arc<PDFDocument>> {
        match (&self.document, self.state) {
            (Some(document), StoreState::Loaded) => Ok(document),
            (_, state) => Err(EngineError::InvalidState {
                state: state.name(),
                operation,
            }),
        }
    }

    /// Opens a PDF or container, replacing any open document.
    ///
    /// On failure the previously open document stays open.
    pub fn open(&mut self, bytes: Vec<u8>) -> EngineResult<()> {
        if self.state == StoreState::Closed {
            return Err(EngineError::InvalidState {
                state: self.state.name(),
                operation: "open",
            });
        }
        let loaded = load(bytes, self.config.ink.stroke_budget_per_page)?;
        if self.state == StoreState::Loaded {
            log::debug!("replacing open document");
            self.release_document();
        }

        log::info!(
            "opened {} with {} pages and {} strokes",
            if loaded.from_container { "container" } else { "PDF" },
            loaded.document.page_count(),
            loaded.ink.total_strokes()
        );
        self.document = Some(Arc::new(loaded.document));
        self.ink = loaded.ink;
        self.saved_revision = self.ink.revision();
        self.state = StoreState::Loaded;
        Ok(())
    }

    pub fn open_file(&mut self, path: impl AsRef<Path>) -> EngineResult<()> {
        let bytes = std::fs::read(path.as_ref())?;
        self.open(bytes)
    }

    /// Serializes the document and its ink, clearing the dirty flag.
    pub fn save(&mut self) -> EngineResult<Vec<u8>> {
        let document = self.require_loaded("save")?;
        let bytes = save(document, &self.ink)?;
        self.saved_revision = self.ink.revision();
        Ok(bytes)
    }

    pub fn save_file(&mut self, path: impl AsRef<Path>) -> EngineResult<()> {
        let bytes = self.save()?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Drops the document. A closed store accepts no further operations.
    pub fn close(&mut self) -> EngineResult<()> {
        if self.state == StoreState::Closed {
            return Err(EngineError::InvalidState {
                state: self.state.name(),
                operation: "close",
            });
        }
        if self.is_dirty() {
            log::warn!("closing with {} unsaved ink revision(s)", self.ink.revision() - self.saved_revision);
        }
        self.release_document();
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        self.state = StoreState::Closed;
        Ok(())
    }

    fn release_document(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reset();
        }
        self.capture.cancel_all(&mut self.ink);
        self.renderer.clear();
        self.compositor.invalidate();
        self.ink = InkLayer::new(self.config.ink.stroke_budget_per_page);
        self.saved_revision = 0;
        self.document = None;
    }

    pub fn document(&self) -> EngineResult<&Arc<PDFDocument>> {
        self.require_loaded("read the document")
    }

    pub fn page_count(&self) -> EngineResult<usize> {
        Ok(self.require_loaded("count pages")?.page_count())
    }

    pub fn ink(&self) -> EngineResult<&InkLayer> {
        self.require_loaded("read ink")?;
        Ok(&self.ink)
    }

    /// Direct access to the ink layer; changes mark the store dirty.
    pub fn ink_mut(&mut self) -> EngineResult<&mut InkLayer> {
        self.require_loaded("edit ink")?;
        Ok(&mut self.ink)
    }

    pub fn capture(&mut self) -> &mut InkCapture {
        &mut self.capture
    }

    /// Feeds a pointer event to the capture layer.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> EngineResult<Option<Stroke>> {
        self.require_loaded("capture ink")?;
        self.capture.handle(&mut self.ink, event)
    }

    /// Removes the top-most stroke near `(x, y)` on `page`.
    pub fn erase_at(&mut self, page: usize, x: f32, y: f32, tolerance: f32) -> EngineResult<Option<Stroke>> {
        self.require_loaded("erase ink")?;
        match self.ink.hit_test(page, x, y, tolerance) {
            Some(index) => self.ink.remove_stroke(page, index).map(Some),
            None => Ok(None),
        }
    }

    /// Drops ink on pages the document does not have, so that saving succeeds.
    pub fn discard_stale_ink(&mut self) -> EngineResult<Vec<(usize, Vec<Stroke>)>> {
        let page_count = self.require_loaded("discard ink")?.page_count();
        Ok(self.ink.retain_pages(page_count))
    }

    /// The page surface at `scale`, rendered on this thread if not cached.
    pub fn render(&mut self, page: usize, scale: f64) -> EngineResult<Arc<Surface>> {
        let document = Arc::clone(self.require_loaded("render")?);
        Ok(self.renderer.render(&document, page, scale)?)
    }

    /// The page with its ink composited on top.
    ///
    /// Ink is drawn at the scale the page surface was actually rendered at,
    /// which may differ from `scale` within the render scale threshold.
    pub fn frame(&mut self, page: usize, scale: f64) -> EngineResult<FrameOutput> {
        let surface = self.render(page, scale)?;
        let surface_scale = self.renderer.cached_scale(page).unwrap_or(scale);
        let strokes = self.ink.strokes(page);
        Ok(self.compositor.frame(&surface, strokes, Viewport::new(page, surface_scale)))
    }

    pub fn renderer(&self) -> &PageRenderer {
        &self.renderer
    }

    fn scheduler(&mut self) -> EngineResult<&mut RenderScheduler> {
        if self.scheduler.is_none() {
            self.scheduler = Some(RenderScheduler::new(&self.config.render)?);
        }
        self.scheduler.as_mut().ok_or(EngineError::InvalidState {
            state: "loaded",
            operation: "start render workers",
        })
    }

    /// Queues a background render of `page`; collect it with [`Self::poll`].
    pub fn request_render(&mut self, page: usize, scale: f64) -> EngineResult<JobId> {
        let document = Arc::clone(self.require_loaded("render")?);
        Ok(self.scheduler()?.schedule(document, page, scale))
    }

    /// Updates the visible pages, trimming surfaces and pending renders
    /// outside the window.
    pub fn set_visible(&mut self, visible: Range<usize>) -> EngineResult<()> {
        self.require_loaded("set the visible range")?;
        self.renderer.set_visible(visible.clone());
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_visible(visible);
        }
        Ok(())
    }

    /// Installs finished background renders.
    pub fn poll(&mut self) -> Vec<RenderResult> {
        match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.poll(&mut self.renderer),
            None => Vec::new(),
        }
    }

    /// Blocks until every pending render finished or `timeout` elapsed.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<RenderResult> {
        match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.wait_idle(&mut self.renderer, timeout),
            None => Vec::new(),
        }
    }
}
