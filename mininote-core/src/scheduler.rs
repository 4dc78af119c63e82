//! Background page rendering.
//!
//! Worker threads pull jobs from a shared flume queue and send results back
//! on a response channel. The owner applies results with
//! [`RenderScheduler::poll`], which installs finished surfaces into a
//! [`PageRenderer`] in one step. Each job carries a cancellation token;
//! cancelled jobs never deliver a surface.

use crate::config::RenderConfig;
use crate::core::document::PDFDocument;
use crate::error::{DecodeError, EngineError, EngineResult};
use crate::renderer::{PageRenderer, render_surface};
use crate::surface::Surface;
use flume::{Receiver, Sender};
use rustc_hash::FxHashMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Identifies one scheduled render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

struct RenderJob {
    id: JobId,
    document: Arc<PDFDocument>,
    page: usize,
    scale: f64,
    max_surface_pixels: u64,
    cancel: Arc<AtomicBool>,
}

enum Request {
    Render(RenderJob),
    Shutdown,
}

/// How a job ended.
#[derive(Debug)]
pub enum RenderOutcome {
    Rendered(Arc<Surface>),
    Cancelled,
    Failed(DecodeError),
}

#[derive(Debug)]
pub struct RenderResult {
    pub id: JobId,
    pub page: usize,
    pub scale: f64,
    pub outcome: RenderOutcome,
}

struct PendingJob {
    id: JobId,
    cancel: Arc<AtomicBool>,
}

/// A pool of render workers with per-page cancellation.
pub struct RenderScheduler {
    request_tx: Sender<Request>,
    response_rx: Receiver<RenderResult>,
    workers: Vec<JoinHandle<()>>,
    pending: FxHashMap<usize, PendingJob>,
    next_id: u64,
    margin: usize,
    max_surface_pixels: u64,
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("workers", &self.workers.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn render_worker(requests: Receiver<Request>, responses: Sender<RenderResult>) {
    while let Ok(request) = requests.recv() {
        let job = match request {
            Request::Render(job) => job,
            Request::Shutdown => break,
        };
        let outcome = if job.cancel.load(Ordering::Acquire) {
            RenderOutcome::Cancelled
        } else {
            match render_surface(&job.document, job.page, job.scale, job.max_surface_pixels) {
                // A job cancelled while rendering still reports Cancelled
                Ok(_) if job.cancel.load(Ordering::Acquire) => RenderOutcome::Cancelled,
                Ok(surface) => RenderOutcome::Rendered(Arc::new(surface)),
                Err(e) => RenderOutcome::Failed(e),
            }
        };
        let result = RenderResult {
            id: job.id,
            page: job.page,
            scale: job.scale,
            outcome,
        };
        if responses.send(result).is_err() {
            break;
        }
    }
}

impl RenderScheduler {
    pub fn new(config: &RenderConfig) -> EngineResult<Self> {
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for i in 0..config.workers.max(1) {
            let rx = request_rx.clone();
            let tx = response_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("mininote-render-{}", i))
                .spawn(move || render_worker(rx, tx))
                .map_err(EngineError::Io)?;
            workers.push(handle);
        }
        log::debug!("started {} render workers", workers.len());

        Ok(RenderScheduler {
            request_tx,
            response_rx,
            workers,
            pending: FxHashMap::default(),
            next_id: 1,
            margin: config.visible_margin,
            max_surface_pixels: config.max_surface_pixels,
        })
    }

    /// Queues a render of `page`, cancelling any job already pending for it.
    pub fn schedule(&mut self, document: Arc<PDFDocument>, page: usize, scale: f64) -> JobId {
        self.cancel(page);
        let id = JobId(self.next_id);
        self.next_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        self.pending.insert(
            page,
            PendingJob {
                id,
                cancel: Arc::clone(&cancel),
            },
        );
        let job = RenderJob {
            id,
            document,
            page,
            scale,
            max_surface_pixels: self.max_surface_pixels,
            cancel,
        };
        if self.request_tx.send(Request::Render(job)).is_err() {
            log::warn!("render workers are gone, page {} will not render", page);
        }
        log::trace!("scheduled {:?} for page {} at {}", id, page, scale);
        id
    }

    /// Cancels the pending job for `page`, if any.
    pub fn cancel(&mut self, page: usize) -> bool {
        match self.pending.remove(&page) {
            Some(job) => {
                job.cancel.store(true, Ordering::Release);
                log::trace!("cancelled {:?} for page {}", job.id, page);
                true
            }
            None => false,
        }
    }

    /// Cancels pending jobs for pages outside `visible` widened by the margin.
    pub fn set_visible(&mut self, visible: Range<usize>) {
        let keep = visible.start.saturating_sub(self.margin)..visible.end.saturating_add(self.margin);
        let outside: Vec<usize> = self
            .pending
            .keys()
            .copied()
            .filter(|page| !keep.contains(page))
            .collect();
        for page in outside {
            self.cancel(page);
        }
    }

    /// Cancels everything; used when the document is replaced.
    pub fn reset(&mut self) {
        let pages: Vec<usize> = self.pending.keys().copied().collect();
        for page in pages {
            self.cancel(page);
        }
        // Results already queued belong to the old document
        while self.response_rx.try_recv().is_ok() {}
    }

    pub fn pending_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.pending.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn is_pending(&self, page: usize) -> bool {
        self.pending.contains_key(&page)
    }

    /// Applies finished jobs without blocking.
    ///
    /// Surfaces of current jobs are installed into `renderer`. Results of
    /// cancelled or superseded jobs come back as [`RenderOutcome::Cancelled`].
    pub fn poll(&mut self, renderer: &mut PageRenderer) -> Vec<RenderResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.response_rx.try_recv() {
            results.push(self.apply(result, renderer));
        }
        results
    }

    /// Waits up to `timeout` for every pending job to finish, applying
    /// results as they arrive.
    pub fn wait_idle(&mut self, renderer: &mut PageRenderer, timeout: Duration) -> Vec<RenderResult> {
        let deadline = Instant::now() + timeout;
        let mut results = self.poll(renderer);
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(result) => results.push(self.apply(result, renderer)),
                Err(_) => break,
            }
        }
        results
    }

    fn apply(&mut self, mut result: RenderResult, renderer: &mut PageRenderer) -> RenderResult {
        let current = self.pending.get(&result.page).is_some_and(|job| job.id == result.id);
        if !current {
            result.outcome = RenderOutcome::Cancelled;
            return result;
        }
        self.pending.remove(&result.page);
        match &result.outcome {
            RenderOutcome::Rendered(surface) => {
                renderer.install(result.page, result.scale, Arc::clone(surface));
            }
            RenderOutcome::Failed(e) => log::warn!("background render of page {} failed: {}", result.page, e),
            RenderOutcome::Cancelled => {}
        }
        result
    }

    /// Stops the workers and waits for them to exit.
    pub fn shutdown(&mut self) {
        self.reset();
        for _ in 0..self.workers.len() {
            let _ = self.request_tx.send(Request::Shutdown);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("render worker panicked");
            }
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(pages: usize) -> Arc<PDFDocument> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!("<< /Type /Pages /Kids [{}] /Count {} /MediaBox [0 0 30 30] >>", kids.join(" "), pages),
        ];
        objects.extend((0..pages).map(|_| "<< /Type /Page /Parent 2 0 R >>".to_string()));
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        Arc::new(PDFDocument::open(out).unwrap())
    }

    #[test]
    fn test_background_render_installs_surface() {
        let config = RenderConfig::default();
        let mut scheduler = RenderScheduler::new(&config).unwrap();
        let mut renderer = PageRenderer::new(&config);
        let doc = document(2);

        let id = scheduler.schedule(Arc::clone(&doc), 1, 2.0);
        let results = scheduler.wait_idle(&mut renderer, Duration::from_secs(10));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert!(matches!(results[0].outcome, RenderOutcome::Rendered(_)));
        assert_eq!(renderer.cached_scale(1), Some(2.0));
        assert!(scheduler.pending_pages().is_empty());
    }

    #[test]
    fn test_cancelled_job_never_delivers() {
        let config = RenderConfig::default();
        let mut scheduler = RenderScheduler::new(&config).unwrap();
        let mut renderer = PageRenderer::new(&config);
        let doc = document(1);

        let first = scheduler.schedule(Arc::clone(&doc), 0, 1.0);
        assert!(scheduler.cancel(0));
        // The cancelled job's result, if any, is discarded
        std::thread::sleep(Duration::from_millis(50));
        for result in scheduler.poll(&mut renderer) {
            assert_eq!(result.id, first);
            assert!(matches!(result.outcome, RenderOutcome::Cancelled));
        }
        assert!(!renderer.is_cached(0));
    }

    #[test]
    fn test_rescheduling_supersedes_pending_job() {
        let config = RenderConfig::default();
        let mut scheduler = RenderScheduler::new(&config).unwrap();
        let mut renderer = PageRenderer::new(&config);
        let doc = document(1);

        let old = scheduler.schedule(Arc::clone(&doc), 0, 1.0);
        let new = scheduler.schedule(Arc::clone(&doc), 0, 3.0);
        let results = scheduler.wait_idle(&mut renderer, Duration::from_secs(10));
        std::thread::sleep(Duration::from_millis(50));
        let late = scheduler.poll(&mut renderer);
        for result in results.iter().chain(late.iter()) {
            if result.id == old {
                assert!(matches!(result.outcome, RenderOutcome::Cancelled));
            }
        }
        assert!(results.iter().any(|r| r.id == new));
        assert_eq!(renderer.cached_scale(0), Some(3.0));
    }

    #[test]
    fn test_visible_window_cancels_far_pages() {
        let config = RenderConfig {
            workers: 1,
            ..RenderConfig::default()
        };
        let mut scheduler = RenderScheduler::new(&config).unwrap();
        let doc = document(6);
        for page in 0..6 {
            scheduler.schedule(Arc::clone(&doc), page, 1.0);
        }
        scheduler.set_visible(0..1);
        for page in scheduler.pending_pages() {
            assert!(page <= 1);
        }
    }

    #[test]
    fn test_failed_render_reports_error() {
        let config = RenderConfig::default();
        let mut scheduler = RenderScheduler::new(&config).unwrap();
        let mut renderer = PageRenderer::new(&config);
        let doc = document(1);
        scheduler.schedule(doc, 4, 1.0);
        let results = scheduler.wait_idle(&mut renderer, Duration::from_secs(10));
        assert!(matches!(
            results[0].outcome,
            RenderOutcome::Failed(DecodeError::PageOutOfRange { page: 4, page_count: 1 })
        ));
        assert!(renderer.cached_pages().is_empty());
    }
}
