//! # MiniNote core: PDF pages with handwritten ink
//!
//! A document-annotation engine. It renders PDF pages to raster surfaces,
//! stores pressure-tagged vector ink per page, composites the two into frames,
//! and persists ink next to the untouched original PDF bytes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mininote_core::{DocumentStore, EngineConfig, InkPoint, StrokeStyle};
//!
//! let mut store = DocumentStore::new(EngineConfig::default())?;
//! store.open_file("paper.pdf")?;
//!
//! // Draw on page 0
//! let ink = store.ink_mut()?;
//! let stroke = ink.begin_stroke(0, InkPoint::new(72.0, 72.0, 0.6, 0), StrokeStyle::new(0xCC0000FF, 2.0));
//! ink.append_point(stroke, InkPoint::new(144.0, 80.0, 0.9, 16))?;
//! ink.end_stroke(stroke)?;
//!
//! // Page plus ink at 2x
//! let frame = store.frame(0, 2.0)?;
//! std::fs::write("page0.png", frame.surface.encode_png()?)?;
//!
//! // Original PDF plus ink, in a MiniNote container
//! store.save_file("paper.mnk")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! 1. **PDF layer** ([`core`]): lexer, parser, cross-reference table, stream
//!    filters and the page tree
//! 2. **Rendering layer** ([`rendering`]): content-stream interpreter driving a
//!    tiny-skia device
//! 3. **Engine**: [`PageRenderer`] caches page surfaces, [`InkLayer`] holds
//!    strokes, [`Compositor`] merges both, [`DocumentStore`] owns it all and
//!    reads and writes the [`container`] format
//!
//! Background rendering runs on [`RenderScheduler`] worker threads; every
//! other type is meant for a single owning thread.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod container;
pub mod core;
pub mod error;
pub mod ink;
pub mod renderer;
pub mod rendering;
pub mod scheduler;
pub mod store;
pub mod surface;

// Re-export main types for convenience
pub use capture::{InkCapture, PointerEvent, PointerKind, PointerPhase};
pub use compositor::{Compositor, DirtyRect, FrameOutput, Viewport};
pub use config::{CaptureConfig, CapturePolicy, EngineConfig, InkConfig, RenderConfig};
pub use crate::core::{PDFDocument, PDFError, Page};
pub use error::{DecodeError, EncodeError, EngineError, EngineResult};
pub use ink::{InkLayer, InkPoint, Stroke, StrokeHandle, StrokeId, StrokeStyle};
pub use renderer::PageRenderer;
pub use scheduler::{JobId, RenderOutcome, RenderResult, RenderScheduler};
pub use store::{DocumentStore, Loaded, StoreState, load, save};
pub use surface::Surface;

/// A loaded PDF: its bytes and page sequence.
pub type Document = PDFDocument;
