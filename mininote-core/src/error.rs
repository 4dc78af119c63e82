//! Engine error types.

use crate::core::error::PDFError;
use thiserror::Error;

/// Failure to turn bytes into a document, or a page into a surface.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The PDF itself is malformed or unsupported
    #[error("invalid PDF: {0}")]
    Pdf(#[from] PDFError),

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("invalid render scale {scale} for page {page}")]
    InvalidScale { page: usize, scale: f64 },

    #[error("page {page} at scale {scale} needs {width}x{height} pixels, limit is {limit}")]
    SurfaceTooLarge {
        page: usize,
        scale: f64,
        width: u64,
        height: u64,
        limit: u64,
    },

    /// The MiniNote container is malformed
    #[error("invalid container at byte {offset}: {message}")]
    Container { offset: usize, message: String },

    /// Ink in a container refers to a page the embedded PDF lacks
    #[error("container has ink for page {page} but the document has {page_count} pages")]
    InkPageOutOfRange { page: usize, page_count: usize },
}

/// Failure to produce a container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{strokes} stroke(s) on page {page}, but the document has {page_count} pages")]
    PageOutOfRange {
        page: usize,
        page_count: usize,
        strokes: usize,
    },
}

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The stroke handle is unknown or already finalized
    #[error("invalid stroke handle {handle}")]
    InvalidHandle { handle: u64 },

    /// A point went back in time
    #[error("point on page {page} has timestamp {offending} ms, earlier than {previous} ms")]
    Ordering {
        page: usize,
        previous: u32,
        offending: u32,
    },

    #[error("no stroke {index} on page {page}")]
    StrokeNotFound { page: usize, index: usize },

    #[error("cannot {operation} while the store is {state}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PDFError> for EngineError {
    fn from(e: PDFError) -> Self {
        EngineError::Decode(DecodeError::Pdf(e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let e = EngineError::from(DecodeError::PageOutOfRange { page: 5, page_count: 3 });
        assert_eq!(e.to_string(), "page 5 out of range (document has 3 pages)");

        let e = EngineError::Ordering {
            page: 1,
            previous: 20,
            offending: 10,
        };
        assert!(e.to_string().contains("page 1"));

        let e: EngineError = EncodeError::PageOutOfRange {
            page: 7,
            page_count: 3,
            strokes: 2,
        }
        .into();
        assert_eq!(e.to_string(), "2 stroke(s) on page 7, but the document has 3 pages");
    }

    #[test]
    fn test_pdf_errors_become_decode_errors() {
        let e: EngineError = PDFError::MissingHeader.into();
        assert!(matches!(e, EngineError::Decode(DecodeError::Pdf(PDFError::MissingHeader))));
    }
}
