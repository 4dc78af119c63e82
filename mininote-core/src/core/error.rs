use thiserror::Error;

/// Error type for the PDF syntax layer.
///
/// These cover everything that can go wrong between raw bytes and a resolved
/// page tree. Engine-level code wraps them into [`crate::DecodeError::Pdf`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PDFError {
    /// End of stream reached unexpectedly
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Invalid byte range requested
    #[error("invalid byte range: {begin}..{end}")]
    InvalidByteRange { begin: usize, end: usize },

    /// Malformed syntax at a byte offset
    #[error("syntax error at offset {pos}: {message}")]
    Syntax { pos: usize, message: String },

    /// The file does not start with a `%PDF-` header
    #[error("missing %PDF- header")]
    MissingHeader,

    /// An indirect object could not be located
    #[error("object {num} {generation} R not found")]
    MissingObject { num: u32, generation: u32 },

    /// Cross-reference data is unusable
    #[error("xref error: {0}")]
    XRef(String),

    /// A stream filter failed or is unsupported
    #[error("filter {filter} failed: {message}")]
    Filter { filter: String, message: String },

    /// Structural problem in the document (catalog, page tree, ...)
    #[error("invalid document structure: {0}")]
    Structure(String),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl PDFError {
    pub(crate) fn syntax(pos: usize, message: impl Into<String>) -> Self {
        PDFError::Syntax {
            pos,
            message: message.into(),
        }
    }

    pub(crate) fn filter(filter: &str, message: impl Into<String>) -> Self {
        PDFError::Filter {
            filter: filter.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for PDF operations
pub type PDFResult<T> = Result<T, PDFError>;
