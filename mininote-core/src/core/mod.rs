pub mod content_stream;
pub mod decode;
pub mod document;
pub mod error;
pub mod lexer;
pub mod page;
pub mod parser;
pub mod stream;
pub mod xref;

pub use content_stream::{ContentStreamEvaluator, OpCode, Operation};
pub use decode::ImageCodec;
pub use document::PDFDocument;
pub use error::{PDFError, PDFResult};
pub use lexer::{Lexer, Token};
pub use page::Page;
pub use parser::{Dict, ObjRef, PDFObject, Parser, PdfStream};
pub use stream::Stream;
pub use xref::{XRef, XRefEntry};
