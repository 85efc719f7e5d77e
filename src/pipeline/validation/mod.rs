//! Medical support letter authenticity validator.
//!
//! Pipeline (leaves first): text extraction with OCR fallback → fuzzy catalog
//! matching → per-page stamp location (multi-scale template matching, contour
//! fallback) → keypoint stamp verification → verdict.

pub mod types;
pub mod normalize;
pub mod preprocess;
pub mod pdf;
pub mod pdfium;
pub mod ocr;
pub mod text;
pub mod correlate;
pub mod locator;
pub mod orb;
pub mod verifier;
pub mod workspace;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod fixtures;

pub use types::*;
pub use normalize::{is_approved_present, normalize};
pub use text::{TextExtraction, TextExtractor};
pub use locator::{StampCandidate, StampLocator};
pub use verifier::StampVerifier;
pub use workspace::RequestWorkspace;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document is empty")]
    EmptyDocument,

    #[error("Document is not a PDF")]
    NotAPdf,

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is encrypted or password-protected")]
    PdfEncrypted,

    #[error("OCR engine unavailable: {0}")]
    OcrInit(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("OCR timed out after {seconds}s")]
    OcrTimeout { seconds: u64 },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Stamp template {} could not be loaded: {reason}", path.display())]
    TemplateLoad { path: PathBuf, reason: String },

    #[error("Reference catalog error: {0}")]
    Catalog(#[from] DatabaseError),
}
