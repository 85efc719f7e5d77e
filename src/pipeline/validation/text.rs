//! Letter text: embedded text layer first, OCR of rendered pages when the
//! layer is empty or carries no approved hospital name.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::normalize::{find_first_present, normalize};
use super::preprocess::encode_png;
use super::types::{OcrEngine, PdfPageRenderer, PdfTextLayer};

/// Raw text plus the signals that decided whether OCR ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextExtraction {
    /// Text layer output, followed by OCR output when OCR ran. Page order in each.
    pub text: String,
    /// The text layer was empty or whitespace-only (or unreadable).
    pub text_layer_empty: bool,
    /// The text layer names no approved hospital.
    pub hospital_marker_missing: bool,
    /// Approved hospital found in the text layer, in catalog order.
    pub matched_hospital: Option<String>,
    /// OCR ran over the rendered pages.
    pub ocr_applied: bool,
    /// Pages OCR could not process (render or engine failures).
    pub ocr_failed_pages: usize,
}

impl TextExtraction {
    pub fn needs_ocr(&self) -> bool {
        self.text_layer_empty || self.hospital_marker_missing
    }

    pub fn normalized(&self) -> String {
        normalize(&self.text)
    }
}

pub struct TextExtractor {
    text_layer: Arc<dyn PdfTextLayer>,
    renderer: Arc<dyn PdfPageRenderer>,
    ocr: Arc<dyn OcrEngine>,
    ocr_dpi: u32,
    fuzzy_threshold: u8,
}

impl TextExtractor {
    pub fn new(
        text_layer: Arc<dyn PdfTextLayer>,
        renderer: Arc<dyn PdfPageRenderer>,
        ocr: Arc<dyn OcrEngine>,
        ocr_dpi: u32,
        fuzzy_threshold: u8,
    ) -> Self {
        Self {
            text_layer,
            renderer,
            ocr,
            ocr_dpi,
            fuzzy_threshold,
        }
    }

    /// Extract text from the PDF at `pdf_path`. Never fails: every backend
    /// error is logged and contributes nothing to the returned text.
    pub fn extract_text(&self, pdf_path: &Path, hospitals: &[String]) -> TextExtraction {
        match std::fs::read(pdf_path) {
            Ok(bytes) => self.extract_text_from_bytes(&bytes, hospitals),
            Err(e) => {
                warn!(path = %pdf_path.display(), error = %e, "Cannot read PDF for text extraction");
                TextExtraction {
                    text_layer_empty: true,
                    hospital_marker_missing: true,
                    ..Default::default()
                }
            }
        }
    }

    pub fn extract_text_from_bytes(&self, pdf_bytes: &[u8], hospitals: &[String]) -> TextExtraction {
        let mut text = match self.text_layer.extract_pages(pdf_bytes) {
            Ok(pages) => {
                debug!(pages = pages.len(), "Text layer extracted");
                pages.concat()
            }
            Err(e) => {
                warn!(error = %e, "Text layer extraction failed");
                String::new()
            }
        };

        let text_layer_empty = text.trim().is_empty();
        let matched_hospital = if text_layer_empty {
            None
        } else {
            find_first_present(hospitals, &normalize(&text), self.fuzzy_threshold).map(str::to_string)
        };
        let hospital_marker_missing = matched_hospital.is_none();

        let mut extraction = TextExtraction {
            text_layer_empty,
            hospital_marker_missing,
            matched_hospital,
            ..Default::default()
        };

        if extraction.needs_ocr() {
            debug!(
                text_layer_empty,
                hospital_marker_missing, "Text layer insufficient, falling back to OCR"
            );
            let (ocr_text, failed) = self.ocr_pages(pdf_bytes);
            text.push_str(&ocr_text);
            extraction.ocr_applied = true;
            extraction.ocr_failed_pages = failed;
        }

        info!(
            chars = text.len(),
            ocr_applied = extraction.ocr_applied,
            "Text extraction complete"
        );
        tracing::trace!(text = %text, "Extracted text");

        extraction.text = text;
        extraction
    }

    /// OCR every page in order. Returns the concatenated text and the
    /// number of pages that failed.
    fn ocr_pages(&self, pdf_bytes: &[u8]) -> (String, usize) {
        let page_count = match self.renderer.page_count(pdf_bytes) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Cannot open PDF for OCR");
                return (String::new(), 0);
            }
        };

        let mut text = String::new();
        let mut failed = 0;
        for page_index in 0..page_count {
            let result = self
                .renderer
                .render_page(pdf_bytes, page_index, self.ocr_dpi)
                .and_then(|page| encode_png(&page))
                .and_then(|png| self.ocr.ocr_image(&png));

            match result {
                Ok(page_text) => {
                    debug!(page = page_index, chars = page_text.len(), "Page OCR complete");
                    text.push_str(&page_text);
                }
                Err(e) => {
                    warn!(page = page_index, error = %e, "Page OCR failed");
                    failed += 1;
                }
            }
        }
        (text, failed)
    }
}
