//! Embedded PDF text layer, one string per page.

use super::types::PdfTextLayer;
use super::ValidationError;

/// Embedded text layer via the pdf-extract crate.
/// Born-digital letters have one; scans usually do not.
pub struct PdfTextExtractor;

impl PdfTextLayer for PdfTextExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ValidationError> {
        // pdf-extract panics on some malformed documents.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        }));

        match result {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => {
                let msg = e.to_string();
                if msg.to_lowercase().contains("encrypt") {
                    Err(ValidationError::PdfEncrypted)
                } else {
                    Err(ValidationError::PdfParsing(msg))
                }
            }
            Err(_) => Err(ValidationError::PdfParsing(
                "text extraction panicked (malformed PDF)".into(),
            )),
        }
    }
}
