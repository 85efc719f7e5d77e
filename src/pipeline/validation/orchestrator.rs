//! Letter validation: header check, catalog snapshot, text and presence
//! checks, then a page-by-page stamp search. Every failure becomes a verdict.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::locator::{Bounds, LocateMethod, StampLocator};
use super::normalize::find_first_present;
use super::preprocess::{load_templates, StampTemplate};
use super::text::TextExtractor;
use super::types::{
    CheckResults, OcrEngine, PdfPageRenderer, PdfTextLayer, ReferenceCatalog, ValidationVerdict,
};
use super::verifier::StampVerifier;
use super::workspace::RequestWorkspace;
use super::ValidationError;
use crate::config::AppConfig;

/// Only this many leading bytes are searched for the PDF header.
const PDF_HEADER_WINDOW: usize = 1024;

/// External backends the validator drives.
pub struct Backends {
    pub text_layer: Arc<dyn PdfTextLayer>,
    pub renderer: Arc<dyn PdfPageRenderer>,
    pub ocr: Arc<dyn OcrEngine>,
}

/// Where the authorizing stamp was found.
#[derive(Debug, Clone, Serialize)]
pub struct StampEvidence {
    /// 0-based page index.
    pub page: usize,
    pub bounds: Bounds,
    pub method: LocateMethod,
}

/// Verdict plus the evidence behind it.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub verdict: ValidationVerdict,
    pub checks: CheckResults,
    pub matched_hospital: Option<String>,
    pub matched_disease: Option<String>,
    pub stamp: Option<StampEvidence>,
    pub ocr_applied: bool,
    pub pages_searched: usize,
}

/// Composes text extraction, catalog matching and stamp search into a
/// verdict. One instance serves concurrent requests; each `validate`
/// call runs sequentially on the calling thread.
pub struct ValidationOrchestrator {
    catalog: Arc<dyn ReferenceCatalog>,
    text_extractor: TextExtractor,
    renderer: Arc<dyn PdfPageRenderer>,
    locator: StampLocator,
    verifier: StampVerifier,
    temp_dir: PathBuf,
    render_dpi: u32,
    fuzzy_threshold: u8,
    blur_sigma: f32,
}

impl ValidationOrchestrator {
    pub fn new(catalog: Arc<dyn ReferenceCatalog>, backends: Backends, config: &AppConfig) -> Self {
        let thresholds = &config.thresholds;
        Self {
            catalog,
            text_extractor: TextExtractor::new(
                backends.text_layer,
                backends.renderer.clone(),
                backends.ocr,
                config.render_dpi,
                thresholds.fuzzy_match,
            ),
            renderer: backends.renderer,
            locator: StampLocator::new(thresholds),
            verifier: StampVerifier::new(thresholds),
            temp_dir: config.temp_dir.clone(),
            render_dpi: config.render_dpi,
            fuzzy_threshold: thresholds.fuzzy_match,
            blur_sigma: thresholds.blur_sigma,
        }
    }

    /// Validate one letter. Never fails and never panics: internal errors
    /// become an `Error` verdict carrying the message.
    pub fn validate(&self, pdf_bytes: &[u8]) -> ValidationVerdict {
        self.validate_with_report(pdf_bytes)
            .map(|report| report.verdict)
            .unwrap_or_else(ValidationVerdict::error)
    }

    /// Like `validate`, but keeps the evidence. `Err` carries the
    /// failure that would become the `Error` verdict.
    pub fn validate_with_report(&self, pdf_bytes: &[u8]) -> Result<ValidationReport, String> {
        let started = Instant::now();
        info!(bytes = pdf_bytes.len(), "Validation started");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(pdf_bytes)));
        let result = match outcome {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                error!(error = %e, "Validation failed");
                Err(e.to_string())
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(panic = %detail, "Validation panicked");
                Err(format!("internal error: {detail}"))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => info!(
                outcome = report.verdict.outcome.as_str(),
                hospital = report.checks.hospital,
                disease = report.checks.disease,
                stamp = report.checks.stamp,
                elapsed_ms,
                "Validation finished"
            ),
            Err(_) => info!(outcome = "ERROR", elapsed_ms, "Validation finished"),
        }
        result
    }

    fn run(&self, pdf_bytes: &[u8]) -> Result<ValidationReport, ValidationError> {
        check_pdf_header(pdf_bytes)?;

        let snapshot = self.catalog.load()?;
        debug!(
            hospitals = snapshot.hospitals.len(),
            diseases = snapshot.diseases.len(),
            stamps = snapshot.stamps.len(),
            "Reference catalog loaded"
        );

        // Dropping the workspace removes the saved PDF and any crop still on
        // disk, on every return path including `?` and unwinding.
        let workspace = RequestWorkspace::create(&self.temp_dir)?;
        let pdf_path = workspace.save_pdf(pdf_bytes)?;

        let extraction = self.text_extractor.extract_text(&pdf_path, &snapshot.hospitals);
        let normalized = extraction.normalized();

        // Without OCR the text is the layer the extractor already scanned.
        let matched_hospital = if extraction.ocr_applied {
            find_first_present(&snapshot.hospitals, &normalized, self.fuzzy_threshold).map(str::to_string)
        } else {
            extraction.matched_hospital.clone()
        };
        let matched_disease =
            find_first_present(&snapshot.diseases, &normalized, self.fuzzy_threshold).map(str::to_string);
        debug!(
            hospital = matched_hospital.as_deref().unwrap_or("-"),
            disease = matched_disease.as_deref().unwrap_or("-"),
            "Catalog presence checked"
        );

        let templates = load_templates(&snapshot.stamps, self.blur_sigma);
        let (stamp, pages_searched) = self.find_verified_stamp(pdf_bytes, &templates, &workspace);

        let checks = CheckResults {
            hospital: matched_hospital.is_some(),
            disease: matched_disease.is_some(),
            stamp: stamp.is_some(),
        };

        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove request workspace");
        }

        Ok(ValidationReport {
            verdict: ValidationVerdict::from_checks(checks),
            checks,
            matched_hospital,
            matched_disease,
            stamp,
            ocr_applied: extraction.ocr_applied,
            pages_searched,
        })
    }

    /// Search pages in order, stopping at the first verified stamp.
    /// Returns the evidence (if any) and the number of pages searched.
    fn find_verified_stamp(
        &self,
        pdf_bytes: &[u8],
        templates: &[StampTemplate],
        workspace: &RequestWorkspace,
    ) -> (Option<StampEvidence>, usize) {
        if templates.is_empty() {
            debug!("No usable reference stamps, stamp check fails");
            return (None, 0);
        }

        let page_count = match self.renderer.page_count(pdf_bytes) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Cannot render PDF, no pages to search for a stamp");
                return (None, 0);
            }
        };

        for page_index in 0..page_count {
            let page = match self.renderer.render_page(pdf_bytes, page_index, self.render_dpi) {
                Ok(img) => img,
                Err(e) => {
                    warn!(page = page_index, error = %e, "Page render failed, skipping");
                    continue;
                }
            };

            let Some(candidate) = self.locator.locate_stamp(&page, templates) else {
                debug!(page = page_index, "No stamp candidate on page");
                continue;
            };

            let crop = match workspace.save_crop(page_index, &candidate.image) {
                Ok(file) => file,
                Err(e) => {
                    warn!(page = page_index, error = %e, "Cannot save stamp crop, skipping page");
                    continue;
                }
            };
            let verified = self.verifier.verify_stamp(crop.path(), templates);
            drop(crop);

            if verified {
                debug!(page = page_index, "Authorized stamp found");
                return (
                    Some(StampEvidence {
                        page: page_index,
                        bounds: candidate.bounds,
                        method: candidate.method,
                    }),
                    page_index + 1,
                );
            }
        }
        (None, page_count)
    }
}

fn check_pdf_header(bytes: &[u8]) -> Result<(), ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::EmptyDocument);
    }
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if !window.windows(5).any(|w| w == b"%PDF-") {
        return Err(ValidationError::NotAPdf);
    }
    Ok(())
}
