//! Validation types and backend traits.

use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::ValidationError;

// ═══════════════════════════════════════════════════════════
// Reference catalog
// ═══════════════════════════════════════════════════════════

/// One authorized doctor's stamp, as a template image on durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceStamp {
    pub id: i64,
    pub image_path: PathBuf,
}

/// Everything the validator reads from the catalog, loaded once per request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub hospitals: Vec<String>,
    pub diseases: Vec<String>,
    pub stamps: Vec<ReferenceStamp>,
}

/// Read access to the reference catalog.
pub trait ReferenceCatalog: Send + Sync {
    fn load(&self) -> Result<CatalogSnapshot, ValidationError>;
}

/// Fixed in-memory catalog (tests, offline tooling).
pub struct StaticCatalog {
    snapshot: CatalogSnapshot,
}

impl StaticCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

impl ReferenceCatalog for StaticCatalog {
    fn load(&self) -> Result<CatalogSnapshot, ValidationError> {
        Ok(self.snapshot.clone())
    }
}

// ═══════════════════════════════════════════════════════════
// Backends
// ═══════════════════════════════════════════════════════════

/// Embedded text layer of a PDF, one string per page in page order.
pub trait PdfTextLayer: Send + Sync {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ValidationError>;
}

/// Rasterizes PDF pages.
pub trait PdfPageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ValidationError>;

    /// Render one page (0-based) at the given DPI.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<RgbImage, ValidationError>;
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine: Send + Sync {
    /// Plain text recognized in a PNG-encoded image.
    fn ocr_image(&self, png_bytes: &[u8]) -> Result<String, ValidationError>;
}

// ═══════════════════════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════════════════════

pub const ACCEPTED_REASON: &str = "All requirements have been successfully met and verified.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Accepted,
    Rejected,
    /// The validator itself failed. Shaped like a rejection: the reasons
    /// carry the failure description.
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Error => "ERROR",
        }
    }
}

/// A failed sub-check. Declaration order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFailure {
    HospitalNotAuthorized,
    DiseaseNotRecognized,
    StampNotAuthorized,
}

impl CheckFailure {
    pub fn message(&self) -> &'static str {
        match self {
            Self::HospitalNotAuthorized => {
                "This Hospital is not among the officially authorized hospitals to issue medical support letters"
            }
            Self::DiseaseNotRecognized => {
                "The submitted disease type is not recognized as one of the eligible critical conditions for medical support."
            }
            Self::StampNotAuthorized => {
                "This doctor is not recognized as an authorized approver for medical support."
            }
        }
    }
}

/// Outcome of the three sub-checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResults {
    pub hospital: bool,
    pub disease: bool,
    pub stamp: bool,
}

impl CheckResults {
    /// Failures in reporting order (hospital, disease, stamp).
    pub fn failures(&self) -> Vec<CheckFailure> {
        [
            (self.hospital, CheckFailure::HospitalNotAuthorized),
            (self.disease, CheckFailure::DiseaseNotRecognized),
            (self.stamp, CheckFailure::StampNotAuthorized),
        ]
        .into_iter()
        .filter_map(|(passed, failure)| (!passed).then_some(failure))
        .collect()
    }
}

/// Result handed back to the calling workflow.
///
/// `outcome` is `Accepted` iff all three checks passed; `reasons` is empty
/// iff the outcome is `Accepted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub outcome: Outcome,
    pub reasons: Vec<String>,
}

impl ValidationVerdict {
    pub fn from_checks(checks: CheckResults) -> Self {
        let failures = checks.failures();
        if failures.is_empty() {
            Self {
                outcome: Outcome::Accepted,
                reasons: Vec::new(),
            }
        } else {
            Self {
                outcome: Outcome::Rejected,
                reasons: failures.iter().map(|f| f.message().to_string()).collect(),
            }
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            outcome: Outcome::Error,
            reasons: vec![format!("Processing failed: {message}")],
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == Outcome::Accepted
    }

    /// Human-readable reason: the fixed confirmation when accepted,
    /// otherwise the reasons joined with ", ".
    pub fn reason(&self) -> String {
        match self.outcome {
            Outcome::Accepted => ACCEPTED_REASON.to_string(),
            Outcome::Rejected | Outcome::Error => self.reasons.join(", "),
        }
    }
}
