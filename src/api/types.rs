//! Shared types for the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::pipeline::validation::{ReferenceCatalog, ValidationOrchestrator, ValidationVerdict};

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub orchestrator: Arc<ValidationOrchestrator>,
    pub catalog: Arc<dyn ReferenceCatalog>,
    /// Upper bound for one validation, measured on the async side.
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl ApiContext {
    pub fn new(
        orchestrator: Arc<ValidationOrchestrator>,
        catalog: Arc<dyn ReferenceCatalog>,
        config: &AppConfig,
    ) -> Self {
        Self {
            orchestrator,
            catalog,
            request_timeout: config.request_timeout,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Validation response
// ═══════════════════════════════════════════════════════════

/// Category validated when the client sends none.
pub const DEFAULT_CATEGORY: &str = "Medical";

/// `result` for letters outside the validated category.
pub const SKIPPED_RESULT: &str = "SKIPPED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// `ACCEPTED`, `REJECTED`, `ERROR` or `SKIPPED`.
    pub result: String,
    /// Single human-readable reason (reasons joined with ", ").
    pub reason: String,
    pub reasons: Vec<String>,
    pub request_id: String,
    /// RFC 3339 timestamp.
    pub checked_at: String,
}

impl ValidateResponse {
    pub fn from_verdict(verdict: &ValidationVerdict, request_id: &str) -> Self {
        Self {
            result: verdict.outcome.as_str().to_string(),
            reason: verdict.reason(),
            reasons: verdict.reasons.clone(),
            request_id: request_id.to_string(),
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn skipped(category: &str, request_id: &str) -> Self {
        Self {
            result: SKIPPED_RESULT.to_string(),
            reason: format!("Category '{category}' does not require validation."),
            reasons: Vec::new(),
            request_id: request_id.to_string(),
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validation::{CheckResults, ACCEPTED_REASON};

    #[test]
    fn accepted_verdict_carries_fixed_reason() {
        let verdict = ValidationVerdict::from_checks(CheckResults {
            hospital: true,
            disease: true,
            stamp: true,
        });
        let response = ValidateResponse::from_verdict(&verdict, "req-1");
        assert_eq!(response.result, "ACCEPTED");
        assert_eq!(response.reason, ACCEPTED_REASON);
        assert!(response.reasons.is_empty());
        assert!(chrono::DateTime::parse_from_rfc3339(&response.checked_at).is_ok());
    }

    #[test]
    fn error_verdict_serializes_as_error() {
        let verdict = ValidationVerdict::error("boom");
        let response = ValidateResponse::from_verdict(&verdict, "req-2");
        assert_eq!(response.result, "ERROR");
        assert_eq!(response.reason, "Processing failed: boom");
    }

    #[test]
    fn skipped_has_no_reasons() {
        let response = ValidateResponse::skipped("Education", "req-3");
        assert_eq!(response.result, SKIPPED_RESULT);
        assert!(response.reason.contains("Education"));
        assert!(response.reasons.is_empty());
    }
}
