//! `POST /api/validate`: authenticity check of an uploaded support letter.
//!
//! Multipart fields: `pdf_file` (required) and `category` (optional,
//! defaults to Medical). Only Medical letters are validated; other
//! categories are acknowledged as skipped.

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::Json;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ValidateResponse, DEFAULT_CATEGORY};
use crate::pipeline::validation::ValidationVerdict;

pub const PDF_FIELD: &str = "pdf_file";
pub const CATEGORY_FIELD: &str = "category";

pub async fn validate(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<Json<ValidateResponse>, ApiError> {
    let limit = ctx.max_upload_bytes;
    let mut pdf: Option<Bytes> = None;
    let mut category: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, limit))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(PDF_FIELD) => {
                pdf = Some(field.bytes().await.map_err(|e| ApiError::from_multipart(e, limit))?);
            }
            Some(CATEGORY_FIELD) => {
                category = Some(field.text().await.map_err(|e| ApiError::from_multipart(e, limit))?);
            }
            // Unknown fields are ignored
            _ => {}
        }
    }

    let pdf = pdf.ok_or_else(|| ApiError::BadRequest("No PDF file provided".into()))?;
    let category = category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("validate", request_id = %request_id);

    if !category.eq_ignore_ascii_case(DEFAULT_CATEGORY) {
        span.in_scope(|| info!(category = %category, "Category not validated, skipping"));
        return Ok(Json(ValidateResponse::skipped(&category, &request_id)));
    }

    let verdict = run_validation(&ctx, pdf).instrument(span).await;
    Ok(Json(ValidateResponse::from_verdict(&verdict, &request_id)))
}

/// Run the blocking validator off the async runtime, bounded by the
/// request timeout. A timed-out validation keeps running on its blocking
/// thread until it finishes and removes its own workspace.
async fn run_validation(ctx: &ApiContext, pdf: Bytes) -> ValidationVerdict {
    let orchestrator = ctx.orchestrator.clone();
    let span = tracing::Span::current();
    let task = tokio::task::spawn_blocking(move || span.in_scope(|| orchestrator.validate(&pdf)));

    match tokio::time::timeout(ctx.request_timeout, task).await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(join_err)) => {
            warn!(error = %join_err, "Validation task failed");
            ValidationVerdict::error(format!("validation task failed: {join_err}"))
        }
        Err(_) => {
            let seconds = ctx.request_timeout.as_secs_f32();
            warn!(timeout_secs = seconds, "Validation timed out");
            ValidationVerdict::error(format!("validation timed out after {seconds:.1}s"))
        }
    }
}
