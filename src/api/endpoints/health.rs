//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub catalog: CatalogCounts,
}

#[derive(Serialize)]
pub struct CatalogCounts {
    pub hospitals: usize,
    pub diseases: usize,
    pub stamps: usize,
}

/// `GET /api/health`: liveness plus the size of the reference catalog.
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let catalog = ctx.catalog.clone();
    let snapshot = tokio::task::spawn_blocking(move || catalog.load())
        .await
        .map_err(|e| ApiError::Internal(format!("Catalog task failed: {e}")))??;

    Ok(Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        catalog: CatalogCounts {
            hospitals: snapshot.hospitals.len(),
            diseases: snapshot.diseases.len(),
            stamps: snapshot.stamps.len(),
        },
    }))
}
