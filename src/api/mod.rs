//! HTTP surface of the validator.
//!
//! `POST /api/validate` accepts a multipart upload and answers with the
//! verdict; `GET /api/health` reports liveness and catalog size. The
//! router is composable: `api_router()` returns a `Router` that can be
//! mounted on any axum server instance.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{start_api_server, ApiServer, ServerSession};
pub use types::{ApiContext, ValidateResponse};
