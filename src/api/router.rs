//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Multipart framing allowance on top of the configured upload limit.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Build the API router.
pub fn api_router(ctx: ApiContext) -> Router {
    let body_limit = ctx.max_upload_bytes + MULTIPART_OVERHEAD;

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/validate", post(endpoints::validate::validate))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::pipeline::validation::ocr::MockOcrEngine;
    use crate::pipeline::validation::pdf::test_pdf::{make_image_only_pdf, make_text_pdf};
    use crate::pipeline::validation::pdf::PdfTextExtractor;
    use crate::pipeline::validation::pdfium::MockPdfPageRenderer;
    use crate::pipeline::validation::{
        Backends, CatalogSnapshot, CheckFailure, OcrEngine, ReferenceCatalog, StaticCatalog,
        ValidationError, ValidationOrchestrator,
    };

    const BOUNDARY: &str = "letterguard-test-boundary";

    struct SlowOcr;

    impl OcrEngine for SlowOcr {
        fn ocr_image(&self, _png_bytes: &[u8]) -> Result<String, ValidationError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(String::new())
        }
    }

    fn test_context(
        temp: &tempfile::TempDir,
        ocr: impl OcrEngine + 'static,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> ApiContext {
        let mut config = AppConfig {
            temp_dir: temp.path().join("tmp"),
            ..AppConfig::default()
        };
        tweak(&mut config);

        let catalog: Arc<dyn ReferenceCatalog> = Arc::new(StaticCatalog::new(CatalogSnapshot {
            hospitals: vec!["Adama General Hospital".into()],
            diseases: vec!["Malaria".into()],
            stamps: vec![],
        }));
        let orchestrator = ValidationOrchestrator::new(
            catalog.clone(),
            Backends {
                text_layer: Arc::new(PdfTextExtractor),
                renderer: Arc::new(MockPdfPageRenderer::blank(1)),
                ocr: Arc::new(ocr),
            },
            &config,
        );
        ApiContext::new(Arc::new(orchestrator), catalog, &config)
    }

    fn multipart_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                         Content-Type: application/pdf\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(&b"\r\n"[..]);
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/validate")
            .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_catalog_counts() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |_| {}));

        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["catalog"]["hospitals"], 1);
        assert_eq!(json["catalog"]["diseases"], 1);
        assert_eq!(json["catalog"]["stamps"], 0);
    }

    #[tokio::test]
    async fn missing_pdf_field_returns_400() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |_| {}));

        let response = app
            .oneshot(multipart_request(&[("category", None, &b"Medical"[..])]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert_eq!(json["error"]["message"], "No PDF file provided");
    }

    #[tokio::test]
    async fn non_medical_category_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |_| {}));

        let response = app
            .oneshot(multipart_request(&[
                ("pdf_file", Some("letter.pdf"), &b"%PDF-1.4"[..]),
                ("category", None, &b"Education"[..]),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["result"], "SKIPPED");
    }

    #[tokio::test]
    async fn unstamped_letter_rejected_for_stamp_only() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |_| {}));
        let pdf = make_text_pdf(&["ADAMA GENERAL HOSPITAL, Malaria"]);

        let response = app
            .oneshot(multipart_request(&[("pdf_file", Some("letter.pdf"), pdf.as_slice())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["result"], "REJECTED");
        assert_eq!(json["reason"], CheckFailure::StampNotAuthorized.message());
        assert_eq!(json["reasons"].as_array().map(Vec::len), Some(1));
        assert!(uuid::Uuid::parse_str(json["request_id"].as_str().unwrap()).is_ok());
        assert_eq!(std::fs::read_dir(temp.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn category_match_is_case_insensitive() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |_| {}));

        let response = app
            .oneshot(multipart_request(&[
                ("category", None, &b"  medical "[..]),
                ("pdf_file", Some("letter.pdf"), &b"not a pdf at all"[..]),
            ]))
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["result"], "ERROR");
        assert_eq!(json["reason"], "Processing failed: Document is not a PDF");
    }

    #[tokio::test]
    async fn oversized_upload_returns_413() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |c| {
            c.max_upload_bytes = 1024;
        }));

        let big = vec![b'x'; 64 * 1024];
        let response = app
            .oneshot(multipart_request(&[("pdf_file", Some("letter.pdf"), big.as_slice())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn slow_validation_times_out_as_error_verdict() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, SlowOcr, |c| {
            c.request_timeout = Duration::from_millis(50);
        }));
        let pdf = make_image_only_pdf();

        let response = app
            .oneshot(multipart_request(&[("pdf_file", Some("scan.pdf"), pdf.as_slice())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["result"], "ERROR");
        assert!(json["reason"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let temp = tempfile::tempdir().unwrap();
        let app = api_router(test_context(&temp, MockOcrEngine::new(""), |_| {}));
        let req = Request::builder().uri("/api/nope").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
