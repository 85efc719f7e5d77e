pub mod api; // HTTP surface
pub mod config;
pub mod db; // Reference catalog store
pub mod pipeline; // Letter validation

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::AppConfig;
use db::SqliteCatalog;
use pipeline::validation::ocr::TesseractCli;
use pipeline::validation::pdf::PdfTextExtractor;
use pipeline::validation::pdfium::PdfiumRenderer;
use pipeline::validation::workspace::sweep_orphans;
use pipeline::validation::{Backends, OcrEngine, ReferenceCatalog, ValidationOrchestrator};

/// Process entry point: logging, configuration, orphan sweep, then serve
/// until Ctrl-C.
pub fn run() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::from_env();

    // Clean scratch directories left by a previous crash
    sweep_orphans(&config.temp_dir, config.orphan_max_age);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(config)) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

/// Wire the production backends and serve the API until Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<(), String> {
    // Migrate up front so a broken catalog fails start-up, not the first request.
    db::open_database(&config.database_path)
        .map_err(|e| format!("Cannot open catalog {}: {e}", config.database_path.display()))?;
    let catalog: Arc<dyn ReferenceCatalog> = Arc::new(SqliteCatalog::new(config.database_path.clone()));

    let renderer = PdfiumRenderer::new().map_err(|e| format!("PDF renderer unavailable: {e}"))?;

    let orchestrator = ValidationOrchestrator::new(
        catalog.clone(),
        Backends {
            text_layer: Arc::new(PdfTextExtractor),
            renderer: Arc::new(renderer),
            ocr: build_ocr_engine(&config),
        },
        &config,
    );

    let ctx = api::ApiContext::new(Arc::new(orchestrator), catalog, &config);
    let server = api::start_api_server(ctx, config.bind_addr).await?;
    tracing::info!(addr = %server.session.server_addr, "Accepting validation requests");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C, shutting down: {e}");
    }
    server.stop().await;
    Ok(())
}

#[cfg(feature = "ocr")]
fn build_ocr_engine(config: &AppConfig) -> Arc<dyn OcrEngine> {
    use pipeline::validation::ocr::BundledTesseract;

    match BundledTesseract::new(config.ocr.tessdata_dir.as_deref(), &config.ocr.language) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::warn!(error = %e, "Linked Tesseract unavailable, using executable");
            Arc::new(TesseractCli::new(&config.ocr))
        }
    }
}

#[cfg(not(feature = "ocr"))]
fn build_ocr_engine(config: &AppConfig) -> Arc<dyn OcrEngine> {
    Arc::new(TesseractCli::new(&config.ocr))
}
