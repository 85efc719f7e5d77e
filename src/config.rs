//! Process-wide configuration.
//!
//! Built once at start-up by `AppConfig::from_env()` and injected into every
//! component that needs it. Nothing downstream reads the environment itself.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "LetterGuard";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,letterguard=debug,tower_http=info"
}

/// Get the application data directory.
/// ~/LetterGuard/ when a home directory exists, the working directory otherwise.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_NAME))
}

// ═══════════════════════════════════════════════════════════
// Thresholds
// ═══════════════════════════════════════════════════════════

/// Fuzzy partial-ratio score (0-100) a catalog entry must exceed.
pub const FUZZY_MATCH_THRESHOLD: u8 = 90;

/// Best normalized correlation a template match must exceed.
pub const TEMPLATE_MATCH_THRESHOLD: f32 = 0.4;

/// Template scale factors tried for every reference stamp.
pub const TEMPLATE_SCALES: [f32; 5] = [0.5, 0.75, 1.0, 1.25, 1.5];

/// Contour area band (px²) for the fallback stamp proposal, exclusive on both ends.
pub const CONTOUR_AREA_MIN: f64 = 1_000.0;
pub const CONTOUR_AREA_MAX: f64 = 200_000.0;

/// Canny hysteresis thresholds for the contour fallback.
pub const CANNY_LOW: f32 = 30.0;
pub const CANNY_HIGH: f32 = 100.0;

/// Cross-checked descriptor matches must be strictly greater than this.
pub const KEYPOINT_MATCH_THRESHOLD: usize = 3;

/// Maximum keypoints extracted per image.
pub const MAX_KEYPOINTS: usize = 2000;

/// Gaussian sigma equivalent to OpenCV's 5x5 kernel with sigma = 0.
pub const BLUR_SIGMA: f32 = 1.1;

/// Long side (px) of the downscaled page used for template search.
pub const SEARCH_MAX_DIMENSION: u32 = 1000;

/// Tunable decision thresholds.
///
/// Every value here was tuned empirically against a handful of letters;
/// they are exposed so they can be recalibrated without a rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct Thresholds {
    pub fuzzy_match: u8,
    pub template_match: f32,
    pub template_scales: Vec<f32>,
    pub contour_area_min: f64,
    pub contour_area_max: f64,
    pub canny_low: f32,
    pub canny_high: f32,
    pub keypoint_matches: usize,
    pub max_keypoints: usize,
    pub blur_sigma: f32,
    pub search_max_dimension: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            fuzzy_match: FUZZY_MATCH_THRESHOLD,
            template_match: TEMPLATE_MATCH_THRESHOLD,
            template_scales: TEMPLATE_SCALES.to_vec(),
            contour_area_min: CONTOUR_AREA_MIN,
            contour_area_max: CONTOUR_AREA_MAX,
            canny_low: CANNY_LOW,
            canny_high: CANNY_HIGH,
            keypoint_matches: KEYPOINT_MATCH_THRESHOLD,
            max_keypoints: MAX_KEYPOINTS,
            blur_sigma: BLUR_SIGMA,
            search_max_dimension: SEARCH_MAX_DIMENSION,
        }
    }
}

impl Thresholds {
    /// Defaults overridden by any `LETTERGUARD_*` threshold variable that parses.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fuzzy_match: env_or("LETTERGUARD_FUZZY_THRESHOLD", defaults.fuzzy_match),
            template_match: env_or("LETTERGUARD_TEMPLATE_THRESHOLD", defaults.template_match),
            template_scales: std::env::var("LETTERGUARD_TEMPLATE_SCALES")
                .ok()
                .and_then(|raw| parse_scales(&raw))
                .unwrap_or(defaults.template_scales),
            contour_area_min: env_or("LETTERGUARD_CONTOUR_AREA_MIN", defaults.contour_area_min),
            contour_area_max: env_or("LETTERGUARD_CONTOUR_AREA_MAX", defaults.contour_area_max),
            canny_low: env_or("LETTERGUARD_CANNY_LOW", defaults.canny_low),
            canny_high: env_or("LETTERGUARD_CANNY_HIGH", defaults.canny_high),
            keypoint_matches: env_or("LETTERGUARD_KEYPOINT_MATCHES", defaults.keypoint_matches),
            max_keypoints: env_or("LETTERGUARD_MAX_KEYPOINTS", defaults.max_keypoints),
            blur_sigma: env_or("LETTERGUARD_BLUR_SIGMA", defaults.blur_sigma),
            search_max_dimension: env_or(
                "LETTERGUARD_SEARCH_MAX_DIMENSION",
                defaults.search_max_dimension,
            ),
        }
    }
}

/// Parse a comma-separated scale list. `None` if empty or any entry is not a positive number.
fn parse_scales(raw: &str) -> Option<Vec<f32>> {
    let scales: Vec<f32> = raw
        .split(',')
        .map(|s| s.trim().parse::<f32>().ok().filter(|v| *v > 0.0))
        .collect::<Option<_>>()?;
    (!scales.is_empty()).then_some(scales)
}

// ═══════════════════════════════════════════════════════════
// OCR
// ═══════════════════════════════════════════════════════════

/// OCR engine settings, injected into the text extractor at construction.
#[derive(Debug, Clone, Serialize)]
pub struct OcrConfig {
    /// Tesseract executable (absolute path or a name resolved via PATH).
    pub executable: PathBuf,
    /// Tesseract language code(s), e.g. "eng" or "eng+amh".
    pub language: String,
    /// Upper bound for a single page of OCR.
    pub timeout: Duration,
    /// Tessdata directory for the linked engine; `None` uses its built-in search path.
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            language: "eng".into(),
            timeout: Duration::from_secs(60),
            tessdata_dir: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// AppConfig
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    /// Root of the per-request scratch directories.
    pub temp_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Scratch directories older than this are swept at start-up.
    pub orphan_max_age: Duration,
    pub render_dpi: u32,
    pub ocr: OcrConfig,
    pub thresholds: Thresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = app_data_dir();
        Self {
            database_path: data_dir.join("catalog.db"),
            temp_dir: data_dir.join("tmp"),
            data_dir,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8085)),
            request_timeout: Duration::from_secs(120),
            max_upload_bytes: 20 * 1024 * 1024,
            orphan_max_age: Duration::from_secs(60 * 60),
            render_dpi: 200,
            ocr: OcrConfig::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from `LETTERGUARD_*` environment variables.
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = env_path("LETTERGUARD_DATA_DIR").unwrap_or(defaults.data_dir);
        let default_ocr = OcrConfig::default();

        Self {
            database_path: env_path("LETTERGUARD_DB")
                .unwrap_or_else(|| data_dir.join("catalog.db")),
            temp_dir: env_path("LETTERGUARD_TEMP_DIR").unwrap_or_else(|| data_dir.join("tmp")),
            data_dir,
            bind_addr: env_or("LETTERGUARD_BIND", defaults.bind_addr),
            request_timeout: Duration::from_secs(env_or(
                "LETTERGUARD_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            max_upload_bytes: env_or("LETTERGUARD_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            orphan_max_age: Duration::from_secs(env_or(
                "LETTERGUARD_ORPHAN_MAX_AGE_SECS",
                defaults.orphan_max_age.as_secs(),
            )),
            render_dpi: env_or("LETTERGUARD_RENDER_DPI", defaults.render_dpi),
            ocr: OcrConfig {
                executable: env_path("LETTERGUARD_OCR_EXECUTABLE")
                    .unwrap_or(default_ocr.executable),
                language: std::env::var("LETTERGUARD_OCR_LANGUAGE")
                    .ok()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or(default_ocr.language),
                timeout: Duration::from_secs(env_or(
                    "LETTERGUARD_OCR_TIMEOUT_SECS",
                    default_ocr.timeout.as_secs(),
                )),
                tessdata_dir: env_path("LETTERGUARD_TESSDATA_DIR"),
            },
            thresholds: Thresholds::from_env(),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_letterguard() {
        assert_eq!(APP_NAME, "LetterGuard");
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with(APP_NAME));
    }

    #[test]
    fn default_thresholds_match_tuned_values() {
        let t = Thresholds::default();
        assert_eq!(t.fuzzy_match, 90);
        assert!((t.template_match - 0.4).abs() < f32::EPSILON);
        assert_eq!(t.template_scales, vec![0.5, 0.75, 1.0, 1.25, 1.5]);
        assert_eq!(t.keypoint_matches, 3);
        assert_eq!(t.max_keypoints, 2000);
        assert!(t.contour_area_min < t.contour_area_max);
    }

    #[test]
    fn default_paths_live_under_data_dir() {
        let config = AppConfig::default();
        assert!(config.database_path.starts_with(&config.data_dir));
        assert!(config.temp_dir.starts_with(&config.data_dir));
    }

    #[test]
    fn default_ocr_uses_tesseract_english() {
        let ocr = OcrConfig::default();
        assert_eq!(ocr.executable, PathBuf::from("tesseract"));
        assert_eq!(ocr.language, "eng");
        assert!(ocr.timeout > Duration::ZERO);
        assert_eq!(ocr.tessdata_dir, None);
    }

    #[test]
    fn parse_scales_accepts_list() {
        assert_eq!(parse_scales("0.5, 1.0,2"), Some(vec![0.5, 1.0, 2.0]));
    }

    #[test]
    fn parse_scales_rejects_garbage() {
        assert_eq!(parse_scales(""), None);
        assert_eq!(parse_scales("0.5,abc"), None);
        assert_eq!(parse_scales("-1"), None);
    }

    #[test]
    fn env_or_falls_back_when_unset() {
        let value: u32 = env_or("LETTERGUARD_TEST_SURELY_UNSET_VARIABLE", 17);
        assert_eq!(value, 17);
    }

    #[test]
    fn config_serializes() {
        let json = serde_json::to_string(&AppConfig::default()).unwrap();
        assert!(json.contains("\"render_dpi\":200"));
        assert!(json.contains("\"fuzzy_match\":90"));
    }
}
