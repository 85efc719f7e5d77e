//! Image decoding and the shared grayscale preparation applied to every page,
//! stamp template and stamp candidate before comparison.
//!
//! Preparation is always: grayscale → Gaussian blur (scan noise) → histogram
//! equalization (scan exposure). Pages and templates must go through exactly
//! the same steps or their correlation scores are not comparable.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, warn};

use super::types::ReferenceStamp;
use super::ValidationError;

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), ValidationError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ValidationError::ImageProcessing(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ValidationError::ImageProcessing(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Decode image bytes, applying EXIF orientation when present.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ValidationError> {
    validate_image_bytes(bytes)?;
    let img = image::load_from_memory(bytes)
        .map_err(|e| ValidationError::ImageProcessing(format!("Failed to decode image: {e}")))?;
    Ok(apply_orientation(img, read_exif_orientation(bytes)))
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
///
/// Stamp references are often photographed on a phone; without this a
/// portrait photo is compared sideways.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Grayscale → blur → equalize.
pub fn prepare_gray(gray: &GrayImage, blur_sigma: f32) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let blurred = if blur_sigma > 0.0 {
        gaussian_blur_f32(gray, blur_sigma)
    } else {
        gray.clone()
    };
    equalize_histogram(&blurred)
}

/// `prepare_gray` for a color page.
pub fn prepare_rgb(rgb: &RgbImage, blur_sigma: f32) -> GrayImage {
    let gray = DynamicImage::ImageRgb8(rgb.clone()).into_luma8();
    prepare_gray(&gray, blur_sigma)
}

/// Resize a grayscale image by `factor`, keeping at least 1x1.
pub fn scale_gray(img: &GrayImage, factor: f32) -> GrayImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return img.clone();
    }
    let (w, h) = scaled_dimensions(img.width(), img.height(), factor);
    // Triangle on downscale approximates area averaging; CatmullRom keeps edges on upscale.
    let filter = if factor < 1.0 {
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    };
    image::imageops::resize(img, w, h, filter)
}

pub fn scaled_dimensions(width: u32, height: u32, factor: f32) -> (u32, u32) {
    let w = (width as f32 * factor).round().max(1.0) as u32;
    let h = (height as f32 * factor).round().max(1.0) as u32;
    (w, h)
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, ValidationError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| ValidationError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Stamp templates
// ═══════════════════════════════════════════════════════════

/// A reference stamp loaded and prepared for comparison.
#[derive(Debug, Clone)]
pub struct StampTemplate {
    pub stamp_id: i64,
    pub path: PathBuf,
    /// Prepared grayscale (blurred + equalized).
    pub gray: GrayImage,
}

/// Load and prepare one reference stamp.
pub fn load_template(
    stamp: &ReferenceStamp,
    blur_sigma: f32,
) -> Result<StampTemplate, ValidationError> {
    let template_error = |reason: String| ValidationError::TemplateLoad {
        path: stamp.image_path.clone(),
        reason,
    };

    let bytes = std::fs::read(&stamp.image_path).map_err(|e| template_error(e.to_string()))?;
    let img = decode_image(&bytes).map_err(|e| template_error(e.to_string()))?;
    let gray = img.into_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(template_error("image has no pixels".into()));
    }

    Ok(StampTemplate {
        stamp_id: stamp.id,
        path: stamp.image_path.clone(),
        gray: prepare_gray(&gray, blur_sigma),
    })
}

/// Load every usable reference stamp. A missing or corrupt image is logged
/// and skipped; the remaining stamps still take part.
pub fn load_templates(stamps: &[ReferenceStamp], blur_sigma: f32) -> Vec<StampTemplate> {
    let templates: Vec<StampTemplate> = stamps
        .iter()
        .filter_map(|stamp| match load_template(stamp, blur_sigma) {
            Ok(template) => Some(template),
            Err(e) => {
                warn!(stamp_id = stamp.id, error = %e, "Skipping reference stamp");
                None
            }
        })
        .collect();

    debug!(
        requested = stamps.len(),
        loaded = templates.len(),
        "Reference stamp templates loaded"
    );
    templates
}

/// Load a prepared grayscale image from disk (stamp crops).
pub fn load_prepared(path: &Path, blur_sigma: f32) -> Result<GrayImage, ValidationError> {
    let bytes = std::fs::read(path)?;
    let img = decode_image(&bytes)?;
    Ok(prepare_gray(&img.into_luma8(), blur_sigma))
}
