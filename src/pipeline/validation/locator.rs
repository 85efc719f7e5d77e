//! Finds the region of a rendered page most likely to hold a doctor's stamp.
//!
//! Primary: multi-scale template matching of every reference stamp against
//! the page. Fallback, only when no match clears the score threshold: edge
//! detection and stamp-sized outer contours, largest first.

use image::imageops;
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use serde::Serialize;
use tracing::debug;

use super::correlate::PageCorrelator;
use super::preprocess::{prepare_rgb, scale_gray, StampTemplate};
use crate::config::Thresholds;

/// Pixel rectangle on the full-resolution page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    /// Clip to a `width x height` image. `None` if nothing is left.
    fn clipped(self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then_some(Self {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LocateMethod {
    TemplateMatch { stamp_id: i64, scale: f32, score: f32 },
    Contour { area: f64 },
}

/// Best (stamp, scale) alignment on one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub stamp_id: i64,
    pub scale: f32,
    pub score: f32,
    pub bounds: Bounds,
}

/// A color crop of the page believed to contain a stamp.
#[derive(Debug, Clone)]
pub struct StampCandidate {
    pub image: RgbImage,
    pub bounds: Bounds,
    pub method: LocateMethod,
}

pub struct StampLocator {
    blur_sigma: f32,
    scales: Vec<f32>,
    match_threshold: f32,
    area_min: f64,
    area_max: f64,
    canny_low: f32,
    canny_high: f32,
    search_max_dimension: u32,
}

impl StampLocator {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            blur_sigma: thresholds.blur_sigma,
            scales: thresholds.template_scales.clone(),
            match_threshold: thresholds.template_match,
            area_min: thresholds.contour_area_min,
            area_max: thresholds.contour_area_max,
            canny_low: thresholds.canny_low,
            canny_high: thresholds.canny_high,
            search_max_dimension: thresholds.search_max_dimension,
        }
    }

    /// Locate a stamp-like region on `page`. `None` means no candidate
    /// on this page, which is not an error.
    pub fn locate_stamp(&self, page: &RgbImage, templates: &[StampTemplate]) -> Option<StampCandidate> {
        if page.width() == 0 || page.height() == 0 {
            return None;
        }
        let gray = prepare_rgb(page, self.blur_sigma);

        if let Some(found) = self.best_template_match(&gray, templates) {
            if found.score > self.match_threshold {
                debug!(
                    stamp_id = found.stamp_id,
                    scale = found.scale,
                    score = found.score,
                    x = found.bounds.x,
                    y = found.bounds.y,
                    "Stamp located by template matching"
                );
                return crop(page, found.bounds).map(|image| StampCandidate {
                    image,
                    bounds: found.bounds,
                    method: LocateMethod::TemplateMatch {
                        stamp_id: found.stamp_id,
                        scale: found.scale,
                        score: found.score,
                    },
                });
            }
            debug!(
                best_score = found.score,
                threshold = self.match_threshold,
                "Best template match below threshold, trying contours"
            );
        } else {
            debug!("No template could be aligned, trying contours");
        }

        let (bounds, area) = self.contour_region(&gray)?;
        debug!(area, x = bounds.x, y = bounds.y, "Stamp located by contour detection");
        crop(page, bounds).map(|image| StampCandidate {
            image,
            bounds,
            method: LocateMethod::Contour { area },
        })
    }

    /// Highest-scoring alignment over every (template, scale) pair, in
    /// full-resolution page coordinates, regardless of threshold.
    pub fn best_template_match(
        &self,
        gray_page: &GrayImage,
        templates: &[StampTemplate],
    ) -> Option<TemplateMatch> {
        if templates.is_empty() {
            return None;
        }

        let long_side = gray_page.width().max(gray_page.height());
        let factor = if long_side > self.search_max_dimension {
            self.search_max_dimension as f32 / long_side as f32
        } else {
            1.0
        };
        let search = scale_gray(gray_page, factor);
        let correlator = PageCorrelator::new(&search);
        let (search_w, search_h) = correlator.dimensions();

        templates
            .iter()
            .flat_map(|t| self.scales.iter().map(move |&scale| (t, scale)))
            .filter_map(|(template, scale)| {
                let resized_w = (template.gray.width() as f32 * scale).round() as u32;
                let resized_h = (template.gray.height() as f32 * scale).round() as u32;
                if resized_w == 0 || resized_h == 0 {
                    return None;
                }
                if resized_w > gray_page.width() || resized_h > gray_page.height() {
                    return None;
                }

                let scaled = scale_gray(&template.gray, scale * factor);
                if scaled.width() > search_w || scaled.height() > search_h {
                    return None;
                }
                let hit = correlator.best_alignment(&scaled)?;
                tracing::trace!(stamp_id = template.stamp_id, scale, score = hit.score, "Template scored");

                let bounds = Bounds {
                    x: (hit.x as f32 / factor).round() as u32,
                    y: (hit.y as f32 / factor).round() as u32,
                    width: resized_w,
                    height: resized_h,
                };
                Some(TemplateMatch {
                    stamp_id: template.stamp_id,
                    scale,
                    score: hit.score,
                    bounds: bounds.clipped(gray_page.width(), gray_page.height())?,
                })
            })
            .fold(None, |best: Option<TemplateMatch>, m| match best {
                Some(b) if b.score >= m.score => Some(b),
                _ => Some(m),
            })
    }

    /// Largest outer contour whose area lies strictly inside the band.
    pub fn contour_region(&self, gray_page: &GrayImage) -> Option<(Bounds, f64)> {
        let edges = canny(gray_page, self.canny_low, self.canny_high);
        let contours = find_contours::<i32>(&edges);

        let mut candidates: Vec<(Bounds, f64)> = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| {
                let area = polygon_area(c);
                (area > self.area_min && area < self.area_max)
                    .then(|| bounding_box(c).map(|b| (b, area)))
                    .flatten()
            })
            .collect();

        debug!(
            contours = contours.len(),
            in_band = candidates.len(),
            "Contour candidates"
        );

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.into_iter().next()
    }
}

/// Shoelace area of the closed polygon through the contour points.
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let pts = &contour.points;
    if pts.len() < 3 {
        return 0.0;
    }
    let twice: i64 = pts
        .iter()
        .zip(pts.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

fn bounding_box(contour: &Contour<i32>) -> Option<Bounds> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;
    Some(Bounds {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

fn crop(page: &RgbImage, bounds: Bounds) -> Option<RgbImage> {
    let b = bounds.clipped(page.width(), page.height())?;
    Some(imageops::crop_imm(page, b.x, b.y, b.width, b.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validation::fixtures::{blank_page, page_with_stamp, stamp};
    use crate::pipeline::validation::preprocess::prepare_gray;
    use image::{DynamicImage, Rgb};
    use imageproc::point::Point;

    fn template(id: i64, img: &RgbImage) -> StampTemplate {
        let gray = DynamicImage::ImageRgb8(img.clone()).into_luma8();
        StampTemplate {
            stamp_id: id,
            path: format!("stamp-{id}.png").into(),
            gray: prepare_gray(&gray, 1.1),
        }
    }

    fn locator() -> StampLocator {
        StampLocator::new(&Thresholds::default())
    }

    #[test]
    fn finds_scaled_stamp_by_template_matching() {
        let reference = stamp(140, 11);
        let templates = vec![template(1, &reference)];

        for (scale, x, y) in [(0.5, 400, 600), (0.75, 80, 500), (1.0, 300, 120), (1.25, 20, 20), (1.5, 350, 550)] {
            let page = page_with_stamp(&blank_page(612, 792), &reference, scale, x, y);
            let candidate = locator()
                .locate_stamp(&page, &templates)
                .unwrap_or_else(|| panic!("no candidate at scale {scale}"));

            match candidate.method {
                LocateMethod::TemplateMatch { stamp_id, scale: found, score } => {
                    assert_eq!(stamp_id, 1);
                    assert!((found - scale).abs() < f32::EPSILON, "scale {found} for {scale}");
                    assert!(score > 0.6, "score {score} at scale {scale}");
                }
                other => panic!("expected template match at scale {scale}, got {other:?}"),
            }
            assert!(candidate.bounds.x.abs_diff(x) <= 2, "x {} vs {x}", candidate.bounds.x);
            assert!(candidate.bounds.y.abs_diff(y) <= 2, "y {} vs {y}", candidate.bounds.y);
            assert_eq!(candidate.image.dimensions(), (candidate.bounds.width, candidate.bounds.height));
        }
    }

    #[test]
    fn picks_best_stamp_across_references() {
        let a = stamp(120, 1);
        let b = stamp(120, 2);
        let page = page_with_stamp(&blank_page(500, 500), &b, 1.0, 200, 200);
        let templates = vec![template(1, &a), template(2, &b)];

        let gray = prepare_rgb(&page, 1.1);
        let best = locator().best_template_match(&gray, &templates).unwrap();
        assert_eq!(best.stamp_id, 2);
    }

    #[test]
    fn oversized_page_searched_downscaled() {
        let reference = stamp(200, 5);
        let page = page_with_stamp(&blank_page(1700, 2200), &reference, 1.0, 900, 1500);
        let candidate = locator().locate_stamp(&page, &[template(1, &reference)]).unwrap();

        assert!(matches!(candidate.method, LocateMethod::TemplateMatch { .. }));
        assert!(candidate.bounds.x.abs_diff(900) <= 4);
        assert!(candidate.bounds.y.abs_diff(1500) <= 4);
        assert_eq!((candidate.bounds.width, candidate.bounds.height), (200, 200));
    }

    #[test]
    fn falls_back_to_contours_without_templates() {
        let reference = stamp(150, 3);
        let page = page_with_stamp(&blank_page(612, 792), &reference, 1.0, 200, 300);

        let candidate = locator().locate_stamp(&page, &[]).unwrap();
        match candidate.method {
            LocateMethod::Contour { area } => assert!(area > 1_000.0 && area < 200_000.0),
            other => panic!("expected contour, got {other:?}"),
        }
        // The outer ring bounds the stamp.
        assert!(candidate.bounds.x.abs_diff(200) <= 6);
        assert!(candidate.bounds.y.abs_diff(300) <= 6);
    }

    #[test]
    fn blank_page_yields_nothing() {
        let templates = vec![template(1, &stamp(120, 4))];
        assert!(locator().locate_stamp(&blank_page(612, 792), &templates).is_none());
    }

    #[test]
    fn small_marks_are_not_stamp_sized() {
        let mut page = blank_page(612, 792);
        for i in 0..10 {
            for dy in 0..4 {
                for dx in 0..20 {
                    page.put_pixel(50 + dx, 50 + i * 30 + dy, Rgb([0, 0, 0]));
                }
            }
        }
        assert!(locator().locate_stamp(&page, &[]).is_none());
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(locator().locate_stamp(&RgbImage::new(0, 0), &[]).is_none());
    }

    #[test]
    fn template_larger_than_page_is_skipped() {
        let reference = stamp(300, 6);
        let page = blank_page(200, 200);
        let gray = prepare_rgb(&page, 1.1);
        let mut thresholds = Thresholds::default();
        thresholds.template_scales = vec![1.0, 1.5];
        assert!(StampLocator::new(&thresholds)
            .best_template_match(&gray, &[template(1, &reference)])
            .is_none());
    }

    #[test]
    fn shoelace_area_of_square() {
        let contour = Contour {
            points: vec![Point::new(0, 0), Point::new(10, 0), Point::new(10, 10), Point::new(0, 10)],
            border_type: BorderType::Outer,
            parent: None,
        };
        assert_eq!(polygon_area(&contour), 100.0);
        assert_eq!(
            bounding_box(&contour),
            Some(Bounds { x: 0, y: 0, width: 11, height: 11 })
        );
    }

    #[test]
    fn bounds_clip_to_page() {
        let b = Bounds { x: 90, y: 90, width: 20, height: 20 };
        assert_eq!(b.clipped(100, 100), Some(Bounds { x: 90, y: 90, width: 10, height: 10 }));
        assert_eq!(b.clipped(50, 50), None);
    }
}
