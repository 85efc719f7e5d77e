//! ORB-style oriented binary features: FAST-9 corners over a small image
//! pyramid, intensity-centroid orientation, 256-bit rotated BRIEF
//! descriptors, brute-force Hamming matching with cross-check.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Radius of the orientation / descriptor patch.
const PATCH_RADIUS: i32 = 15;
/// Keypoints closer than this to the border are dropped, so a rotated
/// sampling pair never leaves the image (15 * sqrt(2) < 22).
const BORDER: u32 = 22;
const PYRAMID_LEVELS: usize = 4;
const SCALE_FACTOR: f32 = 1.2;
const FAST_THRESHOLD: u8 = 20;
/// Smoothing applied before BRIEF sampling.
const DESCRIPTOR_SIGMA: f32 = 2.0;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x0b5e_55ed;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Position in full-resolution coordinates.
    pub x: f32,
    pub y: f32,
    pub level: usize,
    /// Orientation in radians.
    pub angle: f32,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Sampling offsets `(x1, y1, x2, y2)` for each descriptor bit.
type SamplingPattern = Vec<(i32, i32, i32, i32)>;

pub struct OrbExtractor {
    max_keypoints: usize,
    pattern: SamplingPattern,
}

impl OrbExtractor {
    pub fn new(max_keypoints: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut coord = || rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS);
        let pattern = (0..DESCRIPTOR_BITS)
            .map(|_| (coord(), coord(), coord(), coord()))
            .collect();
        Self {
            max_keypoints,
            pattern,
        }
    }

    /// Detect up to `max_keypoints` oriented keypoints (strongest first)
    /// and describe each. Expects an already prepared grayscale image.
    pub fn detect_and_compute(&self, gray: &GrayImage) -> Features {
        let mut found: Vec<(Keypoint, Descriptor)> = Vec::new();

        let mut level_img = gray.clone();
        for level in 0..PYRAMID_LEVELS {
            if level > 0 {
                let factor = SCALE_FACTOR.powi(level as i32);
                let w = (gray.width() as f32 / factor).round() as u32;
                let h = (gray.height() as f32 / factor).round() as u32;
                if w <= 2 * BORDER || h <= 2 * BORDER {
                    break;
                }
                level_img = imageops::resize(gray, w, h, FilterType::Triangle);
            } else if gray.width() <= 2 * BORDER || gray.height() <= 2 * BORDER {
                break;
            }

            let smoothed = gaussian_blur_f32(&level_img, DESCRIPTOR_SIGMA);
            let scale = SCALE_FACTOR.powi(level as i32);

            for (x, y, score) in local_maxima(&level_img) {
                let angle = intensity_centroid_angle(&level_img, x, y);
                let descriptor = self.describe(&smoothed, x, y, angle);
                found.push((
                    Keypoint {
                        x: x as f32 * scale,
                        y: y as f32 * scale,
                        level,
                        angle,
                        score,
                    },
                    descriptor,
                ));
            }
        }

        found.sort_by(|a, b| b.0.score.total_cmp(&a.0.score));
        found.truncate(self.max_keypoints);

        let (keypoints, descriptors) = found.into_iter().unzip();
        Features {
            keypoints,
            descriptors,
        }
    }

    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let sample = |dx: i32, dy: i32| -> u8 {
            let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
            let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
            // BORDER keeps these inside the image.
            smoothed.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32).0[0]
        };

        let mut bits = [0u64; 4];
        for (i, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            if sample(x1, y1) < sample(x2, y2) {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        Descriptor(bits)
    }
}

/// FAST-9 corners away from the border that are the strongest in their
/// 3x3 neighbourhood.
fn local_maxima(img: &GrayImage) -> Vec<(u32, u32, f32)> {
    let (w, h) = img.dimensions();
    let corners = corners_fast9(img, FAST_THRESHOLD);

    let mut scores = vec![0f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score;
    }

    corners
        .iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x + BORDER < w && c.y + BORDER < h)
        .filter(|c| {
            let mut strongest = true;
            for ny in c.y - 1..=c.y + 1 {
                for nx in c.x - 1..=c.x + 1 {
                    if (nx, ny) == (c.x, c.y) {
                        continue;
                    }
                    let s = scores[(ny * w + nx) as usize];
                    // Ties resolved towards the earlier (row-major) pixel.
                    if s > c.score || (s == c.score && (ny, nx) < (c.y, c.x)) {
                        strongest = false;
                    }
                }
            }
            strongest
        })
        .map(|c| (c.x, c.y, c.score))
        .collect()
}

/// Orientation from the intensity centroid of the circular patch.
fn intensity_centroid_angle(img: &GrayImage, x: u32, y: u32) -> f32 {
    let mut m01 = 0f32;
    let mut m10 = 0f32;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > PATCH_RADIUS * PATCH_RADIUS {
                continue;
            }
            let v = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0] as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

/// Mutual nearest neighbours under Hamming distance, as
/// `(query_index, train_index, distance)`.
pub fn cross_check_matches(query: &[Descriptor], train: &[Descriptor]) -> Vec<(usize, usize, u32)> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let nearest = |from: &Descriptor, pool: &[Descriptor]| -> (usize, u32) {
        pool.iter()
            .enumerate()
            .map(|(i, d)| (i, from.hamming(d)))
            .min_by_key(|&(i, dist)| (dist, i))
            .unwrap_or((0, u32::MAX))
    };

    let train_best: Vec<usize> = train.iter().map(|t| nearest(t, query).0).collect();

    query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (ti, dist) = nearest(q, train);
            (train_best[ti] == qi).then_some((qi, ti, dist))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validation::fixtures::stamp;
    use crate::pipeline::validation::preprocess::prepare_rgb;
    use image::Luma;

    fn prepared_stamp(size: u32, seed: u64) -> GrayImage {
        prepare_rgb(&stamp(size, seed), 1.1)
    }

    #[test]
    fn hamming_counts_differing_bits() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([0b1011, 0, u64::MAX, 1 << 63]);
        assert_eq!(a.hamming(&a), 0);
        assert_eq!(a.hamming(&b), 3 + 64 + 1);
        assert_eq!(b.hamming(&a), a.hamming(&b));
    }

    #[test]
    fn pattern_is_deterministic() {
        let a = OrbExtractor::new(100);
        let b = OrbExtractor::new(100);
        assert_eq!(a.pattern, b.pattern);
        assert_eq!(a.pattern.len(), DESCRIPTOR_BITS);
        assert!(a
            .pattern
            .iter()
            .all(|&(x1, y1, x2, y2)| [x1, y1, x2, y2].iter().all(|v| v.abs() <= PATCH_RADIUS)));
    }

    #[test]
    fn textured_stamp_has_keypoints() {
        let features = OrbExtractor::new(2000).detect_and_compute(&prepared_stamp(160, 1));
        assert!(features.len() > 10, "only {} keypoints", features.len());
        assert_eq!(features.keypoints.len(), features.descriptors.len());
    }

    #[test]
    fn keypoint_cap_respected_strongest_first() {
        let features = OrbExtractor::new(5).detect_and_compute(&prepared_stamp(160, 1));
        assert_eq!(features.len(), 5);
        assert!(features
            .keypoints
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let flat = GrayImage::from_pixel(100, 100, Luma([200]));
        assert!(OrbExtractor::new(2000).detect_and_compute(&flat).is_empty());
    }

    #[test]
    fn image_smaller_than_border_has_no_keypoints() {
        let tiny = prepared_stamp(40, 1);
        assert!(OrbExtractor::new(2000).detect_and_compute(&tiny).is_empty());
    }

    #[test]
    fn identical_images_match_every_descriptor() {
        let orb = OrbExtractor::new(2000);
        let features = orb.detect_and_compute(&prepared_stamp(160, 2));
        let matches = cross_check_matches(&features.descriptors, &features.descriptors);
        // A repeated descriptor loses its cross-check to the earlier twin.
        assert!(matches.len() * 2 >= features.len());
        assert!(matches.iter().all(|&(_, _, d)| d == 0));
    }

    #[test]
    fn cross_check_requires_mutual_nearest() {
        let q = vec![Descriptor([0, 0, 0, 0]), Descriptor([0b1, 0, 0, 0])];
        let t = vec![Descriptor([0b11, 0, 0, 0])];
        // Both queries prefer t[0]; t[0] prefers q[1].
        assert_eq!(cross_check_matches(&q, &t), vec![(1, 0, 1)]);
        assert!(cross_check_matches(&q, &[]).is_empty());
    }
}
