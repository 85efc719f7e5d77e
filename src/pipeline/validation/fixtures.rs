//! Synthetic stamps and pages shared by the locator, verifier and
//! orchestrator tests.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const INK: Rgb<u8> = Rgb([30, 40, 150]);
const PAPER: Rgb<u8> = Rgb([255, 255, 255]);

/// A round doctor's stamp: double ring with blocky "lettering" inside.
/// Different seeds give different lettering.
pub fn stamp(size: u32, seed: u64) -> RgbImage {
    let mut img = RgbImage::from_pixel(size, size, PAPER);
    let c = size as f32 / 2.0;
    let outer = c - 2.0;
    let inner = outer * 0.82;

    for (x, y, p) in img.enumerate_pixels_mut() {
        let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
        let on_outer = d <= outer && d >= outer - size as f32 * 0.05;
        let on_inner = d <= inner && d >= inner - size as f32 * 0.025;
        if on_outer || on_inner {
            *p = INK;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let cell = (size / 14).max(3);
    let start = (c - inner * 0.65) as u32;
    let end = (c + inner * 0.65) as u32;
    let mut y = start;
    while y + cell <= end {
        let mut x = start;
        while x + cell <= end {
            if rng.gen_bool(0.45) {
                for yy in y..y + cell {
                    for xx in x..x + cell {
                        img.put_pixel(xx, yy, INK);
                    }
                }
            }
            x += cell;
        }
        y += cell + cell / 2;
    }
    img
}

pub fn blank_page(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, PAPER)
}

/// Paste `stamp` resized by `scale` onto a copy of `page` at (x, y).
pub fn page_with_stamp(page: &RgbImage, stamp: &RgbImage, scale: f32, x: u32, y: u32) -> RgbImage {
    let w = (stamp.width() as f32 * scale).round() as u32;
    let h = (stamp.height() as f32 * scale).round() as u32;
    let scaled = imageops::resize(stamp, w, h, FilterType::Triangle);
    let mut out = page.clone();
    imageops::replace(&mut out, &scaled, x as i64, y as i64);
    out
}

pub fn save_png(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    img.save_with_format(&path, ImageFormat::Png).unwrap();
    path
}
