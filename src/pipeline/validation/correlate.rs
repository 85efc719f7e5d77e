//! Zero-mean normalized cross-correlation (OpenCV's `TM_CCOEFF_NORMED`).
//!
//! The numerator is computed for every offset at once as an FFT
//! cross-correlation of the page with the zero-mean template; window sums
//! for the denominator come from integral images. The page spectrum is
//! computed once and reused for every (template, scale) pair.

use std::sync::Arc;

use image::GrayImage;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Windows whose per-pixel variance falls below this are treated as flat
/// and score 0.
const MIN_WINDOW_VARIANCE: f64 = 1.0;

/// Best alignment of one template against the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

pub struct PageCorrelator {
    width: usize,
    height: usize,
    row_fft: Arc<dyn Fft<f64>>,
    col_fft: Arc<dyn Fft<f64>>,
    row_ifft: Arc<dyn Fft<f64>>,
    col_ifft: Arc<dyn Fft<f64>>,
    spectrum: Vec<Complex<f64>>,
    /// Summed-area tables, `(width + 1) * (height + 1)`.
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PageCorrelator {
    pub fn new(page: &GrayImage) -> Self {
        let width = page.width() as usize;
        let height = page.height() as usize;

        let mut planner = FftPlanner::<f64>::new();
        let row_fft = planner.plan_fft_forward(width.max(1));
        let col_fft = planner.plan_fft_forward(height.max(1));
        let row_ifft = planner.plan_fft_inverse(width.max(1));
        let col_ifft = planner.plan_fft_inverse(height.max(1));

        let (sum, sum_sq) = integral_images(page);

        let n = (width * height).max(1) as f64;
        let mean = page.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
        let mut spectrum: Vec<Complex<f64>> = page
            .pixels()
            .map(|p| Complex::new(p.0[0] as f64 - mean, 0.0))
            .collect();

        let mut correlator = Self {
            width,
            height,
            row_fft,
            col_fft,
            row_ifft,
            col_ifft,
            spectrum: Vec::new(),
            sum,
            sum_sq,
        };
        if !spectrum.is_empty() {
            correlator.forward(&mut spectrum);
        }
        correlator.spectrum = spectrum;
        correlator
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }

    /// Highest-scoring offset of `template` fully inside the page.
    ///
    /// `None` when the template is empty, larger than the page, or flat
    /// (no variance to correlate against).
    pub fn best_alignment(&self, template: &GrayImage) -> Option<Alignment> {
        let tw = template.width() as usize;
        let th = template.height() as usize;
        if tw == 0 || th == 0 || tw > self.width || th > self.height {
            return None;
        }

        let count = (tw * th) as f64;
        let t_mean = template.pixels().map(|p| p.0[0] as f64).sum::<f64>() / count;
        let t_energy: f64 = template
            .pixels()
            .map(|p| {
                let d = p.0[0] as f64 - t_mean;
                d * d
            })
            .sum();
        if t_energy <= f64::EPSILON {
            return None;
        }

        // Zero-mean template, zero-padded to the page size.
        let mut buf = vec![Complex::new(0.0, 0.0); self.width * self.height];
        for (x, y, p) in template.enumerate_pixels() {
            buf[y as usize * self.width + x as usize] = Complex::new(p.0[0] as f64 - t_mean, 0.0);
        }
        self.forward(&mut buf);

        // Cross-correlation: IFFT(F_page * conj(F_template)).
        for (b, s) in buf.iter_mut().zip(&self.spectrum) {
            *b = s * b.conj();
        }
        self.inverse(&mut buf);
        let norm = (self.width * self.height) as f64;

        let mut best: Option<Alignment> = None;
        for y in 0..=(self.height - th) {
            for x in 0..=(self.width - tw) {
                let (s, s2) = self.window_sums(x, y, tw, th);
                let var_sum = s2 - s * s / count;
                if var_sum / count < MIN_WINDOW_VARIANCE {
                    continue;
                }
                let numerator = buf[y * self.width + x].re / norm;
                let score = (numerator / (var_sum * t_energy).sqrt()).clamp(-1.0, 1.0) as f32;
                if best.map_or(true, |b| score > b.score) {
                    best = Some(Alignment {
                        x: x as u32,
                        y: y as u32,
                        score,
                    });
                }
            }
        }
        best
    }

    fn window_sums(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let stride = self.width + 1;
        let at = |table: &[f64], xx: usize, yy: usize| table[yy * stride + xx];
        let rect = |table: &[f64]| {
            at(table, x + w, y + h) - at(table, x, y + h) - at(table, x + w, y) + at(table, x, y)
        };
        (rect(&self.sum), rect(&self.sum_sq))
    }

    fn forward(&self, data: &mut [Complex<f64>]) {
        fft_2d(data, self.width, self.height, &*self.row_fft, &*self.col_fft);
    }

    fn inverse(&self, data: &mut [Complex<f64>]) {
        fft_2d(data, self.width, self.height, &*self.row_ifft, &*self.col_ifft);
    }
}

/// Separable 2-D FFT over a row-major `width x height` buffer, in place.
fn fft_2d(data: &mut [Complex<f64>], width: usize, height: usize, rows: &dyn Fft<f64>, cols: &dyn Fft<f64>) {
    // A buffer holding several rows back to back is processed as one FFT per row.
    rows.process(data);

    let mut transposed = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            transposed[x * height + y] = data[y * width + x];
        }
    }
    cols.process(&mut transposed);
    for x in 0..width {
        for y in 0..height {
            data[y * width + x] = transposed[x * height + y];
        }
    }
}

fn integral_images(img: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let stride = w + 1;
    let mut sum = vec![0.0; stride * (h + 1)];
    let mut sum_sq = vec![0.0; stride * (h + 1)];
    for y in 0..h {
        let mut row = 0.0;
        let mut row_sq = 0.0;
        for x in 0..w {
            let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
            row += v;
            row_sq += v * v;
            sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
            sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
        }
    }
    (sum, sum_sq)
}
