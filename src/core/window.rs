//! Window functions for frame segmentation and overlap-add resynthesis.
//!
//! Provides Hamming, Hann, Blackman, Gaussian and Kaiser windows. The
//! engines default to the sum-normalised Hamming window: its endpoints are
//! non-zero, which keeps the overlap-add envelope away from the
//! division-by-zero boundary, and its envelope is near-constant for hops of
//! half the frame length or less.

use std::f64::consts::PI;

/// Hamming `a0` coefficient (exact rational form).
const HAMMING_A0: f64 = 25.0 / 46.0;
/// Blackman `alpha` coefficient.
const BLACKMAN_ALPHA: f64 = 0.16;

/// Window function types.
///
/// Parameterised variants carry their parameter as a scaled integer so the
/// type stays `Eq`/`Hash`-friendly: `Gaussian(500)` means sigma 0.5,
/// `Kaiser(255)` means alpha 2.55.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Hamming,
    Hann,
    Blackman,
    Gaussian(u32), // sigma scaled by 1000 (e.g., 500 = 0.5)
    Kaiser(u32),   // alpha scaled by 100 (e.g., 255 = 2.55)
}

/// Generates a window of the specified type and size.
///
/// With `normalize_sum` the values are scaled so they sum to one, which is
/// what the overlap-add engines expect of their default kernel.
pub fn generate_window(window_type: WindowType, size: usize, normalize_sum: bool) -> Vec<f32> {
    let mut win = match window_type {
        WindowType::Hamming => raised_cosine_window(size, HAMMING_A0),
        WindowType::Hann => raised_cosine_window(size, 0.5),
        WindowType::Blackman => blackman_window(size),
        WindowType::Gaussian(sigma_1000) => gaussian_window(size, f64::from(sigma_1000) / 1000.0),
        WindowType::Kaiser(alpha_100) => kaiser_window(size, f64::from(alpha_100) / 100.0),
    };
    if normalize_sum {
        normalize_window_sum(&mut win);
    }
    win
}

/// Returns `Some(trivial_window)` for degenerate sizes (0 or 1), or `None`
/// to indicate the caller should compute the full window.
#[inline]
fn trivial_window(size: usize) -> Option<Vec<f32>> {
    match size {
        0 => Some(vec![]),
        1 => Some(vec![1.0]),
        _ => None,
    }
}

/// Generates the `a0 - (1-a0)·cos(2πn/(N-1))` family: Hamming for
/// `a0 = 25/46`, Hann for `a0 = 0.5`.
#[inline]
fn raised_cosine_window(size: usize, a0: f64) -> Vec<f32> {
    if let Some(w) = trivial_window(size) {
        return w;
    }
    let n = size as f64;
    (0..size)
        .map(|i| {
            let x = (2.0 * PI * i as f64) / (n - 1.0);
            (a0 - (1.0 - a0) * x.cos()) as f32
        })
        .collect()
}

/// Generates a Blackman window.
#[inline]
fn blackman_window(size: usize) -> Vec<f32> {
    if let Some(w) = trivial_window(size) {
        return w;
    }
    let n = size as f64;
    let a0 = (1.0 - BLACKMAN_ALPHA) * 0.5;
    (0..size)
        .map(|i| {
            let x = i as f64 / (n - 1.0);
            let w = a0 - 0.5 * (2.0 * PI * x).cos() + 0.5 * BLACKMAN_ALPHA * (4.0 * PI * x).cos();
            w as f32
        })
        .collect()
}

/// Generates a Gaussian window with the given sigma (fraction of the
/// half-width).
#[inline]
fn gaussian_window(size: usize, sigma: f64) -> Vec<f32> {
    if let Some(w) = trivial_window(size) {
        return w;
    }
    let half = (size / 2) as f64;
    (0..size)
        .map(|i| {
            let d = (i as f64 - half) / (sigma * half);
            (-0.5 * d * d).exp() as f32
        })
        .collect()
}

/// Generates a Kaiser window using the zeroth-order modified Bessel function.
#[inline]
fn kaiser_window(size: usize, alpha: f64) -> Vec<f32> {
    if let Some(w) = trivial_window(size) {
        return w;
    }
    let n = size as f64;
    let pi_alpha = PI * alpha;
    let denom = bessel_i0(pi_alpha);
    (0..size)
        .map(|i| {
            let x = 2.0 * i as f64 / (n - 1.0) - 1.0;
            let arg = pi_alpha * (1.0 - x * x).max(0.0).sqrt();
            (bessel_i0(arg) / denom) as f32
        })
        .collect()
}

/// Maximum number of series terms for Bessel I0 convergence.
const BESSEL_MAX_TERMS: usize = 30;
/// Relative convergence threshold for Bessel I0 series.
const BESSEL_CONVERGENCE: f64 = 1e-15;

/// Zeroth-order modified Bessel function of the first kind.
/// Computed via series expansion.
#[inline]
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_half = x / 2.0;
    for k in 1..BESSEL_MAX_TERMS {
        term *= (x_half / k as f64) * (x_half / k as f64);
        sum += term;
        if term < BESSEL_CONVERGENCE * sum {
            break;
        }
    }
    sum
}

/// Scales a window in-place so its values sum to one.
pub fn normalize_window_sum(window: &mut [f32]) {
    let sum: f32 = window.iter().sum();
    if sum > 0.0 {
        for w in window.iter_mut() {
            *w /= sum;
        }
    }
}

/// Applies a window function to a slice in-place.
#[inline]
pub fn apply_window(data: &mut [f32], window: &[f32]) {
    for (sample, &w) in data.iter_mut().zip(window.iter()) {
        *sample *= w;
    }
}
