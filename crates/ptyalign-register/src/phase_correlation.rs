//! Translation estimation between two masked images.
//!
//! The residual shift between a reference and a moving image is found with
//! cross-correlation in the frequency domain:
//! 1. Subtract the masked mean from both images and zero everything outside
//!    the masks.
//! 2. Compute zero-padded 2D FFTs of both images and both masks.
//! 3. Invert the image cross-power spectrum (the correlation surface) and
//!    the mask cross-power spectrum (the per-shift valid-overlap counts).
//! 4. Take the overlap-normalized correlation peak among shifts whose
//!    overlap reaches the configured fraction of the best achievable one.
//!
//! The peak is reported at integer-pixel resolution.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use ptyalign_image::{Image, ImageError};
use ptyalign_imgproc::normalize::masked_mean_std;

use crate::error::RegisterError;

/// Configuration for masked translation estimation.
#[derive(Debug, Clone)]
pub struct PhaseCorrelationConfig {
    /// Minimum fraction of valid overlap below which a correlation peak is
    /// considered unreliable.
    pub min_overlap_ratio: f64,
}

impl Default for PhaseCorrelationConfig {
    fn default() -> Self {
        Self {
            min_overlap_ratio: 0.9,
        }
    }
}

/// Result of masked translation estimation.
#[derive(Debug, Clone)]
pub struct TranslationEstimate {
    /// Row shift to apply to the moving image, in pixels.
    pub dy: f64,
    /// Column shift to apply to the moving image, in pixels.
    pub dx: f64,
    /// Overlap-normalized correlation value at the peak.
    pub peak: f64,
    /// Valid overlap at the peak as a fraction of the best achievable one.
    pub overlap: f64,
}

/// Estimate the integer-pixel shift that aligns `moving` to `reference`.
///
/// The estimation is restricted to the intersection of the two validity
/// masks; non-finite samples inside a mask are treated as outside of it.
///
/// # Errors
///
/// Returns [`RegisterError::InsufficientOverlap`] when the masks overlap
/// less than `config.min_overlap_ratio` (relative to the smaller mask), or
/// when no candidate shift retains enough overlap. Shape mismatches between
/// the four inputs are image errors.
pub fn estimate_translation(
    reference: &Image<f32, 1>,
    moving: &Image<f32, 1>,
    reference_mask: &Image<bool, 1>,
    moving_mask: &Image<bool, 1>,
    config: &PhaseCorrelationConfig,
) -> Result<TranslationEstimate, RegisterError> {
    let size = reference.size();
    for other in [moving.size(), reference_mask.size(), moving_mask.size()] {
        if other != size {
            return Err(RegisterError::Image(ImageError::InvalidImageSize(
                size.width,
                size.height,
                other.width,
                other.height,
            )));
        }
    }

    // the coarse pre-alignment already centers the object, so the masks must
    // overlap substantially before any shift is applied
    let reference_count = reference_mask.as_slice().iter().filter(|&&m| m).count();
    let moving_count = moving_mask.as_slice().iter().filter(|&&m| m).count();
    let intersection = reference_mask
        .as_slice()
        .iter()
        .zip(moving_mask.as_slice().iter())
        .filter(|(&a, &b)| a && b)
        .count();

    let smaller = reference_count.min(moving_count);
    let overlap = if smaller > 0 {
        intersection as f64 / smaller as f64
    } else {
        0.0
    };
    if overlap < config.min_overlap_ratio {
        return Err(RegisterError::InsufficientOverlap {
            overlap,
            required: config.min_overlap_ratio,
        });
    }

    let (reference_mean, _) = masked_mean_std(reference, reference_mask)?;
    let (moving_mean, _) = masked_mean_std(moving, moving_mask)?;

    // pad to a power of two covering the full linear correlation range
    let n = (2 * size.height.max(size.width)).next_power_of_two();

    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut reference_spec = embed_masked(reference, reference_mask, reference_mean, n);
    let mut moving_spec = embed_masked(moving, moving_mask, moving_mean, n);
    let mut reference_mask_spec = embed_mask(reference_mask, n);
    let mut moving_mask_spec = embed_mask(moving_mask, n);

    for spectrum in [
        &mut reference_spec,
        &mut moving_spec,
        &mut reference_mask_spec,
        &mut moving_mask_spec,
    ] {
        fft_2d(spectrum, n, &forward);
    }

    // correlation surface and per-shift overlap counts
    let mut correlation = cross_spectrum(&reference_spec, &moving_spec);
    let mut overlap_counts = cross_spectrum(&reference_mask_spec, &moving_mask_spec);
    ifft_2d(&mut correlation, n, &inverse);
    ifft_2d(&mut overlap_counts, n, &inverse);

    let max_overlap = overlap_counts
        .iter()
        .map(|c| c.re)
        .fold(0.0f32, f32::max)
        .round() as f64;
    if max_overlap < 1.0 {
        return Err(RegisterError::InsufficientOverlap {
            overlap: 0.0,
            required: config.min_overlap_ratio,
        });
    }

    let count_threshold = (config.min_overlap_ratio * max_overlap).max(1.0);

    let mut best: Option<(usize, f64, f64)> = None;
    for (idx, (c, o)) in correlation.iter().zip(overlap_counts.iter()).enumerate() {
        let count = f64::from(o.re).round();
        if count < count_threshold {
            continue;
        }
        let score = f64::from(c.re) / count;
        if best.map_or(true, |(_, best_score, _)| score > best_score) {
            best = Some((idx, score, count));
        }
    }

    let (peak_idx, peak, peak_count) = best.ok_or(RegisterError::InsufficientOverlap {
        overlap: 0.0,
        required: config.min_overlap_ratio,
    })?;

    let dy = signed_shift(peak_idx / n, n);
    let dx = signed_shift(peak_idx % n, n);

    log::debug!(
        "translation estimate: dy={dy}, dx={dx}, peak={peak:.6}, overlap={peak_count}"
    );

    Ok(TranslationEstimate {
        dy: dy as f64,
        dx: dx as f64,
        peak,
        overlap: peak_count / max_overlap,
    })
}

/// Embed the masked, mean-subtracted image into an n x n complex buffer.
fn embed_masked(
    image: &Image<f32, 1>,
    mask: &Image<bool, 1>,
    mean: f64,
    n: usize,
) -> Vec<Complex<f32>> {
    let mut padded = vec![Complex::new(0.0f32, 0.0); n * n];
    let cols = image.cols();

    for (idx, (&value, &selected)) in image
        .as_slice()
        .iter()
        .zip(mask.as_slice().iter())
        .enumerate()
    {
        if selected && value.is_finite() {
            let (row, col) = (idx / cols, idx % cols);
            padded[row * n + col] = Complex::new((f64::from(value) - mean) as f32, 0.0);
        }
    }

    padded
}

/// Embed a boolean mask as 0/1 samples into an n x n complex buffer.
fn embed_mask(mask: &Image<bool, 1>, n: usize) -> Vec<Complex<f32>> {
    let mut padded = vec![Complex::new(0.0f32, 0.0); n * n];
    let cols = mask.cols();

    for (idx, &selected) in mask.as_slice().iter().enumerate() {
        if selected {
            let (row, col) = (idx / cols, idx % cols);
            padded[row * n + col] = Complex::new(1.0, 0.0);
        }
    }

    padded
}

/// Element-wise `A * conj(B)`.
fn cross_spectrum(a: &[Complex<f32>], b: &[Complex<f32>]) -> Vec<Complex<f32>> {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y.conj()).collect()
}

/// Compute a 2D FFT in place using row-column decomposition.
fn fft_2d(data: &mut [Complex<f32>], n: usize, fft: &Arc<dyn Fft<f32>>) {
    for row in 0..n {
        fft.process(&mut data[row * n..(row + 1) * n]);
    }
    transpose_inplace(data, n);
    for row in 0..n {
        fft.process(&mut data[row * n..(row + 1) * n]);
    }
    transpose_inplace(data, n);
}

/// Compute a normalized inverse 2D FFT in place.
fn ifft_2d(data: &mut [Complex<f32>], n: usize, fft: &Arc<dyn Fft<f32>>) {
    fft_2d(data, n, fft);
    let norm = 1.0 / (n * n) as f32;
    data.iter_mut().for_each(|c| *c = *c * norm);
}

/// In-place square matrix transpose.
fn transpose_inplace(data: &mut [Complex<f32>], n: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            data.swap(i * n + j, j * n + i);
        }
    }
}

/// Convert an FFT bin index to a signed shift, handling wraparound.
fn signed_shift(idx: usize, n: usize) -> isize {
    if idx > n / 2 {
        idx as isize - n as isize
    } else {
        idx as isize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptyalign_image::ImageSize;
    use rand::{Rng, SeedableRng};

    fn noise_image(size: ImageSize, seed: u64) -> Image<f32, 1> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let data = (0..size.width * size.height)
            .map(|_| rng.random::<f32>())
            .collect();
        Image::new(size, data).unwrap()
    }

    /// Shift image content by (dy, dx), filling vacated pixels with zero.
    fn shifted(image: &Image<f32, 1>, dy: isize, dx: isize) -> Image<f32, 1> {
        let (rows, cols) = (image.rows() as isize, image.cols() as isize);
        let mut data = vec![0.0f32; (rows * cols) as usize];
        for row in 0..rows {
            for col in 0..cols {
                let (src_row, src_col) = (row - dy, col - dx);
                if src_row >= 0 && src_row < rows && src_col >= 0 && src_col < cols {
                    data[(row * cols + col) as usize] =
                        image.as_slice()[(src_row * cols + src_col) as usize];
                }
            }
        }
        Image::new(image.size(), data).unwrap()
    }

    #[test]
    fn recovers_zero_shift() -> Result<(), RegisterError> {
        let size = ImageSize {
            width: 64,
            height: 64,
        };
        let image = noise_image(size, 3);
        let mask = Image::from_size_val(size, true)?;

        let estimate = estimate_translation(
            &image,
            &image,
            &mask,
            &mask,
            &PhaseCorrelationConfig::default(),
        )?;
        assert_eq!((estimate.dy, estimate.dx), (0.0, 0.0));

        Ok(())
    }

    #[test]
    fn recovers_known_integer_shift() -> Result<(), RegisterError> {
        let size = ImageSize {
            width: 64,
            height: 64,
        };
        let reference = noise_image(size, 7);
        // content displaced by (2, -3); aligning it back needs (-2, 3)
        let moving = shifted(&reference, 2, -3);
        let mask = Image::from_size_val(size, true)?;

        let estimate = estimate_translation(
            &reference,
            &moving,
            &mask,
            &mask,
            &PhaseCorrelationConfig::default(),
        )?;
        assert_eq!((estimate.dy, estimate.dx), (-2.0, 3.0));

        Ok(())
    }

    #[test]
    fn shift_is_intensity_invariant() -> Result<(), RegisterError> {
        let size = ImageSize {
            width: 64,
            height: 64,
        };
        let reference = noise_image(size, 11);
        let moving = shifted(&reference, 1, 2);
        let moving_rescaled = Image::new(
            size,
            moving.as_slice().iter().map(|&v| 5.0 * v + 100.0).collect(),
        )?;
        let mask = Image::from_size_val(size, true)?;

        let config = PhaseCorrelationConfig::default();
        let plain = estimate_translation(&reference, &moving, &mask, &mask, &config)?;
        let rescaled =
            estimate_translation(&reference, &moving_rescaled, &mask, &mask, &config)?;

        assert_eq!((plain.dy, plain.dx), (rescaled.dy, rescaled.dx));

        Ok(())
    }

    #[test]
    fn disjoint_masks_are_rejected() -> Result<(), RegisterError> {
        let size = ImageSize {
            width: 32,
            height: 32,
        };
        let image = noise_image(size, 5);

        let left: Vec<bool> = (0..size.width * size.height)
            .map(|i| i % size.width < size.width / 2)
            .collect();
        let right: Vec<bool> = left.iter().map(|&m| !m).collect();
        let left_mask = Image::new(size, left)?;
        let right_mask = Image::new(size, right)?;

        let result = estimate_translation(
            &image,
            &image,
            &left_mask,
            &right_mask,
            &PhaseCorrelationConfig::default(),
        );
        assert!(matches!(
            result,
            Err(RegisterError::InsufficientOverlap { .. })
        ));

        Ok(())
    }
}
