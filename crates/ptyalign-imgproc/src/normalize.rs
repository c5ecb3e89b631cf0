//! Intensity standardization restricted to a validity mask.
//!
//! Warped images carry NaN sentinels outside their source support; the
//! statistics here exclude those samples instead of propagating them.

use num_traits::Float;

use ptyalign_image::{Image, ImageError};

use crate::error::ImgprocError;
use crate::parallel;

/// Floor added to the standard deviation to avoid division by a near-zero
/// variance on flat image content.
pub const NORMALIZATION_EPS: f64 = 1e-6;

/// Compute mean and standard deviation of an image restricted to a mask.
///
/// Non-finite samples inside the mask are excluded from the statistics, not
/// treated as zero. The standard deviation is the population deviation.
///
/// # Errors
///
/// Returns [`ImgprocError::EmptyMask`] when the mask selects no finite
/// sample, and a size mismatch error when image and mask shapes differ.
pub fn masked_mean_std<T>(
    src: &Image<T, 1>,
    mask: &Image<bool, 1>,
) -> Result<(f64, f64), ImgprocError>
where
    T: Float + Into<f64> + Clone,
{
    if src.size() != mask.size() {
        return Err(ImgprocError::Image(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            mask.cols(),
            mask.rows(),
        )));
    }

    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for (&value, &selected) in src.as_slice().iter().zip(mask.as_slice().iter()) {
        if selected && value.is_finite() {
            let value: f64 = value.into();
            count += 1;
            sum += value;
            sum_sq += value * value;
        }
    }

    if count == 0 {
        return Err(ImgprocError::EmptyMask);
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);

    Ok((mean, variance.sqrt()))
}

/// Standardize an image with statistics gathered inside a mask.
///
/// Returns `(image - mean) / (std + eps)` over the full image, where mean
/// and std are computed by [`masked_mean_std`]; samples outside the mask are
/// rescaled with the same statistics and NaN samples stay NaN.
///
/// # Errors
///
/// Returns [`ImgprocError::EmptyMask`] when the mask selects no finite
/// sample.
pub fn normalize_within_mask(
    src: &Image<f32, 1>,
    mask: &Image<bool, 1>,
) -> Result<Image<f32, 1>, ImgprocError> {
    let (mean, std) = masked_mean_std(src, mask)?;
    let denom = std + NORMALIZATION_EPS;

    let mut dst = Image::from_size_val(src.size(), 0.0f32)?;
    parallel::par_iter_rows(src, &mut dst, |src_pixel, dst_pixel| {
        dst_pixel[0] = ((f64::from(src_pixel[0]) - mean) / denom) as f32;
    });

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptyalign_image::ImageSize;

    fn checkerboard_mask(size: ImageSize) -> Image<bool, 1> {
        let data = (0..size.width * size.height)
            .map(|i| (i / size.width + i % size.width) % 2 == 0)
            .collect();
        Image::new(size, data).unwrap()
    }

    #[test]
    fn masked_statistics() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let image = Image::<f32, 1>::new(size, vec![1.0, 100.0, 100.0, 3.0])?;
        let mask = checkerboard_mask(size);

        // only the diagonal (1.0 and 3.0) is selected
        let (mean, std) = masked_mean_std(&image, &mask)?;
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);

        Ok(())
    }

    #[test]
    fn nan_inside_mask_is_excluded() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 3,
            height: 1,
        };
        let image = Image::<f32, 1>::new(size, vec![2.0, f32::NAN, 4.0])?;
        let mask = Image::from_size_val(size, true)?;

        let (mean, _) = masked_mean_std(&image, &mask)?;
        assert_eq!(mean, 3.0);

        Ok(())
    }

    #[test]
    fn empty_mask_is_an_error() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let image = Image::<f32, 1>::from_size_val(size, 1.0)?;
        let mask = Image::from_size_val(size, false)?;

        assert!(matches!(
            masked_mean_std(&image, &mask),
            Err(ImgprocError::EmptyMask)
        ));

        // an all-NaN image behaves like an empty mask
        let nan_image = Image::<f32, 1>::from_size_val(size, f32::NAN)?;
        let full_mask = Image::from_size_val(size, true)?;
        assert!(matches!(
            masked_mean_std(&nan_image, &full_mask),
            Err(ImgprocError::EmptyMask)
        ));

        Ok(())
    }

    #[test]
    fn normalized_output_is_standardized() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 8,
            height: 8,
        };
        let image = Image::<f32, 1>::new(
            size,
            (0..size.width * size.height).map(|i| i as f32 * 0.3).collect(),
        )?;
        let mask = checkerboard_mask(size);

        let normalized = normalize_within_mask(&image, &mask)?;
        let (mean, std) = masked_mean_std(&normalized, &mask)?;

        assert!(mean.abs() < 1e-5);
        assert!((std - 1.0).abs() < 1e-4);

        Ok(())
    }
}
