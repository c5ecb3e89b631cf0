//! Masked image alignment metrics.

use ptyalign_image::{Image, ImageError};

use crate::error::ImgprocError;

/// Compute the root mean squared error between two images inside a mask.
///
/// The RMSE is defined as:
///
/// `RMSE = sqrt(1/n * sum((I_1 - I_2)^2))`
///
/// where the sum runs over the `n` mask samples for which both images are
/// finite; non-finite pairs are excluded, consistent with the masked
/// statistics in [`crate::normalize`].
///
/// # Errors
///
/// Returns [`ImgprocError::EmptyMask`] when no finite pair is selected, and
/// a size mismatch error when the shapes differ.
///
/// # Example
///
/// ```
/// use ptyalign_image::{Image, ImageSize};
/// use ptyalign_imgproc::metrics::masked_rmse;
///
/// let size = ImageSize { width: 2, height: 1 };
/// let image1 = Image::<f32, 1>::new(size, vec![0.0, 1.0]).unwrap();
/// let image2 = Image::<f32, 1>::new(size, vec![0.0, 3.0]).unwrap();
/// let mask = Image::from_size_val(size, true).unwrap();
///
/// let rmse = masked_rmse(&image1, &image2, &mask).unwrap();
/// assert!((rmse - std::f64::consts::SQRT_2).abs() < 1e-6);
/// ```
pub fn masked_rmse(
    image1: &Image<f32, 1>,
    image2: &Image<f32, 1>,
    mask: &Image<bool, 1>,
) -> Result<f64, ImgprocError> {
    if image1.size() != image2.size() {
        return Err(ImgprocError::Image(ImageError::InvalidImageSize(
            image1.cols(),
            image1.rows(),
            image2.cols(),
            image2.rows(),
        )));
    }
    if image1.size() != mask.size() {
        return Err(ImgprocError::Image(ImageError::InvalidImageSize(
            image1.cols(),
            image1.rows(),
            mask.cols(),
            mask.rows(),
        )));
    }

    let mut count = 0usize;
    let mut sum_sq = 0.0f64;

    for ((&a, &b), &selected) in image1
        .as_slice()
        .iter()
        .zip(image2.as_slice().iter())
        .zip(mask.as_slice().iter())
    {
        if selected && a.is_finite() && b.is_finite() {
            let diff = f64::from(a) - f64::from(b);
            count += 1;
            sum_sq += diff * diff;
        }
    }

    if count == 0 {
        return Err(ImgprocError::EmptyMask);
    }

    Ok((sum_sq / count as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::masked_rmse;
    use crate::error::ImgprocError;
    use ptyalign_image::{Image, ImageSize};

    #[test]
    fn identical_images_have_zero_error() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 3,
            height: 2,
        };
        let image = Image::<f32, 1>::new(size, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;
        let mask = Image::from_size_val(size, true)?;

        assert_eq!(masked_rmse(&image, &image, &mask)?, 0.0);

        Ok(())
    }

    #[test]
    fn error_restricted_to_mask() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 2,
            height: 1,
        };
        let image1 = Image::<f32, 1>::new(size, vec![0.0, 0.0])?;
        let image2 = Image::<f32, 1>::new(size, vec![2.0, 100.0])?;
        let mask = Image::new(size, vec![true, false])?;

        assert_eq!(masked_rmse(&image1, &image2, &mask)?, 2.0);

        Ok(())
    }

    #[test]
    fn empty_mask_is_an_error() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 2,
            height: 1,
        };
        let image = Image::<f32, 1>::from_size_val(size, 1.0)?;
        let mask = Image::from_size_val(size, false)?;

        assert!(matches!(
            masked_rmse(&image, &image, &mask),
            Err(ImgprocError::EmptyMask)
        ));

        Ok(())
    }
}
