//! Geometric warping under similarity transforms.
//!
//! Warping is performed backwards: the transform maps source coordinates to
//! destination coordinates, so each destination pixel samples the source at
//! the inverse-mapped location. Destination pixels whose source coordinate
//! falls outside the source support are filled with `f32::NAN`; the sentinel
//! is what validity masks and masked statistics key on.

mod similarity;

pub use similarity::SimilarityTransform;

use ptyalign_image::{Image, ImageSize};

use crate::error::ImgprocError;
use crate::interpolation::{interpolate_pixel, InterpolationMode};
use crate::parallel;

/// Coverage threshold above which a warped all-ones pixel counts as valid.
const MASK_COVERAGE_THRESHOLD: f32 = 0.5;

/// Warp an image under a similarity transform.
///
/// # Arguments
///
/// * `src` - The input image with shape (height, width, C).
/// * `dst` - The output image; its shape defines the output canvas.
/// * `transform` - The source-to-destination similarity transform.
/// * `interpolation` - The interpolation mode to use.
///
/// # Errors
///
/// Returns [`ImgprocError::SingularTransform`] when the linear part of
/// `transform` is not invertible.
///
/// # Example
///
/// ```
/// use ptyalign_image::{Image, ImageSize};
/// use ptyalign_imgproc::interpolation::InterpolationMode;
/// use ptyalign_imgproc::warp::{warp_similarity, SimilarityTransform};
///
/// let src = Image::<f32, 1>::from_size_val(
///     ImageSize {
///         width: 4,
///         height: 5,
///     },
///     1.0,
/// )
/// .unwrap();
///
/// let mut dst = Image::<f32, 1>::from_size_val(src.size(), 0.0).unwrap();
///
/// warp_similarity(
///     &src,
///     &mut dst,
///     &SimilarityTransform::identity(),
///     InterpolationMode::Bilinear,
/// )
/// .unwrap();
///
/// assert_eq!(dst.as_slice(), src.as_slice());
/// ```
pub fn warp_similarity<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    transform: &SimilarityTransform,
    interpolation: InterpolationMode,
) -> Result<(), ImgprocError> {
    // invert the transform to find corresponding positions in src from dst
    let inverse = transform.inverse()?;

    let max_y = (src.rows() - 1) as f64;
    let max_x = (src.cols() - 1) as f64;

    parallel::par_iter_rows_indexed(dst, |row, row_chunk| {
        for (col, pixel) in row_chunk.chunks_exact_mut(C).enumerate() {
            let (src_y, src_x) = inverse.apply((row as f64, col as f64));

            // a pixel is valid only when its full bilinear support lies
            // inside the source image
            if src_y >= 0.0 && src_y <= max_y && src_x >= 0.0 && src_x <= max_x {
                for (k, value) in pixel.iter_mut().enumerate() {
                    *value = interpolate_pixel(src, src_x as f32, src_y as f32, k, interpolation);
                }
            } else {
                pixel.fill(f32::NAN);
            }
        }
    });

    Ok(())
}

/// Derive the validity mask of a warp.
///
/// An all-ones image of `src_size` is warped with the same transform and
/// thresholded at 0.5 coverage; the NaN out-of-bounds sentinel never passes
/// the threshold.
///
/// # Arguments
///
/// * `src_size` - The size of the source image the warp samples from.
/// * `transform` - The source-to-destination similarity transform.
/// * `out_size` - The size of the warped canvas.
///
/// # Errors
///
/// Returns [`ImgprocError::SingularTransform`] when the linear part of
/// `transform` is not invertible.
pub fn validity_mask(
    src_size: ImageSize,
    transform: &SimilarityTransform,
    out_size: ImageSize,
) -> Result<Image<bool, 1>, ImgprocError> {
    let ones = Image::<f32, 1>::from_size_val(src_size, 1.0)?;
    let mut coverage = Image::<f32, 1>::from_size_val(out_size, f32::NAN)?;
    warp_similarity(&ones, &mut coverage, transform, InterpolationMode::Bilinear)?;

    let mask = coverage
        .as_slice()
        .iter()
        .map(|&v| v.is_finite() && v > MASK_COVERAGE_THRESHOLD)
        .collect();

    Ok(Image::new(out_size, mask)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptyalign_image::{Image, ImageSize};

    #[test]
    fn warp_identity_preserves_pixels() -> Result<(), ImgprocError> {
        let image = Image::<f32, 1>::new(
            ImageSize {
                width: 4,
                height: 5,
            },
            (0..20).map(|x| x as f32).collect(),
        )?;

        let mut warped = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;
        warp_similarity(
            &image,
            &mut warped,
            &SimilarityTransform::identity(),
            InterpolationMode::Bilinear,
        )?;

        assert_eq!(warped.as_slice(), image.as_slice());

        Ok(())
    }

    #[test]
    fn warp_rot90_nearest() -> Result<(), ImgprocError> {
        let image = Image::<f32, 1>::new(
            ImageSize {
                width: 2,
                height: 2,
            },
            vec![0.0f32, 1.0, 2.0, 3.0],
        )?;

        let mut warped = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;
        warp_similarity(
            &image,
            &mut warped,
            &SimilarityTransform::from_params(1.0, 90.0, 0.0, 0.0, (0.5, 0.5)),
            InterpolationMode::Nearest,
        )?;

        assert_eq!(warped.as_slice(), &[1.0, 3.0, 0.0, 2.0]);

        Ok(())
    }

    #[test]
    fn warp_fills_nan_outside_source() -> Result<(), ImgprocError> {
        let image = Image::<f32, 1>::from_size_val(
            ImageSize {
                width: 4,
                height: 4,
            },
            1.0,
        )?;

        // shift by 2 rows: the top two output rows have no source support
        let shift = SimilarityTransform::from_params(1.0, 0.0, 2.0, 0.0, (0.0, 0.0));
        let mut warped = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;
        warp_similarity(&image, &mut warped, &shift, InterpolationMode::Bilinear)?;

        for row in 0..4 {
            for col in 0..4 {
                let value = warped.as_slice()[row * 4 + col];
                if row < 2 {
                    assert!(value.is_nan());
                } else {
                    assert_eq!(value, 1.0);
                }
            }
        }

        Ok(())
    }

    #[test]
    fn warp_round_trip_inverse() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 32,
            height: 32,
        };
        // smooth ramp so interpolation error stays small
        let image = Image::<f32, 1>::new(
            size,
            (0..size.height * size.width)
                .map(|i| {
                    let (r, c) = (i / size.width, i % size.width);
                    (r as f32) * 0.5 + (c as f32) * 0.25
                })
                .collect(),
        )?;

        let transform = SimilarityTransform::from_params(1.1, 10.0, 1.5, -2.0, (15.5, 15.5));
        let mut forward = Image::<f32, 1>::from_size_val(size, 0.0)?;
        warp_similarity(&image, &mut forward, &transform, InterpolationMode::Bilinear)?;

        // replace NaN sentinels so the backward pass can interpolate
        let forward_clean = Image::<f32, 1>::new(
            size,
            forward
                .as_slice()
                .iter()
                .map(|&v| if v.is_finite() { v } else { 0.0 })
                .collect(),
        )?;

        let mut back = Image::<f32, 1>::from_size_val(size, 0.0)?;
        warp_similarity(
            &forward_clean,
            &mut back,
            &transform.inverse()?,
            InterpolationMode::Bilinear,
        )?;

        // compare only where the backward pass had source support, a few
        // pixels away from the border where the forward NaN fill leaks into
        // the backward interpolation
        let back_mask = validity_mask(size, &transform.inverse()?, size)?;
        let mut compared = 0usize;
        for row in 3..size.height - 3 {
            for col in 3..size.width - 3 {
                let idx = row * size.width + col;
                if back_mask.as_slice()[idx] {
                    let diff = (back.as_slice()[idx] - image.as_slice()[idx]).abs();
                    assert!(diff < 0.1, "pixel ({row}, {col}) differs by {diff}");
                    compared += 1;
                }
            }
        }
        assert!(compared > 100);

        Ok(())
    }

    #[test]
    fn warp_rejects_singular_transform() -> Result<(), ImgprocError> {
        let image = Image::<f32, 1>::from_size_val(
            ImageSize {
                width: 4,
                height: 4,
            },
            1.0,
        )?;
        let mut warped = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;

        let degenerate = SimilarityTransform::from_params(0.0, 0.0, 0.0, 0.0, (2.0, 2.0));
        let result = warp_similarity(
            &image,
            &mut warped,
            &degenerate,
            InterpolationMode::Bilinear,
        );
        assert!(matches!(result, Err(ImgprocError::SingularTransform(_))));

        Ok(())
    }

    #[test]
    fn validity_mask_identity_is_full() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 6,
            height: 4,
        };
        let mask = validity_mask(size, &SimilarityTransform::identity(), size)?;
        assert!(mask.as_slice().iter().all(|&m| m));

        Ok(())
    }

    #[test]
    fn validity_mask_tracks_shift() -> Result<(), ImgprocError> {
        let size = ImageSize {
            width: 4,
            height: 4,
        };
        let shift = SimilarityTransform::from_params(1.0, 0.0, 2.0, 0.0, (0.0, 0.0));
        let mask = validity_mask(size, &shift, size)?;

        for row in 0..4 {
            for col in 0..4 {
                assert_eq!(mask.as_slice()[row * 4 + col], row >= 2);
            }
        }

        Ok(())
    }
}
