use std::path::{Path, PathBuf};

use ptyalign_image::{Image, ImageError};
use ptyalign_register::OverlaySink;

use crate::error::IoError;

/// Blend factor of the warped object over the reference base layer.
const OVERLAY_ALPHA: f32 = 0.3;

/// Render the alignment overlay: the reference as a grayscale base layer and
/// the warped object as a semi-transparent warm overlay.
///
/// Both images are stretched to their finite min/max range; NaN object
/// pixels leave the base layer untouched.
///
/// # Errors
///
/// Returns an error when the two images differ in size.
pub fn render_overlay(
    warped: &Image<f32, 1>,
    reference: &Image<f32, 1>,
) -> Result<Image<u8, 3>, IoError> {
    if warped.size() != reference.size() {
        return Err(IoError::ImageCreationError(ImageError::InvalidImageSize(
            warped.cols(),
            warped.rows(),
            reference.cols(),
            reference.rows(),
        )));
    }

    let reference_range = finite_range(reference);
    let warped_range = finite_range(warped);

    let mut data = Vec::with_capacity(warped.numel() * 3);
    for (&object_value, &reference_value) in
        warped.as_slice().iter().zip(reference.as_slice().iter())
    {
        let base = stretch(reference_value, reference_range);
        let mut rgb = [base, base, base];

        if object_value.is_finite() {
            let intensity = stretch(object_value, warped_range);
            // warm tint for the overlay layer
            let overlay = [intensity, 0.4 * intensity, 0.1 * intensity];
            for (channel, &layer) in rgb.iter_mut().zip(overlay.iter()) {
                *channel = (1.0 - OVERLAY_ALPHA) * *channel + OVERLAY_ALPHA * layer;
            }
        }

        for channel in rgb {
            data.push((channel * 255.0).round().clamp(0.0, 255.0) as u8);
        }
    }

    Ok(Image::new(warped.size(), data)?)
}

/// Render the alignment overlay and persist it as a PNG file.
///
/// # Arguments
///
/// * `file_path` - The path of the PNG file to write.
/// * `warped` - The warped object image.
/// * `reference` - The reference image.
pub fn write_overlay_png(
    file_path: impl AsRef<Path>,
    warped: &Image<f32, 1>,
    reference: &Image<f32, 1>,
) -> Result<(), IoError> {
    let overlay = render_overlay(warped, reference)?;
    let size = overlay.size();

    let buffer: image::RgbImage =
        image::ImageBuffer::from_raw(size.width as u32, size.height as u32, overlay.into_vec())
            .ok_or_else(|| {
                IoError::PngEncodingError("overlay buffer has the wrong length".to_string())
            })?;

    buffer
        .save_with_format(file_path, image::ImageFormat::Png)
        .map_err(|e| IoError::PngEncodingError(e.to_string()))?;

    Ok(())
}

/// An [`OverlaySink`] that writes the overlay to a PNG file.
#[derive(Debug, Clone)]
pub struct PngOverlaySink {
    path: PathBuf,
}

impl PngOverlaySink {
    /// Create a sink writing to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OverlaySink for PngOverlaySink {
    fn render_overlay(
        &self,
        warped: &Image<f32, 1>,
        reference: &Image<f32, 1>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        write_overlay_png(&self.path, warped, reference)?;
        log::debug!("wrote alignment overlay to {}", self.path.display());
        Ok(())
    }
}

/// Minimum and maximum over the finite samples, or (0, 1) for an image with
/// no finite sample.
fn finite_range(image: &Image<f32, 1>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &value in image.as_slice() {
        if value.is_finite() {
            min = min.min(value);
            max = max.max(value);
        }
    }

    if min > max {
        (0.0, 1.0)
    } else {
        (min, max)
    }
}

/// Map a sample into [0, 1] given its image range.
fn stretch(value: f32, (min, max): (f32, f32)) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    if max > min {
        (value - min) / (max - min)
    } else {
        0.0
    }
}
