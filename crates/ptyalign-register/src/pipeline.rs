//! The end-to-end alignment pipeline.
//!
//! A single `align` call walks a fixed progression:
//! coarse scale normalization → recentering → known rotation → masked
//! correlation translation lock → bounded local refinement → final error.
//! Successive transforms are combined by left-multiplication, so each stage
//! composes on top of everything before it. Any stage failure aborts the run
//! and propagates unmodified; there is no retry or partial-result recovery.

use ptyalign_image::Image;
use ptyalign_imgproc::interpolation::InterpolationMode;
use ptyalign_imgproc::metrics::masked_rmse;
use ptyalign_imgproc::normalize::normalize_within_mask;
use ptyalign_imgproc::warp::{validity_mask, warp_similarity, SimilarityTransform};

use crate::error::RegisterError;
use crate::phase_correlation::{estimate_translation, PhaseCorrelationConfig};
use crate::refine::{refine, RefinementBounds, RefinementConfig};

/// A reference image with its acquisition metadata.
#[derive(Debug, Clone)]
pub struct Reference {
    /// The reference pixel data.
    pub image: Image<f32, 1>,
    /// Physical pixel spacing of the reference, same units as the object's.
    pub pixel_spacing: f64,
    /// Rotation hint in degrees: the rotation to apply to the object, about
    /// the reference center, to match the reference orientation.
    pub rotation_deg: f64,
}

/// Collaborator that produces the reference image and its metadata.
pub trait ReferenceSource {
    /// Load the reference image, its physical pixel spacing and the known
    /// rotation hint.
    fn load_reference(&self) -> Result<Reference, Box<dyn std::error::Error + Send + Sync>>;
}

/// Collaborator that renders a visual overlay of an alignment result.
///
/// Purely observational: the pipeline logs and ignores its failures.
pub trait OverlaySink {
    /// Render the warped object over the reference.
    fn render_overlay(
        &self,
        warped: &Image<f32, 1>,
        reference: &Image<f32, 1>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// An [`OverlaySink`] that drops the overlay.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardOverlay;

impl OverlaySink for DiscardOverlay {
    fn render_overlay(
        &self,
        _warped: &Image<f32, 1>,
        _reference: &Image<f32, 1>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Configuration for an alignment run.
#[derive(Debug, Clone)]
pub struct AlignmentConfig {
    /// Settings for the translation lock.
    pub correlation: PhaseCorrelationConfig,
    /// Residual-evaluation budget for the refinement stage.
    pub refinement_evaluations: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            correlation: PhaseCorrelationConfig::default(),
            refinement_evaluations: 50,
        }
    }
}

/// Result of an alignment run.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// The object warped onto the reference grid.
    pub warped: Image<f32, 1>,
    /// The unmodified reference image.
    pub reference: Image<f32, 1>,
    /// Masked RMSE between the normalized warped object and the normalized
    /// reference.
    pub rmse: f64,
    /// The final object-to-reference transform.
    pub transform: SimilarityTransform,
}

/// Align a reconstructed object image onto a reference.
///
/// # Arguments
///
/// * `object` - The object image to register.
/// * `object_spacing` - Physical pixel spacing of the object, same units as
///   the reference's.
/// * `source` - Collaborator producing the reference image and metadata.
/// * `sink` - Collaborator rendering the result overlay; use
///   [`DiscardOverlay`] when no rendering is wanted.
/// * `config` - Correlation and refinement settings.
///
/// # Errors
///
/// Propagates collaborator, warp, overlap and normalization failures; a
/// failure at any stage aborts the run.
pub fn align(
    object: &Image<f32, 1>,
    object_spacing: f64,
    source: &dyn ReferenceSource,
    sink: &dyn OverlaySink,
    config: &AlignmentConfig,
) -> Result<AlignmentResult, RegisterError> {
    let Reference {
        image: reference,
        pixel_spacing: reference_spacing,
        rotation_deg,
    } = source.load_reference().map_err(RegisterError::Source)?;

    let out_size = reference.size();
    let center_in = (object.rows() as f64 / 2.0, object.cols() as f64 / 2.0);
    let center_out = (out_size.height as f64 / 2.0, out_size.width as f64 / 2.0);

    // coarse transform: scale to the reference sampling, recenter, then
    // apply the known rotation
    let scale = object_spacing / reference_spacing;
    let zoom = SimilarityTransform::from_params(scale, 0.0, 0.0, 0.0, center_in);

    let mapped_center = zoom.apply(center_in);
    let shift = (center_out.0 - mapped_center.0, center_out.1 - mapped_center.1);
    let recenter = SimilarityTransform::from_params(1.0, 0.0, shift.0, shift.1, center_out);

    let rotate = SimilarityTransform::from_params(1.0, rotation_deg, 0.0, 0.0, center_out);

    let coarse = rotate.compose(&recenter.compose(&zoom));
    log::debug!("coarse transform: {coarse} (scale ratio {scale:.4}, rotation hint {rotation_deg:.2}°)");

    // lock the translation with masked correlation; the warped object's mask
    // approximates the shared support, so it serves both sides
    let mut warped = Image::from_size_val(out_size, f32::NAN)?;
    warp_similarity(object, &mut warped, &coarse, InterpolationMode::Bilinear)?;
    let mask = validity_mask(object.size(), &coarse, out_size)?;

    let estimate = estimate_translation(&reference, &warped, &mask, &mask, &config.correlation)?;
    let translation =
        SimilarityTransform::from_params(1.0, 0.0, estimate.dy, estimate.dx, center_out);
    let locked = translation.compose(&coarse);
    log::debug!(
        "translation locked: dy={}, dx={} (peak {:.4})",
        estimate.dy,
        estimate.dx,
        estimate.peak
    );

    // bounded local refinement on top of the locked transform
    let refinement_config = RefinementConfig::new(
        RefinementBounds::for_reference_spacing(reference_spacing),
        config.refinement_evaluations,
    );
    let refinement = refine(object, &reference, &locked, center_out, &refinement_config)?;
    let correction = SimilarityTransform::from_params(
        refinement.params.scale,
        refinement.params.rotation_deg,
        refinement.params.dy,
        refinement.params.dx,
        center_out,
    );
    let transform = correction.compose(&locked);
    log::debug!(
        "refined in {} evaluations ({:?}): scale={:.4}, rot={:.3}°, dy={:.2}, dx={:.2}",
        refinement.evaluations,
        refinement.termination,
        refinement.params.scale,
        refinement.params.rotation_deg,
        refinement.params.dy,
        refinement.params.dx
    );

    // final warp and intensity-invariant error
    let mut warped = Image::from_size_val(out_size, f32::NAN)?;
    warp_similarity(object, &mut warped, &transform, InterpolationMode::Bilinear)?;
    let mask = validity_mask(object.size(), &transform, out_size)?;

    let warped_norm = normalize_within_mask(&warped, &mask)?;
    let reference_norm = normalize_within_mask(&reference, &mask)?;
    let rmse = masked_rmse(&warped_norm, &reference_norm, &mask)?;
    log::debug!("alignment finished: rmse={rmse:.6}");

    if let Err(err) = sink.render_overlay(&warped, &reference) {
        log::warn!("overlay rendering failed: {err}");
    }

    Ok(AlignmentResult {
        warped,
        reference,
        rmse,
        transform,
    })
}
