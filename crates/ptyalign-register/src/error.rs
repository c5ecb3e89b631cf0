use ptyalign_image::ImageError;
use ptyalign_imgproc::ImgprocError;

/// An error type for the register module.
#[derive(thiserror::Error, Debug)]
pub enum RegisterError {
    /// Error when the validity masks do not overlap enough for translation
    /// estimation.
    #[error("Insufficient mask overlap for translation estimation: {overlap:.3} < {required:.3}")]
    InsufficientOverlap {
        /// The observed overlap fraction.
        overlap: f64,
        /// The configured minimum overlap fraction.
        required: f64,
    },

    /// Error coming from the imgproc module.
    #[error(transparent)]
    Imgproc(#[from] ImgprocError),

    /// Error coming from the image module.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error reported by the reference source collaborator.
    #[error("Failed to load the reference. {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}
