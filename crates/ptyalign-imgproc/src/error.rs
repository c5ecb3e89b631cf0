use ptyalign_image::ImageError;

/// An error type for the imgproc module.
#[derive(thiserror::Error, Debug)]
pub enum ImgprocError {
    /// Error when the linear part of a transform cannot be inverted.
    #[error("Transform is not invertible (determinant {0})")]
    SingularTransform(f64),

    /// Error when a validity mask selects no finite pixels.
    #[error("Mask selects no finite pixels")]
    EmptyMask,

    /// Error coming from the image module.
    #[error(transparent)]
    Image(#[from] ImageError),
}
