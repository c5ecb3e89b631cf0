/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(std::path::PathBuf),

    /// Invalid file extension.
    #[error("File does not have a valid extension: {0}")]
    InvalidFileExtension(std::path::PathBuf),

    /// Error to open the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error with TIFF encoding/decoding.
    #[error("Error with TIFF encoding/decoding. {0}")]
    TiffError(#[from] tiff::TiffError),

    /// Error when the TIFF sample format is not supported.
    #[error("Unsupported TIFF sample format")]
    UnsupportedTiffFormat,

    /// Error when the reference metadata is missing.
    #[error("Reference metadata is missing. {0}")]
    MissingMetadata(String),

    /// Error to parse the reference metadata.
    #[error("Failed to parse the reference metadata. {0}")]
    MetadataParseError(#[from] serde_json::Error),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] ptyalign_image::ImageError),

    /// Error to encode the PNG image.
    #[error("Failed to encode the png image. {0}")]
    PngEncodingError(String),
}
