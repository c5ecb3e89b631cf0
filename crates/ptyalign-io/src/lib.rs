#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the io module.
pub mod error;

/// overlay rendering of alignment results.
pub mod overlay;

/// TIFF reading and writing with reference metadata.
pub mod tiff;

pub use crate::error::IoError;
pub use crate::overlay::{write_overlay_png, PngOverlaySink};
pub use crate::tiff::{
    read_image_tiff_mono32f, read_reference_tiff, write_image_tiff_mono32f,
    write_reference_tiff, ReferenceMetadata, TiffReferenceSource,
};
