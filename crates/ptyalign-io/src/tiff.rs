use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use tiff::{
    decoder::DecodingResult,
    encoder::{colortype, TiffEncoder},
    tags::Tag,
};

use ptyalign_image::{Image, ImageSize};
use ptyalign_register::{Reference, ReferenceSource};

use crate::error::IoError;

/// Side metadata attached to a reference image.
///
/// Persisted as JSON in the TIFF ImageDescription tag: the physical pixel
/// spacing and the rotation convention of the acquisition. A positive
/// rotation means the object must be rotated by that many degrees to match
/// the reference orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    /// Physical pixel spacing, same units in both axes.
    pub spacing: f64,
    /// Rotation hint in degrees.
    pub rotation: f64,
}

/// Read a TIFF image as a single precision floating point grayscale image.
///
/// 8-bit and 16-bit grayscale files are widened to f32.
///
/// # Arguments
///
/// * `file_path` - The path to the TIFF image.
///
/// # Returns
///
/// The single channel f32 image.
pub fn read_image_tiff_mono32f(file_path: impl AsRef<Path>) -> Result<Image<f32, 1>, IoError> {
    let (image, _) = read_image_tiff_impl(file_path)?;
    Ok(image)
}

/// Read a reference TIFF image together with its side metadata.
///
/// # Arguments
///
/// * `file_path` - The path to the TIFF image.
///
/// # Returns
///
/// The single channel f32 image and the metadata parsed from the
/// ImageDescription tag.
pub fn read_reference_tiff(
    file_path: impl AsRef<Path>,
) -> Result<(Image<f32, 1>, ReferenceMetadata), IoError> {
    let (image, description) = read_image_tiff_impl(file_path)?;

    let description = description.ok_or_else(|| {
        IoError::MissingMetadata("no ImageDescription tag in reference file".to_string())
    })?;
    let metadata: ReferenceMetadata = serde_json::from_str(&description)?;

    Ok((image, metadata))
}

fn read_image_tiff_impl(
    file_path: impl AsRef<Path>,
) -> Result<(Image<f32, 1>, Option<String>), IoError> {
    let file_path = file_path.as_ref().to_owned();
    if !file_path.exists() {
        return Err(IoError::FileDoesNotExist(file_path));
    }

    if file_path.extension().map_or(true, |ext| {
        !ext.eq_ignore_ascii_case("tiff") && !ext.eq_ignore_ascii_case("tif")
    }) {
        return Err(IoError::InvalidFileExtension(file_path));
    }

    let tiff_data = fs::File::open(file_path)?;
    let mut decoder = tiff::decoder::Decoder::new(tiff_data)?;

    let (width, height) = decoder.dimensions()?;
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();

    let data = match decoder.read_image()? {
        DecodingResult::F32(data) => data,
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        _ => return Err(IoError::UnsupportedTiffFormat),
    };

    let image = Image::new(
        ImageSize {
            width: width as usize,
            height: height as usize,
        },
        data,
    )?;

    Ok((image, description))
}

/// Write a TIFF image with a single precision grayscale color type.
///
/// # Arguments
///
/// * `file_path` - The path to the TIFF image.
/// * `image` - The f32 image to write.
pub fn write_image_tiff_mono32f(
    file_path: impl AsRef<Path>,
    image: &Image<f32, 1>,
) -> Result<(), IoError> {
    let file = fs::File::create(file_path)?;

    let mut encoder = TiffEncoder::new(file)?;
    encoder.write_image::<colortype::Gray32Float>(
        image.width() as u32,
        image.height() as u32,
        image.as_slice(),
    )?;

    Ok(())
}

/// Write a reference TIFF image with its side metadata.
///
/// The metadata is serialized as JSON into the ImageDescription tag, the way
/// [`read_reference_tiff`] expects it.
///
/// # Arguments
///
/// * `file_path` - The path to the TIFF image.
/// * `image` - The f32 reference image to write.
/// * `metadata` - The spacing and rotation metadata to attach.
pub fn write_reference_tiff(
    file_path: impl AsRef<Path>,
    image: &Image<f32, 1>,
    metadata: &ReferenceMetadata,
) -> Result<(), IoError> {
    let file = fs::File::create(file_path)?;

    let mut encoder = TiffEncoder::new(file)?;
    let mut tiff_image =
        encoder.new_image::<colortype::Gray32Float>(image.width() as u32, image.height() as u32)?;

    let description = serde_json::to_string(metadata)?;
    tiff_image
        .encoder()
        .write_tag(Tag::ImageDescription, description.as_str())?;

    tiff_image.write_data(image.as_slice())?;

    Ok(())
}

/// A [`ReferenceSource`] backed by a reference TIFF file with side metadata.
#[derive(Debug, Clone)]
pub struct TiffReferenceSource {
    path: PathBuf,
}

impl TiffReferenceSource {
    /// Create a source reading from the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReferenceSource for TiffReferenceSource {
    fn load_reference(&self) -> Result<Reference, Box<dyn std::error::Error + Send + Sync>> {
        let (image, metadata) = read_reference_tiff(&self.path)?;
        log::debug!(
            "loaded reference {} ({}, spacing {}, rotation {}°)",
            self.path.display(),
            image.size(),
            metadata.spacing,
            metadata.rotation
        );

        Ok(Reference {
            image,
            pixel_spacing: metadata.spacing,
            rotation_deg: metadata.rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoError;

    fn gradient_image(width: usize, height: usize) -> Image<f32, 1> {
        Image::new(
            ImageSize { width, height },
            (0..width * height).map(|i| i as f32 * 0.5).collect(),
        )
        .unwrap()
    }

    #[test]
    fn synthetic_write_read_mono32f() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("mono32f.tiff");

        let image = gradient_image(3, 4);
        write_image_tiff_mono32f(&file_path, &image)?;

        let image_back = read_image_tiff_mono32f(&file_path)?;
        assert_eq!(image_back.as_slice(), image.as_slice());
        assert_eq!(image_back.size(), image.size());

        Ok(())
    }

    #[test]
    fn synthetic_write_read_reference() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("reference.tif");

        let image = gradient_image(4, 4);
        let metadata = ReferenceMetadata {
            spacing: 0.25,
            rotation: -40.0,
        };
        write_reference_tiff(&file_path, &image, &metadata)?;

        let (image_back, metadata_back) = read_reference_tiff(&file_path)?;
        assert_eq!(image_back.as_slice(), image.as_slice());
        assert_eq!(metadata_back, metadata);

        Ok(())
    }

    #[test]
    fn reference_without_metadata_is_rejected() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("plain.tiff");

        write_image_tiff_mono32f(&file_path, &gradient_image(2, 2))?;

        assert!(matches!(
            read_reference_tiff(&file_path),
            Err(IoError::MissingMetadata(_))
        ));

        Ok(())
    }

    #[test]
    fn missing_file_is_rejected() {
        assert!(matches!(
            read_image_tiff_mono32f("does_not_exist.tiff"),
            Err(IoError::FileDoesNotExist(_))
        ));
    }

    #[test]
    fn wrong_extension_is_rejected() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("image.png");
        std::fs::write(&file_path, b"not a tiff")?;

        assert!(matches!(
            read_image_tiff_mono32f(&file_path),
            Err(IoError::InvalidFileExtension(_))
        ));

        Ok(())
    }

    #[test]
    fn source_loads_reference() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("reference.tiff");

        let image = gradient_image(4, 2);
        let metadata = ReferenceMetadata {
            spacing: 2.0,
            rotation: 15.0,
        };
        write_reference_tiff(&file_path, &image, &metadata)?;

        let source = TiffReferenceSource::new(&file_path);
        let reference = source.load_reference().expect("reference must load");
        assert_eq!(reference.image.as_slice(), image.as_slice());
        assert_eq!(reference.pixel_spacing, 2.0);
        assert_eq!(reference.rotation_deg, 15.0);

        Ok(())
    }
}
