use image::{imageops, imageops::FilterType, GrayImage, ImageFormat, RgbImage};
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::error::{ClassifierError, Result};

/// MIME types accepted at the engine boundary. DICOM passes the gate but the
/// decoder has no support for it, so such inputs still fail as unreadable.
pub const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "application/dicom"];

/// An inbound image, either a file on disk or an in-memory upload
#[derive(Debug, Clone, Copy)]
pub enum ImageInput<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Path> for ImageInput<'a> {
    fn from(path: &'a Path) -> Self {
        ImageInput::Path(path)
    }
}

impl<'a> From<&'a PathBuf> for ImageInput<'a> {
    fn from(path: &'a PathBuf) -> Self {
        ImageInput::Path(path.as_path())
    }
}

impl<'a> From<&'a [u8]> for ImageInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ImageInput::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for ImageInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        ImageInput::Bytes(bytes.as_slice())
    }
}

impl ImageInput<'_> {
    pub fn describe(&self) -> String {
        match self {
            ImageInput::Path(path) => path.display().to_string(),
            ImageInput::Bytes(bytes) => format!("<{} byte buffer>", bytes.len()),
        }
    }
}

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Load, grayscale, resize to `size`×`size` and scale to [0, 1]
    pub fn preprocess<P: AsRef<Path>>(path: P, size: u32) -> Result<Array2<f32>> {
        let gray = Self::load_gray(ImageInput::Path(path.as_ref()))?;
        Ok(Self::to_matrix(&gray, size))
    }

    pub fn preprocess_bytes(bytes: &[u8], size: u32) -> Result<Array2<f32>> {
        let gray = Self::load_gray(ImageInput::Bytes(bytes))?;
        Ok(Self::to_matrix(&gray, size))
    }

    /// Resolve the MIME type of an input and check it against the whitelist
    pub fn check_mime(input: ImageInput<'_>) -> Result<&'static str> {
        let mime = match input {
            ImageInput::Path(path) => mime_guess::from_path(path)
                .iter()
                .find_map(|m| SUPPORTED_MIME_TYPES.iter().copied().find(|s| *s == m.essence_str())),
            ImageInput::Bytes(bytes) => sniff_mime(bytes),
        };

        mime.ok_or_else(|| ClassifierError::unreadable(input.describe(), "unsupported file type"))
    }

    /// Decode an input into 8-bit luma
    pub fn load_gray(input: ImageInput<'_>) -> Result<GrayImage> {
        Ok(Self::decode(input)?.to_luma8())
    }

    /// Decode an input into RGB, used as the base of heatmap overlays
    pub fn load_rgb(input: ImageInput<'_>) -> Result<RgbImage> {
        Ok(Self::decode(input)?.to_rgb8())
    }

    fn decode(input: ImageInput<'_>) -> Result<image::DynamicImage> {
        if let ImageInput::Path(path) = input {
            if !path.is_file() {
                return Err(ClassifierError::unreadable(input.describe(), "file does not exist"));
            }
        }
        Self::check_mime(input)?;

        let decoded = match input {
            ImageInput::Path(path) => image::open(path),
            ImageInput::Bytes(bytes) => image::load_from_memory(bytes),
        };
        let img = decoded.map_err(|e| ClassifierError::unreadable(input.describe(), e))?;

        if img.width() == 0 || img.height() == 0 {
            return Err(ClassifierError::unreadable(input.describe(), "image has no pixels"));
        }
        Ok(img)
    }

    /// Bilinear resize to `size`×`size` and linear scaling of [0, 255] to [0.0, 1.0]
    pub fn to_matrix(gray: &GrayImage, size: u32) -> Array2<f32> {
        let resized = imageops::resize(gray, size, size, FilterType::Triangle);
        Array2::from_shape_fn((size as usize, size as usize), |(y, x)| {
            resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
        })
    }

    /// Row-major flattening of a preprocessed matrix
    pub fn flatten(matrix: &Array2<f32>) -> Vec<f32> {
        matrix.iter().copied().collect()
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    // DICOM part 10: 128-byte preamble followed by "DICM"
    if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        return Some("application/dicom");
    }
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        _ => None,
    }
}
