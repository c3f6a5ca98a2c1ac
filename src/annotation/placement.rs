//! Initial size and position of a freshly authored annotation.

use super::geometry::Size;
use crate::error::{Error, Result};
use image::{ImageFormat, ImageReader};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Smallest size a new annotation is placed at
pub const MIN_PLACEMENT_SIZE: Size = Size::new(80.0, 40.0);

/// Screen class the client is displaying pages on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViewportProfile {
    #[default]
    Desktop,
    /// Narrow screens (phones)
    Compact,
}

impl ViewportProfile {
    /// Largest size a new annotation is placed at
    pub fn max_size(self) -> Size {
        match self {
            ViewportProfile::Desktop => Size::new(300.0, 150.0),
            ViewportProfile::Compact => Size::new(200.0, 100.0),
        }
    }

    /// Top-left corner used when the client gives no position
    pub fn default_origin(self) -> (f64, f64) {
        match self {
            ViewportProfile::Desktop => (200.0, 150.0),
            ViewportProfile::Compact => (50.0, 100.0),
        }
    }
}

/// Pixel dimensions of a decoded image header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
}

/// Read the PNG header of `data` without decoding pixel data.
pub fn decode_image_metadata(data: &[u8], max_pixels: u64) -> Result<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::InvalidImage {
            reason: e.to_string(),
        })?;

    if reader.format() != Some(ImageFormat::Png) {
        return Err(Error::InvalidImage {
            reason: format!("expected PNG data, found {:?}", reader.format()),
        });
    }

    let (width, height) = reader.into_dimensions().map_err(|e| Error::InvalidImage {
        reason: e.to_string(),
    })?;

    if width == 0 || height == 0 {
        return Err(Error::InvalidImage {
            reason: format!("image has no pixels ({}x{})", width, height),
        });
    }

    let pixels = width as u64 * height as u64;
    if pixels > max_pixels {
        return Err(Error::ImageDimensionExceeded {
            detail: format!(
                "{}x{} = {} pixels (max: {})",
                width, height, pixels, max_pixels
            ),
        });
    }

    Ok(ImageMetadata { width, height })
}

/// Displayed size for a new annotation showing an image of `metadata` size.
///
/// Images larger than the profile's maximum are scaled down uniformly, then
/// each side is raised to [`MIN_PLACEMENT_SIZE`].
pub fn initial_size(metadata: ImageMetadata, profile: ViewportProfile) -> Size {
    let max = profile.max_size();
    let mut width = metadata.width as f64;
    let mut height = metadata.height as f64;

    if width > max.width || height > max.height {
        let scale = (max.width / width).min(max.height / height);
        width *= scale;
        height *= scale;
    }

    Size::new(
        width.max(MIN_PLACEMENT_SIZE.width),
        height.max(MIN_PLACEMENT_SIZE.height),
    )
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}
