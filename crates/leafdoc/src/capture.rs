//! Loading plant photos from disk or from base64 payloads.

use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::types::{LeafdocError, LeafdocResult};

/// Where a photo came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    File { path: String },
    Base64 { mime: String },
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::File { path } => write!(f, "file {path}"),
            ImageSource::Base64 { mime } => write!(f, "upload ({mime})"),
        }
    }
}

/// Load a photo from a file path. Only the extensions in [`is_supported_format`] are accepted.
pub fn load_from_file(path: &str) -> LeafdocResult<(DynamicImage, ImageSource)> {
    if !Path::new(path).exists() {
        return Err(LeafdocError::ImageDecode(format!("No such image: {path}")));
    }
    if !is_supported_format(path) {
        return Err(LeafdocError::ImageDecode(format!(
            "Unsupported image format: {path}"
        )));
    }
    let img = image::open(path)?;
    ensure_non_empty(&img)?;
    let source = ImageSource::File {
        path: path.to_string(),
    };
    Ok((img, source))
}

/// Load a photo from base64-encoded data.
pub fn load_from_base64(data: &str, mime: &str) -> LeafdocResult<(DynamicImage, ImageSource)> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| LeafdocError::InvalidInput(format!("Invalid base64: {e}")))?;

    let format = match mime {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/webp" => Some(ImageFormat::WebP),
        "image/bmp" => Some(ImageFormat::Bmp),
        _ => None,
    };

    let img = if let Some(fmt) = format {
        image::load_from_memory_with_format(&bytes, fmt)?
    } else {
        image::load_from_memory(&bytes)?
    };
    ensure_non_empty(&img)?;

    let source = ImageSource::Base64 {
        mime: mime.to_string(),
    };
    Ok((img, source))
}

fn ensure_non_empty(img: &DynamicImage) -> LeafdocResult<()> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(LeafdocError::ImageDecode(format!(
            "Image has no pixels ({w}x{h})"
        )));
    }
    Ok(())
}

/// Check if a file path points to a supported photo format.
pub fn is_supported_format(path: &str) -> bool {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    matches!(
        ext.as_str(),
        "png" | "jpg" | "jpeg" | "webp" | "bmp" | "tiff" | "tif"
    )
}
