//! Model-input preprocessing under the candidate pixel encodings.
//!
//! Images are stretched to a fixed square side, not aspect-preserving. The
//! model was trained on stretched inputs, so letterboxing here would shift
//! the input distribution.

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::types::{LeafdocError, LeafdocResult};

/// Default model input side length.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Per-channel ImageNet means in BGR order (Caffe convention).
#[allow(clippy::excessive_precision)]
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// One pixel-normalization scheme for building a model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// RGB scaled to `[-1, 1]`.
    SignedUnit,
    /// BGR with ImageNet channel means subtracted.
    MeanSubtractedChannelSwapped,
    /// RGB bytes as floats in `[0, 255]`.
    RawByteValue,
}

impl Encoding {
    /// Every encoding, in the order attempts are made.
    pub const ALL: [Encoding; 3] = [
        Encoding::SignedUnit,
        Encoding::MeanSubtractedChannelSwapped,
        Encoding::RawByteValue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::SignedUnit => "signed_unit",
            Encoding::MeanSubtractedChannelSwapped => "mean_subtracted_channel_swapped",
            Encoding::RawByteValue => "raw_byte_value",
        }
    }

    /// Parse the snake_case name used in config files and on the command line.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_lowercase();
        Encoding::ALL.into_iter().find(|e| e.as_str() == raw)
    }

    /// Encode one RGB pixel into three model-input values.
    fn encode_pixel(&self, rgb: [u8; 3]) -> [f32; 3] {
        let [r, g, b] = rgb.map(|v| v as f32);
        match self {
            Encoding::SignedUnit => [r / 127.5 - 1.0, g / 127.5 - 1.0, b / 127.5 - 1.0],
            Encoding::MeanSubtractedChannelSwapped => [
                b - CAFFE_MEAN_BGR[0],
                g - CAFFE_MEAN_BGR[1],
                r - CAFFE_MEAN_BGR[2],
            ],
            Encoding::RawByteValue => [r, g, b],
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flat `side x side x 3` model input in HWC order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub side: u32,
    pub encoding: Encoding,
}

impl Tensor {
    /// Expected element count for a given side length.
    pub fn expected_len(side: u32) -> usize {
        (side as usize) * (side as usize) * 3
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Build a model input tensor for `img` under `encoding`.
pub fn encode(img: &DynamicImage, encoding: Encoding, side: u32) -> LeafdocResult<Tensor> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(LeafdocError::ImageDecode(format!(
            "Cannot encode an empty image ({w}x{h})"
        )));
    }
    if side == 0 {
        return Err(LeafdocError::ImageDecode(
            "Input side length must be non-zero".to_string(),
        ));
    }

    let resized = img.resize_exact(side, side, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();
    if rgb.dimensions() != (side, side) {
        return Err(LeafdocError::ImageDecode(format!(
            "Resize produced {:?}, expected {side}x{side}",
            rgb.dimensions()
        )));
    }

    let mut data = Vec::with_capacity(Tensor::expected_len(side));
    for pixel in rgb.pixels() {
        data.extend_from_slice(&encoding.encode_pixel(pixel.0));
    }

    Ok(Tensor {
        data,
        side,
        encoding,
    })
}
