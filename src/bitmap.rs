//! 64×64 one-bit thumbnails and their packed base64 form.
//!
//! Bits are laid out row-major, most significant bit first, eight pixels per
//! byte. A full bitmap packs into 512 bytes.

use crate::error::{Result, SonicLinkError};
use crate::frame::{encode_frame, Frame};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

pub const IMAGE_SIZE: u32 = 64;
pub const IMAGE_PIXELS: usize = (IMAGE_SIZE * IMAGE_SIZE) as usize;
pub const PACKED_IMAGE_BYTES: usize = IMAGE_PIXELS / 8;

/// Mean-luminance threshold; a pixel is set when its mean is strictly above it.
pub const LUMINANCE_THRESHOLD: u16 = 127;

/// Accepts bodies with missing or partial padding and non-zero trailing bits,
/// as left behind by a truncated capture.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoBitmap {
    bits: Vec<bool>,
}

impl MonoBitmap {
    pub fn blank() -> Self {
        Self {
            bits: vec![false; IMAGE_PIXELS],
        }
    }

    pub fn from_bits(bits: Vec<bool>) -> Result<Self> {
        if bits.len() != IMAGE_PIXELS {
            return Err(SonicLinkError::InvalidImage(format!(
                "Expected {} pixels, got {}",
                IMAGE_PIXELS,
                bits.len()
            )));
        }
        Ok(Self { bits })
    }

    /// Downsample an arbitrary image to the fixed thumbnail and threshold it.
    pub fn from_image(source: &DynamicImage) -> Self {
        let rgb = source.to_rgb8();
        let thumb = image::imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);

        let bits = thumb
            .pixels()
            .map(|px| {
                let sum: u16 = px.0.iter().map(|&c| u16::from(c)).sum();
                sum > LUMINANCE_THRESHOLD * 3
            })
            .collect();

        Self { bits }
    }

    pub fn width(&self) -> u32 {
        IMAGE_SIZE
    }

    pub fn height(&self) -> u32 {
        IMAGE_SIZE
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= IMAGE_SIZE || y >= IMAGE_SIZE {
            return false;
        }
        self.bits[(y * IMAGE_SIZE + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < IMAGE_SIZE && y < IMAGE_SIZE {
            self.bits[(y * IMAGE_SIZE + x) as usize] = value;
        }
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(pack_bits(&self.bits))
    }

    /// Lenient about length: surplus bits are dropped and missing trailing
    /// pixels stay black, since captures can be truncated.
    pub fn from_base64(body: &str) -> Result<Self> {
        let bytes = LENIENT
            .decode(body.trim_end_matches('='))
            .map_err(|e| SonicLinkError::InvalidImage(e.to_string()))?;

        let mut bits = unpack_bits(&bytes, IMAGE_PIXELS);
        if bits.len() < IMAGE_PIXELS {
            log::debug!(
                "Image payload short by {} bits, padding with black",
                IMAGE_PIXELS - bits.len()
            );
            bits.resize(IMAGE_PIXELS, false);
        }

        Ok(Self { bits })
    }

    /// Opaque white for set pixels, opaque black otherwise.
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(IMAGE_SIZE, IMAGE_SIZE, |x, y| {
            if self.get(x, y) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    pub fn save_png(&self, path: &std::path::Path) -> Result<()> {
        self.to_rgba_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

impl Default for MonoBitmap {
    fn default() -> Self {
        Self::blank()
    }
}

pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            let mut byte = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    byte |= 1 << (7 - i);
                }
            }
            byte
        })
        .collect()
}

pub fn unpack_bits(bytes: &[u8], limit: usize) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |i| (byte >> (7 - i)) & 1 == 1))
        .take(limit)
        .collect()
}

/// Build the complete `IMG:` frame for a source image.
pub fn encode_image(source: &DynamicImage) -> String {
    encode_frame(&Frame::Image(MonoBitmap::from_image(source)))
}

/// Decode the base64 body of an `IMG:` frame.
pub fn decode_image(body: &str) -> Result<MonoBitmap> {
    MonoBitmap::from_base64(body)
}
