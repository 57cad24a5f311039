//! Codificación JPEG del artifact.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use img_core::constants::ARTIFACT_CONTENT_TYPE;
use img_core::{ImageEncoder, JobError};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy)]
pub struct JpegArtifactEncoder {
    quality: u8,
}

impl JpegArtifactEncoder {
    /// `quality` se acota a `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }
}

impl Default for JpegArtifactEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ImageEncoder for JpegArtifactEncoder {
    fn content_type(&self) -> &'static str {
        ARTIFACT_CONTENT_TYPE
    }

    fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, JobError> {
        let mut out = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
            encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
                   .map_err(|e| JobError::ExecutionFault(format!("jpeg encoding failed: {e}")))?;
        }
        Ok(out)
    }
}
