use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, RgbaImage};

use super::VideoSource;
use crate::error::DeviceError;

/// Full-resolution still taken once before the session starts.
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl ReferenceSnapshot {
    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.jpeg))
    }
}

/// Grabs one frame at native resolution, independent of the periodic sampler.
/// Blocking.
pub fn capture_snapshot(
    source: &dyn VideoSource,
    quality: u8,
    captured_at: DateTime<Utc>,
) -> Result<ReferenceSnapshot, DeviceError> {
    let frame = source.grab_frame()?;
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(DeviceError::Other("camera returned an empty frame".into()));
    }

    let jpeg = encode_jpeg(frame, quality).map_err(|err| DeviceError::Other(format!("{err:#}")))?;
    Ok(ReferenceSnapshot {
        jpeg,
        width,
        height,
        captured_at,
    })
}

fn encode_jpeg(frame: RgbaImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(frame).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&rgb)
        .context("failed to encode reference snapshot as JPEG")?;
    Ok(buffer)
}
