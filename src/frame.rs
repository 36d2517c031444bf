//! Frame container and image codec helpers.
//!
//! - `Frame`: owned, packed RGB8 pixel buffer. `Clone` is a deep copy, so a frame
//!   handed to the publisher can never be changed by the producer afterwards.
//! - JPEG encoding is used twice: once to feed the inference client, once by the
//!   stream server when a viewer asks for the latest frame.

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView, ImageEncoder};

/// Bytes per pixel for the packed RGB layout every source produces.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame: owned RGB8 pixel buffer
// ----------------------------------------------------------------------------

/// One decoded image captured from a frame source.
///
/// Pixels are stored row-major as `R, G, B` triples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an RGB8 buffer. Fails when the buffer length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{} frame, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Decode a compressed image (JPEG, PNG) into an RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode image")?;
        let (width, height) = image.dimensions();
        Self::new(image.into_rgb8().into_raw(), width, height)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.offset(x, y);
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Overwrite a pixel. Out-of-bounds coordinates are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = self.offset(x as u32, y as u32);
        self.data[idx..idx + CHANNELS].copy_from_slice(&rgb);
    }

    /// Lossy JPEG encoding at the given quality (clamped to 1..=100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("cannot encode an empty {}x{} frame", self.width, self.height));
        }
        let mut buffer = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .write_image(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
        Ok(buffer.into_inner())
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
