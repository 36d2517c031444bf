//! HTTP MJPEG frame source.
//!
//! Reads a `multipart/x-mixed-replace` JPEG stream (IP cameras, ESP32 boards, or
//! another viewer's `/stream_frames`) and decodes each JPEG in-memory. Frames are
//! decimated to the configured rate. The server closing the stream is end of stream.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct MjpegSource {
    url: String,
    target_fps: u32,
    stream: Option<MjpegStream>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

impl MjpegSource {
    pub fn new(url: &str, target_fps: u32) -> Result<Self> {
        let parsed = Url::parse(url).context("parse mjpeg url")?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported mjpeg scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            url: url.to_string(),
            target_fps,
            stream: None,
            last_frame_at: None,
            frame_count: 0,
        })
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<()> {
        let response = ureq::get(&self.url)
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if !content_type.to_lowercase().contains("multipart") {
            return Err(anyhow!(
                "{} is not a multipart stream (content type '{}')",
                self.url,
                content_type
            ));
        }
        self.stream = Some(MjpegStream::new(response.into_reader()));
        log::info!("MjpegSource: connected to {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source not opened; call open() first"))?;
        let min_interval = frame_interval(self.target_fps);
        loop {
            let Some(jpeg_bytes) = stream.read_next_jpeg()? else {
                return Ok(None);
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = Frame::decode(&jpeg_bytes)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Some(frame));
        }
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

/// Splits a byte stream into JPEG images by walking their marker segments.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, `None` once the stream is closed.
    pub(crate) fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate the first complete JPEG in `buffer`.
///
/// Header segments are skipped by their declared length, so an EOI inside an
/// APP segment (an EXIF thumbnail) does not end the image. Once the scan data
/// starts, the first EOI that is not stuffed or a restart marker ends it.
/// A header that does not parse as segments falls back to the first EOI.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let mut pos = start + 2;
    loop {
        if *buffer.get(pos)? != 0xFF {
            return first_eoi(buffer, start, pos);
        }
        let marker = *buffer.get(pos + 1)?;
        match marker {
            0xFF => pos += 1,
            0xD9 => return Some((start, pos + 2)),
            0x01 | 0xD0..=0xD7 => pos += 2,
            _ => {
                let len = u16::from_be_bytes([*buffer.get(pos + 2)?, *buffer.get(pos + 3)?]);
                if len < 2 {
                    return first_eoi(buffer, start, pos);
                }
                pos += 2 + len as usize;
                if marker == 0xDA {
                    pos = skip_entropy_data(buffer, pos)?;
                }
            }
        }
    }
}

/// Offset of the next real marker after entropy-coded data.
fn skip_entropy_data(buffer: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let ff = pos + buffer.get(pos..)?.iter().position(|b| *b == 0xFF)?;
        match *buffer.get(ff + 1)? {
            0x00 | 0xD0..=0xD7 => pos = ff + 2,
            _ => return Some(ff),
        }
    }
}

fn first_eoi(buffer: &[u8], start: usize, from: usize) -> Option<(usize, usize)> {
    let end = buffer[from..].windows(2).position(|w| w == [0xFF, 0xD9])?;
    Some((start, from + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
