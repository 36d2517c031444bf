//! Frame sources.
//!
//! This module provides the sources the pipeline can pull frames from:
//! - Synthetic frames (`stub://name`) for demos and tests
//! - A directory of still images (`dir:/path`)
//! - HTTP MJPEG streams (`http(s)://...`)
//! - CSI cameras through GStreamer (`gst://...`, feature: camera-gstreamer)
//! - Scripted sources (tests)
//!
//! Every source reports end-of-stream as `Ok(None)` and failures as `Err`. The
//! pipeline treats both as terminal and never retries a source.

pub mod csi;
pub mod directory;
pub mod mjpeg;
pub mod scripted;
pub mod synthetic;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;

#[cfg(feature = "camera-gstreamer")]
pub use csi::GstreamerSource;
pub use csi::capture_pipeline_description;
pub use directory::DirectorySource;
pub use mjpeg::MjpegSource;
pub use scripted::{ScriptedFrame, ScriptedSource, SourceProbe};
pub use synthetic::SyntheticSource;

/// Capture settings. Resolution and rate are passed through to the device; the
/// pipeline never looks at them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Source URL: `stub://name`, `dir:/path`, `http(s)://host/stream`, `gst://sensor`.
    pub url: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub framerate: u32,
    pub flip_method: u32,
    pub exposure_low_ns: u64,
    pub exposure_high_ns: u64,
    /// Stop after this many frames (synthetic sources only).
    pub max_frames: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            capture_width: 1920,
            capture_height: 1080,
            display_width: 960,
            display_height: 540,
            framerate: 30,
            flip_method: 2,
            exposure_low_ns: 8_000_000,
            exposure_high_ns: 8_000_000,
            max_frames: None,
        }
    }
}

/// Camera or video device abstraction.
pub trait FrameSource: Send {
    /// Human-readable source identifier for logs.
    fn name(&self) -> &str;

    /// Acquire the device. Called once before the first `next_frame`.
    fn open(&mut self) -> Result<()>;

    /// Next frame, `Ok(None)` at end of stream. May block on I/O.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the device. Called once when the pipeline stops.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build a source for the configured URL.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let url = config.url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    if let Some(path) = url.strip_prefix("dir:") {
        return Ok(Box::new(DirectorySource::new(path)?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(MjpegSource::new(url, config.framerate)?));
    }
    if url.starts_with("gst://") {
        #[cfg(feature = "camera-gstreamer")]
        {
            return Ok(Box::new(GstreamerSource::new(config.clone())?));
        }
        #[cfg(not(feature = "camera-gstreamer"))]
        {
            return Err(anyhow!(
                "gst:// sources require the camera-gstreamer feature"
            ));
        }
    }
    Err(anyhow!(
        "unsupported capture url '{}'; expected stub://, dir:, http(s):// or gst://",
        url
    ))
}
