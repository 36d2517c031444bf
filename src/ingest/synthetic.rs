//! Synthetic frame source (`stub://`).
//!
//! Generates a moving gradient at the display resolution so the whole pipeline can
//! run without a camera. With `max_frames` set it reports end of stream after that
//! many frames, like a bounded capture run.

use anyhow::Result;

use super::{CaptureConfig, FrameSource, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    config: CaptureConfig,
    frame_count: u64,
    /// Simulated scene state; bumps every 50 frames.
    scene_state: u8,
    opened: bool,
}

impl SyntheticSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            opened: false,
        }
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let width = self.config.display_width as usize;
        let height = self.config.display_height as usize;

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i % width.max(1)) as u64;
            let y = (i / width.max(1)) as u64;
            px[0] = ((x + self.frame_count) % 256) as u8;
            px[1] = ((y + self.scene_state as u64 * 16) % 256) as u8;
            px[2] = ((x + y) / 4 % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!("SyntheticSource: opened {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            anyhow::bail!("synthetic source not opened; call open() first");
        }
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::new(
            pixels,
            self.config.display_width,
            self.config.display_height,
        )
        .map(Some)
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(max_frames: Option<u64>) -> CaptureConfig {
        CaptureConfig {
            url: "stub://test".to_string(),
            display_width: 64,
            display_height: 48,
            max_frames,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn synthetic_source_produces_frames_at_display_size() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config(None));
        source.open()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        Ok(())
    }

    #[test]
    fn synthetic_frames_change_over_time() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config(None));
        source.open()?;

        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn bounded_run_ends_the_stream() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config(Some(2)));
        source.open()?;

        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn next_frame_requires_open() {
        let mut source = SyntheticSource::new(stub_config(None));
        assert!(source.next_frame().is_err());
    }
}
