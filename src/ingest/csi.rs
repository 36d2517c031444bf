//! CSI camera source using GStreamer.
//!
//! The capture pipeline is the Jetson CSI chain: `nvarguscamerasrc` at the capture
//! resolution, hardware resize/flip through `nvvidconv`, conversion to packed RGB,
//! and an `appsink` that keeps only the newest buffer. The description string is
//! always available; the source itself needs the `camera-gstreamer` feature.

use anyhow::{Context, Result};

use super::CaptureConfig;
use crate::frame::Frame;

/// GStreamer launch description for the CSI capture pipeline.
pub fn capture_pipeline_description(config: &CaptureConfig) -> String {
    format!(
        "nvarguscamerasrc exposuretimerange=\"{} {}\" ! \
         video/x-raw(memory:NVMM), width=(int){}, height=(int){}, framerate=(fraction){}/1 ! \
         nvvidconv flip-method={} ! \
         video/x-raw, width=(int){}, height=(int){}, format=(string)BGRx ! \
         videoconvert ! video/x-raw, format=(string)RGB ! \
         appsink name=appsink wait-on-eos=false max-buffers=1 drop=true",
        config.exposure_low_ns,
        config.exposure_high_ns,
        config.capture_width,
        config.capture_height,
        config.framerate,
        config.flip_method,
        config.display_width,
        config.display_height,
    )
}

/// Pack a strided RGB buffer into a frame. Short buffers are an error.
#[cfg_attr(not(feature = "camera-gstreamer"), allow(dead_code))]
pub(crate) fn packed_rgb_frame(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<Frame> {
    let row_bytes = (width as usize) * 3;
    let rows = height as usize;

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * rows)
            .context("capture buffer is shorter than one frame")?;
        return Frame::new(packed.to_vec(), width, height);
    }

    let mut pixels = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("capture buffer row is out of bounds")?,
        );
    }
    Frame::new(pixels, width, height)
}

#[cfg(feature = "camera-gstreamer")]
pub use camera::GstreamerSource;

#[cfg(feature = "camera-gstreamer")]
mod camera {
    use std::time::Duration;

    use anyhow::{anyhow, Context, Result};
    use gstreamer::prelude::*;

    use super::{capture_pipeline_description, packed_rgb_frame};
    use crate::frame::Frame;
    use crate::ingest::{CaptureConfig, FrameSource, SourceStats};

    pub struct GstreamerSource {
        config: CaptureConfig,
        pipeline: gstreamer::Pipeline,
        appsink: gstreamer_app::AppSink,
        frame_count: u64,
        eos: bool,
    }

    impl GstreamerSource {
        /// Build the capture pipeline. The camera is not started until `open`.
        pub fn new(config: CaptureConfig) -> Result<Self> {
            gstreamer::init().context("initialize gstreamer")?;

            let description = capture_pipeline_description(&config);
            let pipeline = gstreamer::parse::launch(&description)
                .context("build capture pipeline")?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

            let appsink = pipeline
                .by_name("appsink")
                .context("appsink element missing from pipeline")?
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| anyhow!("appsink element has unexpected type"))?;

            Ok(Self {
                config,
                pipeline,
                appsink,
                frame_count: 0,
                eos: false,
            })
        }

        fn frame_timeout(&self) -> Duration {
            let base_ms = if self.config.framerate == 0 {
                500
            } else {
                (1000 / self.config.framerate).saturating_mul(4)
            };
            Duration::from_millis(base_ms.max(500) as u64)
        }

        fn poll_bus(&mut self) -> Result<()> {
            let Some(bus) = self.pipeline.bus() else {
                return Ok(());
            };
            while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
                use gstreamer::MessageView;
                match message.view() {
                    MessageView::Error(err) => {
                        return Err(anyhow!(
                            "gstreamer error from {:?}: {}",
                            err.src().map(|s| s.path_string()),
                            err.error()
                        ));
                    }
                    MessageView::Eos(..) => self.eos = true,
                    _ => {}
                }
            }
            Ok(())
        }
    }

    impl FrameSource for GstreamerSource {
        fn name(&self) -> &str {
            &self.config.url
        }

        fn open(&mut self) -> Result<()> {
            self.pipeline
                .set_state(gstreamer::State::Playing)
                .context("set capture pipeline to Playing")?;
            log::info!("GstreamerSource: capturing from {}", self.config.url);
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            self.poll_bus()?;
            if self.eos || self.appsink.is_eos() {
                return Ok(None);
            }

            let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
            let Some(sample) = self.appsink.try_pull_sample(timeout) else {
                if self.appsink.is_eos() {
                    return Ok(None);
                }
                return Err(anyhow!("capture pipeline stalled"));
            };

            let frame = sample_to_frame(&sample)?;
            self.frame_count += 1;
            Ok(Some(frame))
        }

        fn close(&mut self) -> Result<()> {
            self.pipeline
                .set_state(gstreamer::State::Null)
                .context("stop capture pipeline")?;
            Ok(())
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.frame_count,
                source: self.config.url.clone(),
            }
        }
    }

    fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
        let buffer = sample.buffer().context("capture sample missing buffer")?;
        let caps = sample.caps().context("capture sample missing caps")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .context("parse capture caps as video info")?;

        let map = buffer.map_readable().context("map capture buffer")?;
        packed_rgb_frame(
            map.as_slice(),
            info.width(),
            info.height(),
            info.stride()[0] as usize,
        )
    }
}
