//! Scripted frame source for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// One scripted capture result.
#[derive(Clone, Debug)]
pub enum ScriptedFrame {
    Frame(Frame),
    Fail(String),
    EndOfStream,
}

/// Yields a fixed sequence of frames, errors and end-of-stream markers.
///
/// Running past the end of the script is end of stream.
pub struct ScriptedSource {
    script: VecDeque<ScriptedFrame>,
    frame_count: u64,
    probe: SourceProbe,
}

/// Shared lifecycle flags for a [`ScriptedSource`].
#[derive(Clone, Debug, Default)]
pub struct SourceProbe {
    opened: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    pulls: Arc<AtomicUsize>,
}

impl SourceProbe {
    pub fn opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of `next_frame` calls made so far.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = ScriptedFrame>) -> Self {
        Self {
            script: script.into_iter().collect(),
            frame_count: 0,
            probe: SourceProbe::default(),
        }
    }

    /// Source that yields the given frames, then ends.
    pub fn from_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self::new(frames.into_iter().map(ScriptedFrame::Frame))
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self) -> Result<()> {
        self.probe.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(ScriptedFrame::Frame(frame)) => {
                self.frame_count += 1;
                Ok(Some(frame))
            }
            Some(ScriptedFrame::Fail(message)) => Err(anyhow!(message)),
            Some(ScriptedFrame::EndOfStream) | None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.probe.opened.store(false, Ordering::SeqCst);
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: "scripted".to_string(),
        }
    }
}
