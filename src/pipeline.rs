//! Producer loop: capture, infer, annotate, record, publish.
//!
//! `PipelineLoop` owns a frame source and an inference client and writes into a
//! shared [`DetectionLedger`] and [`FramePublisher`]. States run
//! `Initializing -> Running -> (Draining) -> Stopped`. End of stream drains and
//! stops; a source error stops immediately. An inference error is terminal under
//! the default `FailFast` policy. Encoding failures and empty engine results skip
//! the cycle and the loop carries on.
//!
//! Per cycle, the ledger block is appended before the frame is published, so a
//! viewer never sees a frame whose detections are not in the table yet.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::annotate::{Annotator, DEFAULT_LINE_WIDTH};
use crate::classes::ClassTable;
use crate::indicator::{Indicator, IndicatorBus, IndicatorSignal};
use crate::inference::{InferenceClient, InferenceResponse, ModelRef};
use crate::ingest::FrameSource;
use crate::ledger::{wall_clock_timestamp, DetectionLedger, LedgerRow};
use crate::publisher::FramePublisher;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Why the producer stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted,
    SourceError(String),
    InferenceError(String),
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceExhausted => write!(f, "source exhausted"),
            Self::SourceError(msg) => write!(f, "source error: {msg}"),
            Self::InferenceError(msg) => write!(f, "inference error: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a single cycle produced no ledger or frame update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Encoding(String),
    EmptyResult,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Published {
        detections: usize,
        annotated: usize,
        skipped_annotations: usize,
    },
    Skipped(SkipReason),
}

/// What to do when the engine call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InferencePolicy {
    /// First failure stops the pipeline.
    #[default]
    FailFast,
    /// Retry up to `attempts` more times, doubling `backoff` after each failure.
    Retry { attempts: u32, backoff: Duration },
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub model: ModelRef,
    pub classes: ClassTable,
    pub line_width: u32,
    pub jpeg_quality: u8,
    pub inference_policy: InferencePolicy,
}

impl PipelineSettings {
    pub fn new(model: ModelRef, classes: ClassTable) -> Self {
        Self {
            model,
            classes,
            line_width: DEFAULT_LINE_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            inference_policy: InferencePolicy::FailFast,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub cycles_published: u64,
    pub cycles_skipped: u64,
    pub detections: u64,
    pub annotation_skips: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub stop_reason: StopReason,
    pub stats: PipelineStats,
    pub elapsed: Duration,
}

pub struct PipelineLoop {
    source: Box<dyn FrameSource>,
    client: Box<dyn InferenceClient>,
    publisher: Arc<FramePublisher>,
    ledger: Arc<DetectionLedger>,
    annotator: Annotator,
    settings: PipelineSettings,
    indicators: IndicatorBus,
    cancel: Arc<AtomicBool>,
    state: PipelineState,
    stop_reason: Option<StopReason>,
    stats: PipelineStats,
    resources_open: bool,
}

impl PipelineLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        client: Box<dyn InferenceClient>,
        publisher: Arc<FramePublisher>,
        ledger: Arc<DetectionLedger>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            client,
            publisher,
            ledger,
            annotator: Annotator::new(settings.line_width),
            settings,
            indicators: IndicatorBus::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            state: PipelineState::Initializing,
            stop_reason: None,
            stats: PipelineStats::default(),
            resources_open: false,
        }
    }

    pub fn with_indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicators.register(indicator);
        self
    }

    /// Use an external cancellation flag, checked before every cycle.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Source and loop counters as one `key=value` line.
    pub fn health_summary(&self) -> String {
        let source = self.source.stats();
        format!(
            "source={} captured={} published={} skipped={} detections={}",
            source.source,
            source.frames_captured,
            self.stats.cycles_published,
            self.stats.cycles_skipped,
            self.stats.detections
        )
    }

    /// Run one cycle. Opens the source and client on first use.
    ///
    /// `Err` carries the stop reason once the pipeline has stopped; every later
    /// call returns the same reason without touching the source.
    pub fn run_cycle(&mut self) -> std::result::Result<CycleOutcome, StopReason> {
        if let Some(reason) = &self.stop_reason {
            return Err(reason.clone());
        }
        if self.state == PipelineState::Initializing {
            if let Err(reason) = self.start() {
                return Err(self.stop(reason));
            }
        }
        if self.cancel.load(Ordering::SeqCst) {
            return Err(self.stop(StopReason::Cancelled));
        }

        let result = self.cycle();
        self.indicators.fire(IndicatorSignal::Idle);
        match result {
            Ok(outcome) => {
                match &outcome {
                    CycleOutcome::Published { .. } => self.stats.cycles_published += 1,
                    CycleOutcome::Skipped(reason) => {
                        self.stats.cycles_skipped += 1;
                        log::warn!("cycle skipped: {:?}", reason);
                    }
                }
                Ok(outcome)
            }
            Err(reason) => {
                if reason == StopReason::SourceExhausted {
                    self.state = PipelineState::Draining;
                }
                Err(self.stop(reason))
            }
        }
    }

    /// Cycle until a stop condition, then release resources.
    pub fn run(mut self) -> PipelineReport {
        let started = Instant::now();
        let mut last_health_log = Instant::now();

        let stop_reason = loop {
            match self.run_cycle() {
                Ok(_) => {}
                Err(reason) => break reason,
            }
            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!("pipeline health {}", self.health_summary());
                last_health_log = Instant::now();
            }
        };

        let elapsed = started.elapsed();
        log::info!(
            "video stream closed after {:.1} seconds ({})",
            elapsed.as_secs_f64(),
            stop_reason
        );
        PipelineReport {
            stop_reason,
            stats: self.stats.clone(),
            elapsed,
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let cancel = self.cancel.clone();
        let thread = std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run())?;
        Ok(PipelineHandle { cancel, thread })
    }

    // ---- Lifecycle ----

    fn start(&mut self) -> std::result::Result<(), StopReason> {
        self.resources_open = true;
        self.source
            .open()
            .map_err(|err| StopReason::SourceError(format!("{err:#}")))?;
        self.client
            .connect()
            .map_err(|err| StopReason::InferenceError(format!("{err:#}")))?;
        self.state = PipelineState::Running;
        log::info!(
            "pipeline started source={} client={} model={} classes={}",
            self.source.name(),
            self.client.name(),
            self.settings.model,
            self.settings.classes.len()
        );
        Ok(())
    }

    fn stop(&mut self, reason: StopReason) -> StopReason {
        match &reason {
            StopReason::SourceError(_) | StopReason::InferenceError(_) => {
                log::error!("pipeline stopping: {}", reason)
            }
            _ => log::info!("pipeline stopping: {}", reason),
        }
        self.release();
        self.indicators.fire(IndicatorSignal::Idle);
        self.state = PipelineState::Stopped;
        self.stop_reason = Some(reason.clone());
        reason
    }

    fn release(&mut self) {
        if !self.resources_open {
            return;
        }
        self.resources_open = false;
        if let Err(err) = self.source.close() {
            log::warn!("source close failed: {:#}", err);
        }
        if let Err(err) = self.client.close() {
            log::warn!("inference client close failed: {:#}", err);
        }
    }

    // ---- Cycle ----

    fn cycle(&mut self) -> std::result::Result<CycleOutcome, StopReason> {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(StopReason::SourceExhausted),
            Err(err) => return Err(StopReason::SourceError(format!("{err:#}"))),
        };
        self.stats.frames_captured += 1;

        let encoded = match frame.encode_jpeg(self.settings.jpeg_quality) {
            Ok(bytes) => bytes,
            Err(err) => return Ok(CycleOutcome::Skipped(SkipReason::Encoding(format!("{err:#}")))),
        };

        self.indicators.fire(IndicatorSignal::Processing);
        let response = self.infer(&encoded)?;
        let Some(detections) = response.outputs else {
            return Ok(CycleOutcome::Skipped(SkipReason::EmptyResult));
        };

        let timestamp = wall_clock_timestamp();
        let rows = detections
            .iter()
            .map(|det| LedgerRow::from_detection(&timestamp, det))
            .collect();
        self.ledger.append(rows);

        let annotated = self
            .annotator
            .annotate(&frame, &detections, &self.settings.classes);
        if !detections.is_empty() {
            self.indicators.fire(IndicatorSignal::DetectionFound);
        }
        let skipped = annotated.skipped.len();
        self.publisher.publish(annotated.frame);

        self.stats.detections += detections.len() as u64;
        self.stats.annotation_skips += skipped as u64;
        Ok(CycleOutcome::Published {
            detections: detections.len(),
            annotated: detections.len() - skipped,
            skipped_annotations: skipped,
        })
    }

    fn infer(&mut self, encoded: &[u8]) -> std::result::Result<InferenceResponse, StopReason> {
        let (retries, mut backoff) = match self.settings.inference_policy {
            InferencePolicy::FailFast => (0, Duration::ZERO),
            InferencePolicy::Retry { attempts, backoff } => (attempts, backoff),
        };
        let mut attempt = 0;
        loop {
            match self.client.infer(&self.settings.model, encoded) {
                Ok(response) => return Ok(response),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    log::warn!(
                        "inference failed (retry {}/{} in {:?}): {:#}",
                        attempt,
                        retries,
                        backoff,
                        err
                    );
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(StopReason::InferenceError(format!("{err:#}"))),
            }
        }
    }
}

impl Drop for PipelineLoop {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a pipeline running on its own thread.
pub struct PipelineHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<PipelineReport>,
}

impl PipelineHandle {
    /// Ask the pipeline to stop before its next cycle.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn join(self) -> Result<PipelineReport> {
        self.thread
            .join()
            .map_err(|_| anyhow!("pipeline thread panicked"))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::inference::{BoundingBox, Detection, ScriptedClient, ScriptedReply};
    use crate::ingest::{ScriptedFrame, ScriptedSource};
    use std::sync::Mutex;

    fn settings() -> PipelineSettings {
        PipelineSettings::new(
            ModelRef::new("defects", "1.0.0"),
            ClassTable::new(["dent", "scratch"]).expect("classes"),
        )
    }

    fn dent() -> Detection {
        Detection::new("dent", 0.9, BoundingBox::new(10, 10, 50, 50))
    }

    fn shared() -> (Arc<FramePublisher>, Arc<DetectionLedger>) {
        (
            Arc::new(FramePublisher::new()),
            Arc::new(DetectionLedger::new(25)),
        )
    }

    struct Recorder(Arc<Mutex<Vec<IndicatorSignal>>>);

    impl Indicator for Recorder {
        fn signal(&self, signal: IndicatorSignal) {
            self.0.lock().unwrap().push(signal);
        }
    }

    #[test]
    fn end_of_stream_drains_and_closes_once() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames([Frame::solid(64, 64, [0, 0, 0])]);
        let client = ScriptedClient::new([ScriptedReply::Respond(
            InferenceResponse::with_detections(vec![dent()]),
        )]);
        let (source_probe, client_probe) = (source.probe(), client.probe());

        let mut pipeline = PipelineLoop::new(
            Box::new(source),
            Box::new(client),
            publisher.clone(),
            ledger.clone(),
            settings(),
        );
        assert_eq!(pipeline.state(), PipelineState::Initializing);

        assert!(matches!(
            pipeline.run_cycle(),
            Ok(CycleOutcome::Published { detections: 1, annotated: 1, .. })
        ));
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(client_probe.connected());

        assert_eq!(pipeline.run_cycle(), Err(StopReason::SourceExhausted));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.run_cycle(), Err(StopReason::SourceExhausted));
        drop(pipeline);

        assert_eq!(source_probe.closes(), 1);
        assert_eq!(client_probe.closes(), 1);
        assert_eq!(source_probe.pulls(), 2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(publisher.sequence(), 1);
    }

    #[test]
    fn health_summary_reports_source_counters() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames(vec![Frame::solid(16, 16, [9, 9, 9]); 2]);
        let client = ScriptedClient::new([
            ScriptedReply::Respond(InferenceResponse::with_detections(vec![dent()])),
            ScriptedReply::Respond(InferenceResponse::empty()),
        ]);
        let mut pipeline =
            PipelineLoop::new(Box::new(source), Box::new(client), publisher, ledger, settings());

        assert!(pipeline.run_cycle().is_ok());
        assert!(pipeline.run_cycle().is_ok());
        assert_eq!(
            pipeline.health_summary(),
            "source=scripted captured=2 published=1 skipped=1 detections=1"
        );
    }

    #[test]
    fn inference_error_is_terminal_by_default() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames(vec![Frame::solid(32, 32, [1, 1, 1]); 3]);
        let client = ScriptedClient::new([ScriptedReply::Fail("engine unreachable".into())]);
        let (source_probe, client_probe) = (source.probe(), client.probe());

        let report = PipelineLoop::new(
            Box::new(source),
            Box::new(client),
            publisher.clone(),
            ledger,
            settings(),
        )
        .run();

        assert!(matches!(report.stop_reason, StopReason::InferenceError(ref m) if m.contains("unreachable")));
        assert_eq!(report.stats.frames_captured, 1);
        assert_eq!(client_probe.calls(), 1);
        assert_eq!(source_probe.pulls(), 1);
        assert_eq!(source_probe.closes(), 1);
        assert!(publisher.snapshot().is_none());
    }

    #[test]
    fn retry_policy_recovers_from_transient_failures() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames([Frame::solid(32, 32, [1, 1, 1])]);
        let client = ScriptedClient::new([
            ScriptedReply::Fail("busy".into()),
            ScriptedReply::Respond(InferenceResponse::with_detections(vec![dent()])),
        ]);
        let probe = client.probe();
        let mut cfg = settings();
        cfg.inference_policy = InferencePolicy::Retry {
            attempts: 2,
            backoff: Duration::from_millis(1),
        };

        let report =
            PipelineLoop::new(Box::new(source), Box::new(client), publisher, ledger.clone(), cfg)
                .run();

        assert_eq!(report.stop_reason, StopReason::SourceExhausted);
        assert_eq!(probe.calls(), 2);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn empty_result_skips_ledger_and_publish() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames([Frame::solid(32, 32, [5, 5, 5])]);
        let client = ScriptedClient::new([ScriptedReply::Respond(InferenceResponse::empty())]);

        let mut pipeline =
            PipelineLoop::new(Box::new(source), Box::new(client), publisher.clone(), ledger.clone(), settings());

        assert_eq!(
            pipeline.run_cycle(),
            Ok(CycleOutcome::Skipped(SkipReason::EmptyResult))
        );
        assert_eq!(pipeline.stats().cycles_skipped, 1);
        assert!(ledger.is_empty());
        assert!(publisher.snapshot().is_none());
    }

    #[test]
    fn encoding_failure_skips_without_calling_the_engine() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames([
            Frame::solid(0, 0, [0, 0, 0]),
            Frame::solid(16, 16, [0, 0, 0]),
        ]);
        let client = ScriptedClient::new([ScriptedReply::Respond(
            InferenceResponse::with_detections(Vec::new()),
        )]);
        let probe = client.probe();

        let mut pipeline =
            PipelineLoop::new(Box::new(source), Box::new(client), publisher.clone(), ledger, settings());

        assert!(matches!(
            pipeline.run_cycle(),
            Ok(CycleOutcome::Skipped(SkipReason::Encoding(_)))
        ));
        assert_eq!(probe.calls(), 0);
        assert!(matches!(
            pipeline.run_cycle(),
            Ok(CycleOutcome::Published { detections: 0, .. })
        ));
        assert_eq!(publisher.sequence(), 1);
    }

    #[test]
    fn unknown_class_is_recorded_but_not_drawn() {
        let (publisher, ledger) = shared();
        let frame = Frame::solid(64, 64, [0, 0, 0]);
        let source = ScriptedSource::from_frames([frame.clone()]);
        let ghost = Detection::new("ghost", 0.4, BoundingBox::new(5, 5, 20, 20));
        let client = ScriptedClient::new([ScriptedReply::Respond(
            InferenceResponse::with_detections(vec![ghost]),
        )]);

        let mut pipeline =
            PipelineLoop::new(Box::new(source), Box::new(client), publisher.clone(), ledger.clone(), settings());

        assert_eq!(
            pipeline.run_cycle(),
            Ok(CycleOutcome::Published {
                detections: 1,
                annotated: 0,
                skipped_annotations: 1
            })
        );
        assert_eq!(ledger.snapshot(5)[0].class, "ghost");
        let published = publisher.snapshot().expect("published");
        assert_eq!(*published.frame, frame);
    }

    #[test]
    fn source_error_stops_without_draining() {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::new([ScriptedFrame::Fail("camera unplugged".into())]);
        let probe = source.probe();
        let client = ScriptedClient::new(Vec::new());

        let mut pipeline =
            PipelineLoop::new(Box::new(source), Box::new(client), publisher, ledger, settings());

        assert!(matches!(pipeline.run_cycle(), Err(StopReason::SourceError(_))));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn cancel_flag_stops_before_next_cycle() -> Result<()> {
        let (publisher, ledger) = shared();
        let source = ScriptedSource::from_frames(vec![Frame::solid(8, 8, [0, 0, 0]); 4]);
        let probe = source.probe();
        let replies = (0..4).map(|_| ScriptedReply::Respond(InferenceResponse::empty()));
        let cancel = Arc::new(AtomicBool::new(true));

        let handle = PipelineLoop::new(
            Box::new(source),
            Box::new(ScriptedClient::new(replies)),
            publisher,
            ledger,
            settings(),
        )
        .with_cancel(cancel)
        .spawn()?;
        let report = handle.join()?;

        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(probe.pulls(), 0);
        assert_eq!(probe.closes(), 1);
        Ok(())
    }

    #[test]
    fn indicators_fire_around_inference() {
        let (publisher, ledger) = shared();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource::from_frames([Frame::solid(64, 64, [0, 0, 0])]);
        let client = ScriptedClient::new([ScriptedReply::Respond(
            InferenceResponse::with_detections(vec![dent()]),
        )]);

        PipelineLoop::new(Box::new(source), Box::new(client), publisher, ledger, settings())
            .with_indicator(Box::new(Recorder(seen.clone())))
            .run();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            &seen[..3],
            &[
                IndicatorSignal::Processing,
                IndicatorSignal::DetectionFound,
                IndicatorSignal::Idle
            ]
        );
        assert_eq!(seen.last(), Some(&IndicatorSignal::Idle));
    }
}
