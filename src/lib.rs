//! Inference Viewer
//!
//! Real-time video inference pipeline: frames are pulled from a camera source,
//! sent to an inference engine, overlaid with the returned detections and
//! published to viewers as a live MJPEG stream next to a rolling detection table.
//!
//! # Architecture
//!
//! One producer thread runs the [`PipelineLoop`]. It writes into two shared
//! structures, each synchronised on its own:
//!
//! - [`DetectionLedger`]: bounded newest-first table of detections
//! - [`FramePublisher`]: single slot holding the latest annotated frame
//!
//! The [`StreamServer`] serves any number of viewers from those two structures
//! and never touches the producer.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame buffer and JPEG codec
//! - `ingest`: frame sources (synthetic, image directory, MJPEG, CSI camera)
//! - `inference`: engine clients and detection types
//! - `annotate`: box and label overlay
//! - `ledger`, `publisher`: shared state
//! - `pipeline`: the producer state machine
//! - `indicator`: best-effort status signals
//! - `server`: viewer HTTP server
//! - `config`: layered daemon configuration

pub mod annotate;
pub mod classes;
pub mod config;
pub mod frame;
pub mod indicator;
pub mod inference;
pub mod ingest;
pub mod ledger;
pub mod pipeline;
pub mod publisher;
pub mod server;

pub use annotate::{Annotated, AnnotationSkip, Annotator};
pub use classes::ClassTable;
pub use config::ViewerConfig;
pub use frame::Frame;
pub use indicator::{
    GpioPins, Indicator, IndicatorBus, IndicatorSignal, LogIndicator, SysfsGpioIndicator,
};
pub use inference::{
    open_client, BoundingBox, Detection, InferenceClient, InferenceResponse, ModelRef,
};
pub use ingest::{open_source, CaptureConfig, FrameSource};
pub use ledger::{DetectionLedger, LedgerRow};
pub use pipeline::{
    CycleOutcome, InferencePolicy, PipelineHandle, PipelineLoop, PipelineReport, PipelineSettings,
    PipelineState, PipelineStats, SkipReason, StopReason,
};
pub use publisher::{FramePublisher, PublishedFrame};
pub use server::{ServerConfig, ServerHandle, StreamServer};
