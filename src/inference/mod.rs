//! Inference engine clients.
//!
//! The pipeline treats the engine as an opaque call: encoded frame bytes in,
//! structured detections out. Clients:
//! - `HttpInferenceClient`: edge engine over HTTP (production)
//! - `StubClient`: random detections from the class table (demo)
//! - `ScriptedClient`: fixed replies (tests)

mod client;
mod clients;
mod result;

use anyhow::Result;

use crate::classes::ClassTable;
use crate::config::{InferenceBackend, InferenceSettings};

pub use client::InferenceClient;
pub use clients::{
    ClientProbe, HttpClientConfig, HttpInferenceClient, ScriptedClient, ScriptedReply, StubClient,
};
pub use result::{BoundingBox, Detection, InferenceResponse, ModelRef};

/// Build the configured client. Stub boxes are sized to `frame_size`.
pub fn open_client(
    settings: &InferenceSettings,
    classes: &ClassTable,
    frame_size: (u32, u32),
) -> Result<Box<dyn InferenceClient>> {
    match settings.backend {
        InferenceBackend::Http => Ok(Box::new(HttpInferenceClient::new(HttpClientConfig {
            url: settings.url.clone(),
            timeout: settings.timeout,
        })?)),
        InferenceBackend::Stub => Ok(Box::new(StubClient::new(
            classes.clone(),
            frame_size.0,
            frame_size.1,
            settings.stub_seed,
        ))),
    }
}
