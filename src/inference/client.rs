use anyhow::Result;

use crate::inference::result::{InferenceResponse, ModelRef};

/// Connection to an inference engine.
///
/// The pipeline owns exactly one client and calls it from the producer thread
/// only. `infer` may block on network or compute; errors are reported to the
/// pipeline, which decides whether to stop or retry.
pub trait InferenceClient: Send {
    /// Client identifier used in logs.
    fn name(&self) -> &'static str;

    /// Establish the connection. Called once before the first `infer`.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run inference on an encoded (JPEG) frame.
    fn infer(&mut self, model: &ModelRef, encoded_frame: &[u8]) -> Result<InferenceResponse>;

    /// Release the connection. Called once when the pipeline stops.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
