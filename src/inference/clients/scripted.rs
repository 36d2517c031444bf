use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use crate::inference::client::InferenceClient;
use crate::inference::result::{InferenceResponse, ModelRef};

/// One scripted engine reply.
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Respond(InferenceResponse),
    Fail(String),
}

/// Replays a fixed list of replies, one per `infer` call.
///
/// Once the script is exhausted every further call fails. The attached
/// [`ClientProbe`] stays readable after the client has been moved into a pipeline.
pub struct ScriptedClient {
    replies: VecDeque<ScriptedReply>,
    probe: ClientProbe,
}

/// Shared counters for a [`ScriptedClient`].
#[derive(Clone, Debug, Default)]
pub struct ClientProbe {
    calls: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    models: Arc<Mutex<Vec<ModelRef>>>,
}

impl ClientProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Models requested so far, in call order.
    pub fn models(&self) -> Vec<ModelRef> {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ScriptedClient {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            probe: ClientProbe::default(),
        }
    }

    pub fn probe(&self) -> ClientProbe {
        self.probe.clone()
    }
}

impl InferenceClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn connect(&mut self) -> Result<()> {
        self.probe.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn infer(&mut self, model: &ModelRef, _encoded_frame: &[u8]) -> Result<InferenceResponse> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(model.clone());
        match self.replies.pop_front() {
            Some(ScriptedReply::Respond(response)) => Ok(response),
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted client exhausted")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.probe.connected.store(false, Ordering::SeqCst);
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
