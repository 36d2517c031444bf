pub mod http;
pub mod scripted;
pub mod stub;

pub use http::{HttpClientConfig, HttpInferenceClient};
pub use scripted::{ClientProbe, ScriptedClient, ScriptedReply};
pub use stub::StubClient;
