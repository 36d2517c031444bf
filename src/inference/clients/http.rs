//! HTTP inference engine client.
//!
//! Talks to an edge inference engine that accepts JPEG uploads:
//!
//! - `GET  {url}/health` on connect
//! - `POST {url}/models/{id}/versions/{version}/run` with `Content-Type: image/jpeg`
//!
//! The response carries an `outputs` map. An empty or missing map means the engine
//! produced nothing for this frame. Otherwise `outputs["results.json"]` holds the
//! detection document, either inline as JSON or as a JSON-encoded string:
//!
//! ```json
//! {"data": {"result": {"detections": [
//!     {"class": "dent", "score": 0.91, "xmin": 10, "ymin": 12, "xmax": 50, "ymax": 48}
//! ]}}}
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::inference::client::InferenceClient;
use crate::inference::result::{BoundingBox, Detection, InferenceResponse, ModelRef};

const RESULTS_KEY: &str = "results.json";

/// Configuration for the HTTP client.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Engine base URL (e.g., "http://localhost:55000").
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:55000".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpInferenceClient {
    base: Url,
    timeout: Duration,
    agent: Option<ureq::Agent>,
}

impl HttpInferenceClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let base = Url::parse(&config.url).context("parse inference url")?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported inference scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            base,
            timeout: config.timeout,
            agent: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }
}

impl InferenceClient for HttpInferenceClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn connect(&mut self) -> Result<()> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let health = self.endpoint("health");
        agent
            .get(&health)
            .call()
            .with_context(|| format!("connect to inference engine at {}", health))?;
        log::info!("HttpInferenceClient: connected to {}", self.base);
        self.agent = Some(agent);
        Ok(())
    }

    fn infer(&mut self, model: &ModelRef, encoded_frame: &[u8]) -> Result<InferenceResponse> {
        let agent = self
            .agent
            .as_ref()
            .ok_or_else(|| anyhow!("inference client not connected; call connect() first"))?;
        let url = self.endpoint(&format!(
            "models/{}/versions/{}/run",
            model.id, model.version
        ));
        let response = agent
            .post(&url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(encoded_frame)
            .with_context(|| format!("run inference for {}", model))?;
        let body = response
            .into_string()
            .context("read inference response body")?;
        parse_run_response(&body)
    }

    fn close(&mut self) -> Result<()> {
        self.agent = None;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    outputs: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ResultsDocument {
    data: ResultsData,
}

#[derive(Debug, Deserialize)]
struct ResultsData {
    result: ResultsBody,
}

#[derive(Debug, Deserialize)]
struct ResultsBody {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    class: String,
    score: f32,
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl WireDetection {
    fn into_detection(self) -> Detection {
        Detection::new(
            self.class,
            self.score,
            BoundingBox::new(
                self.xmin.round() as i32,
                self.ymin.round() as i32,
                self.xmax.round() as i32,
                self.ymax.round() as i32,
            ),
        )
    }
}

/// Parse an engine run response into detections.
pub(crate) fn parse_run_response(body: &str) -> Result<InferenceResponse> {
    let run: RunResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("malformed inference response: {}", e))?;
    let outputs = match run.outputs {
        Some(outputs) if !outputs.is_empty() => outputs,
        _ => return Ok(InferenceResponse::empty()),
    };
    let results = outputs
        .get(RESULTS_KEY)
        .ok_or_else(|| anyhow!("inference response missing '{}' output", RESULTS_KEY))?;
    let document: ResultsDocument = match results {
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| anyhow!("malformed '{}' output: {}", RESULTS_KEY, e))?;

    let detections = document
        .data
        .result
        .detections
        .into_iter()
        .map(WireDetection::into_detection)
        .filter(|det| match det.validate() {
            Ok(()) => true,
            Err(err) => {
                log::warn!("dropping detection from engine: {err:#}");
                false
            }
        })
        .collect::<Vec<_>>();
    Ok(InferenceResponse::with_detections(detections))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_results_document() -> Result<()> {
        let body = r#"{"outputs": {"results.json": {"data": {"result": {"detections": [
            {"class": "dent", "score": 0.9, "xmin": 10, "ymin": 10, "xmax": 50, "ymax": 50}
        ]}}}}}"#;
        let response = parse_run_response(body)?;
        let detections = response.outputs.expect("outputs present");
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, "dent");
        assert_eq!(detections[0].bbox, BoundingBox::new(10, 10, 50, 50));
        Ok(())
    }

    #[test]
    fn parses_string_encoded_results_and_rounds_coordinates() -> Result<()> {
        let inner = r#"{"data":{"result":{"detections":[{"class":"scratch","score":0.5,"xmin":1.4,"ymin":2.6,"xmax":9.5,"ymax":10.0}]}}}"#;
        let body = serde_json::json!({ "outputs": { "results.json": inner } }).to_string();
        let detections = parse_run_response(&body)?.outputs.expect("outputs present");
        assert_eq!(detections[0].bbox, BoundingBox::new(1, 3, 10, 10));
        Ok(())
    }

    #[test]
    fn empty_outputs_mean_no_result() -> Result<()> {
        assert_eq!(parse_run_response(r#"{"outputs": {}}"#)?, InferenceResponse::empty());
        assert_eq!(parse_run_response(r#"{}"#)?, InferenceResponse::empty());
        Ok(())
    }

    #[test]
    fn empty_detection_list_is_still_a_result() -> Result<()> {
        let body = r#"{"outputs": {"results.json": {"data": {"result": {"detections": []}}}}}"#;
        assert_eq!(
            parse_run_response(body)?,
            InferenceResponse::with_detections(vec![])
        );
        Ok(())
    }

    #[test]
    fn malformed_responses_are_errors() {
        assert!(parse_run_response("not json").is_err());
        assert!(parse_run_response(r#"{"outputs": {"other": 1}}"#).is_err());
        assert!(parse_run_response(r#"{"outputs": {"results.json": {"data": {}}}}"#).is_err());
    }

    #[test]
    fn invalid_detections_are_dropped_individually() -> Result<()> {
        let body = r#"{"outputs": {"results.json": {"data": {"result": {"detections": [
            {"class": "dent", "score": 0.9, "xmin": 50, "ymin": 10, "xmax": 10, "ymax": 50},
            {"class": "dent", "score": 1.0000001, "xmin": 1, "ymin": 1, "xmax": 5, "ymax": 5},
            {"class": "scratch", "score": 0.4, "xmin": 2, "ymin": 2, "xmax": 8, "ymax": 8}
        ]}}}}}"#;
        let detections = parse_run_response(body)?.outputs.expect("outputs present");
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, "scratch");
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = HttpClientConfig {
            url: "grpc://localhost:55000".to_string(),
            ..HttpClientConfig::default()
        };
        assert!(HttpInferenceClient::new(config).is_err());
    }

    #[test]
    fn infer_requires_connect() -> Result<()> {
        let mut client = HttpInferenceClient::new(HttpClientConfig::default())?;
        let model = ModelRef::new("m", "1");
        assert!(client.infer(&model, b"jpeg").is_err());
        Ok(())
    }
}
