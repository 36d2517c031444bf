use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::{DEFAULT_LINE_WIDTH, MAX_LINE_WIDTH};
use crate::classes::ClassTable;
use crate::indicator::GpioPins;
use crate::inference::ModelRef;
use crate::ingest::CaptureConfig;
use crate::ledger::DEFAULT_ROW_LIMIT;
use crate::pipeline::{InferencePolicy, PipelineSettings, DEFAULT_JPEG_QUALITY};
use crate::server::ServerConfig;

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_STREAM_POLL_MS: u64 = 30;
const DEFAULT_STREAM_RESEND_MS: u64 = 1000;
const DEFAULT_TABLE_REFRESH_MS: u64 = 1000;
const DEFAULT_INFERENCE_URL: &str = "http://localhost:55000";
const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

// ---- File layout (every field optional) ----

#[derive(Debug, Deserialize, Default)]
struct ViewerConfigFile {
    server: Option<ServerConfigFile>,
    inference: Option<InferenceConfigFile>,
    classes: Option<Vec<String>>,
    capture: Option<CaptureConfigFile>,
    annotate: Option<AnnotateConfigFile>,
    ledger: Option<LedgerConfigFile>,
    indicator: Option<IndicatorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    stream_poll_ms: Option<u64>,
    stream_resend_ms: Option<u64>,
    table_refresh_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    backend: Option<String>,
    url: Option<String>,
    model_id: Option<String>,
    model_version: Option<String>,
    timeout_ms: Option<u64>,
    policy: Option<String>,
    retry_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    stub_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    url: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    display_width: Option<u32>,
    display_height: Option<u32>,
    framerate: Option<u32>,
    flip_method: Option<u32>,
    exposure_low_ns: Option<u64>,
    exposure_high_ns: Option<u64>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    line_width: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct LedgerConfigFile {
    row_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct IndicatorConfigFile {
    gpio_root: Option<PathBuf>,
    idle: Option<u32>,
    processing: Option<u32>,
    detection: Option<u32>,
}

// ---- Resolved configuration ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceBackend {
    Http,
    Stub,
}

impl InferenceBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!("unknown inference backend '{}' (expected http or stub)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceSettings {
    pub backend: InferenceBackend,
    pub url: String,
    pub model_id: String,
    pub model_version: String,
    pub timeout: Duration,
    pub policy: InferencePolicy,
    pub stub_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSettings {
    pub gpio_root: PathBuf,
    pub pins: GpioPins,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub server: ServerConfig,
    pub inference: InferenceSettings,
    pub classes: Vec<String>,
    pub capture: CaptureConfig,
    pub line_width: u32,
    pub jpeg_quality: u8,
    pub row_limit: usize,
    pub indicator: IndicatorSettings,
}

impl ViewerConfig {
    /// Defaults, then the file named by `VIEWER_CONFIG`, then `VIEWER_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIEWER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ViewerConfigFile) -> Result<Self> {
        let server_file = file.server.unwrap_or_default();
        let inference_file = file.inference.unwrap_or_default();
        let capture_file = file.capture.unwrap_or_default();
        let annotate_file = file.annotate.unwrap_or_default();
        let indicator_file = file.indicator.unwrap_or_default();
        let capture_defaults = CaptureConfig::default();

        let jpeg_quality = annotate_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        let server = ServerConfig {
            addr: server_file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            stream_poll: Duration::from_millis(
                server_file.stream_poll_ms.unwrap_or(DEFAULT_STREAM_POLL_MS),
            ),
            stream_resend: Duration::from_millis(
                server_file
                    .stream_resend_ms
                    .unwrap_or(DEFAULT_STREAM_RESEND_MS),
            ),
            table_refresh: Duration::from_millis(
                server_file
                    .table_refresh_ms
                    .unwrap_or(DEFAULT_TABLE_REFRESH_MS),
            ),
            jpeg_quality,
        };

        let backend = match inference_file.backend.as_deref() {
            Some(value) => InferenceBackend::parse(value)?,
            None => InferenceBackend::Stub,
        };
        let policy = parse_policy(
            inference_file.policy.as_deref().unwrap_or("fail_fast"),
            inference_file.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            inference_file
                .retry_backoff_ms
                .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
        )?;
        let inference = InferenceSettings {
            backend,
            url: inference_file
                .url
                .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
            model_id: inference_file.model_id.unwrap_or_default(),
            model_version: inference_file.model_version.unwrap_or_default(),
            timeout: Duration::from_millis(
                inference_file
                    .timeout_ms
                    .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_MS),
            ),
            policy,
            stub_seed: inference_file.stub_seed,
        };

        let capture = CaptureConfig {
            url: capture_file.url.unwrap_or(capture_defaults.url),
            capture_width: capture_file
                .capture_width
                .unwrap_or(capture_defaults.capture_width),
            capture_height: capture_file
                .capture_height
                .unwrap_or(capture_defaults.capture_height),
            display_width: capture_file
                .display_width
                .unwrap_or(capture_defaults.display_width),
            display_height: capture_file
                .display_height
                .unwrap_or(capture_defaults.display_height),
            framerate: capture_file.framerate.unwrap_or(capture_defaults.framerate),
            flip_method: capture_file
                .flip_method
                .unwrap_or(capture_defaults.flip_method),
            exposure_low_ns: capture_file
                .exposure_low_ns
                .unwrap_or(capture_defaults.exposure_low_ns),
            exposure_high_ns: capture_file
                .exposure_high_ns
                .unwrap_or(capture_defaults.exposure_high_ns),
            max_frames: capture_file.max_frames,
        };

        let indicator = IndicatorSettings {
            gpio_root: indicator_file
                .gpio_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GPIO_ROOT)),
            pins: GpioPins {
                idle: indicator_file.idle,
                processing: indicator_file.processing,
                detection: indicator_file.detection,
            },
        };

        Ok(Self {
            server,
            inference,
            classes: file.classes.unwrap_or_default(),
            capture,
            line_width: annotate_file.line_width.unwrap_or(DEFAULT_LINE_WIDTH),
            jpeg_quality,
            row_limit: file
                .ledger
                .and_then(|ledger| ledger.row_limit)
                .unwrap_or(DEFAULT_ROW_LIMIT),
            indicator,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("VIEWER_ADDR") {
            self.server.addr = addr;
        }
        if let Some(url) = non_empty_env("VIEWER_SOURCE_URL") {
            self.capture.url = url;
        }
        if let Some(url) = non_empty_env("VIEWER_INFERENCE_URL") {
            self.inference.url = url;
            self.inference.backend = InferenceBackend::Http;
        }
        if let Some(id) = non_empty_env("VIEWER_MODEL_ID") {
            self.inference.model_id = id;
        }
        if let Some(version) = non_empty_env("VIEWER_MODEL_VERSION") {
            self.inference.model_version = version;
        }
        if let Some(classes) = non_empty_env("VIEWER_CLASSES") {
            self.classes = split_csv(&classes);
        }
        if let Some(rows) = non_empty_env("VIEWER_LEDGER_ROWS") {
            let rows: usize = rows
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIEWER_LEDGER_ROWS must be a positive integer"))?;
            self.row_limit = rows;
        }
        if let Some(policy) = non_empty_env("VIEWER_INFERENCE_POLICY") {
            let (attempts, backoff) = match self.inference.policy {
                InferencePolicy::Retry { attempts, backoff } => (attempts, backoff),
                InferencePolicy::FailFast => (
                    DEFAULT_RETRY_ATTEMPTS,
                    Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
                ),
            };
            self.inference.policy =
                parse_policy(&policy, attempts, backoff.as_millis() as u64)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LINE_WIDTH).contains(&self.line_width) {
            bail!("annotate.line_width must be within 1..={}", MAX_LINE_WIDTH);
        }
        if self.row_limit == 0 {
            bail!("ledger.row_limit must be at least 1");
        }
        if self.capture.framerate == 0 {
            bail!("capture.framerate must be at least 1");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("annotate.jpeg_quality must be within 1..=100");
        }
        if self.server.stream_poll.is_zero() {
            bail!("server.stream_poll_ms must be greater than zero");
        }
        if self.inference.backend == InferenceBackend::Http {
            if self.inference.model_id.trim().is_empty() {
                bail!("inference.model_id is required for the http backend");
            }
            if self.inference.model_version.trim().is_empty() {
                bail!("inference.model_version is required for the http backend");
            }
        }
        ClassTable::new(self.classes.iter().cloned()).context("invalid classes")?;
        Ok(())
    }

    pub fn class_table(&self) -> Result<ClassTable> {
        ClassTable::new(self.classes.iter().cloned())
    }

    pub fn model(&self) -> ModelRef {
        ModelRef::new(&self.inference.model_id, &self.inference.model_version)
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        Ok(PipelineSettings {
            model: self.model(),
            classes: self.class_table()?,
            line_width: self.line_width,
            jpeg_quality: self.jpeg_quality,
            inference_policy: self.inference.policy,
        })
    }
}

fn parse_policy(value: &str, attempts: u32, backoff_ms: u64) -> Result<InferencePolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fail_fast" | "fail-fast" => Ok(InferencePolicy::FailFast),
        "retry" => Ok(InferencePolicy::Retry {
            attempts,
            backoff: Duration::from_millis(backoff_ms),
        }),
        other => Err(anyhow!(
            "unknown inference policy '{}' (expected fail_fast or retry)",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<ViewerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
