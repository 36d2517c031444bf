//! viewerd - live inference viewer daemon
//!
//! This daemon:
//! 1. Opens the configured frame source and inference client
//! 2. Runs the capture/infer/annotate pipeline on its own thread
//! 3. Serves the annotated stream and detection table over HTTP
//! 4. Keeps serving the last frame and table after the pipeline stops

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use inference_viewer::{
    open_client, open_source, DetectionLedger, FramePublisher, LogIndicator, PipelineLoop,
    StreamServer, SysfsGpioIndicator, ViewerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "VIEWER_CONFIG")]
    config: Option<PathBuf>,
    /// HTTP port (keeps the configured bind address).
    #[arg(long)]
    port: Option<u16>,
    /// Frame source URL (stub://name, dir:/path, http(s)://..., gst://...).
    #[arg(long)]
    source: Option<String>,
    /// Comma-separated class names, in model index order.
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => ViewerConfig::load_from(path)?,
        None => ViewerConfig::load()?,
    };
    if let Some(port) = args.port {
        let mut addr: SocketAddr = cfg
            .server
            .addr
            .parse()
            .with_context(|| format!("invalid server address '{}'", cfg.server.addr))?;
        addr.set_port(port);
        cfg.server.addr = addr.to_string();
    }
    if let Some(source) = args.source {
        cfg.capture.url = source;
    }
    if let Some(classes) = args.classes {
        cfg.classes = classes.into_iter().map(|c| c.trim().to_string()).collect();
    }
    cfg.validate()?;

    let publisher = Arc::new(FramePublisher::new());
    let ledger = Arc::new(DetectionLedger::new(cfg.row_limit));

    let server = StreamServer::new(cfg.server.clone(), publisher.clone(), ledger.clone()).spawn()?;
    log::info!("viewer available at http://{}/", server.addr);

    let settings = cfg.pipeline_settings()?;
    let source = open_source(&cfg.capture)?;
    let client = open_client(
        &cfg.inference,
        &settings.classes,
        (cfg.capture.display_width, cfg.capture.display_height),
    )?;
    log::info!(
        "source={} backend={:?} model={} classes={:?}",
        cfg.capture.url,
        cfg.inference.backend,
        settings.model,
        cfg.classes
    );

    let mut pipeline = PipelineLoop::new(source, client, publisher, ledger, settings)
        .with_indicator(Box::new(LogIndicator));
    let pins = &cfg.indicator.pins;
    if pins.idle.is_some() || pins.processing.is_some() || pins.detection.is_some() {
        log::info!("gpio indicator enabled at {}", cfg.indicator.gpio_root.display());
        pipeline = pipeline.with_indicator(Box::new(SysfsGpioIndicator::new(
            cfg.indicator.gpio_root.clone(),
            pins.clone(),
        )));
    }
    let pipeline = pipeline.spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("viewerd running; waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping pipeline and server...");
    pipeline.cancel();
    let report = pipeline.join()?;
    log::info!(
        "pipeline stopped: {} (frames={} published={} skipped={} detections={})",
        report.stop_reason,
        report.stats.frames_captured,
        report.stats.cycles_published,
        report.stats.cycles_skipped,
        report.stats.detections
    );
    server.stop()?;

    Ok(())
}
