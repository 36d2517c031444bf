//! Viewer-facing HTTP server.
//!
//! Serves the live annotated stream and the detection table from the shared
//! [`FramePublisher`] and [`DetectionLedger`]. It only ever reads them, so a
//! stopped pipeline leaves the last frame and table on display.
//!
//! Routes (GET only):
//! - `/`               viewer page
//! - `/table_data`     ledger snapshot as an HTML table fragment
//! - `/table.json`     ledger snapshot as JSON
//! - `/stream_frames`  `multipart/x-mixed-replace` JPEG stream
//! - `/health`         liveness plus the current publish sequence

mod http;
mod page;
mod stream;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::ledger::{render_table_html, DetectionLedger};
use crate::pipeline::DEFAULT_JPEG_QUALITY;
use crate::publisher::FramePublisher;

use self::http::{read_request, request_timeout, write_json_response, write_response};
pub use self::stream::{JpegCache, BOUNDARY};
use self::stream::{serve_stream, StreamPacing};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    /// Publisher poll interval for stream viewers.
    pub stream_poll: Duration,
    /// Re-send the current frame this often when nothing new is published.
    pub stream_resend: Duration,
    /// Table refresh interval used by the viewer page.
    pub table_refresh: Duration,
    pub jpeg_quality: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            stream_poll: Duration::from_millis(30),
            stream_resend: Duration::from_millis(1000),
            table_refresh: Duration::from_millis(1000),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting and signal open streams to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

struct ServerState {
    cfg: ServerConfig,
    publisher: Arc<FramePublisher>,
    ledger: Arc<DetectionLedger>,
    cache: JpegCache,
    shutdown: Arc<AtomicBool>,
}

pub struct StreamServer {
    cfg: ServerConfig,
    publisher: Arc<FramePublisher>,
    ledger: Arc<DetectionLedger>,
}

impl StreamServer {
    pub fn new(
        cfg: ServerConfig,
        publisher: Arc<FramePublisher>,
        ledger: Arc<DetectionLedger>,
    ) -> Self {
        Self {
            cfg,
            publisher,
            ledger,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid server address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {configured_addr}"))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(ServerState {
            cache: JpegCache::new(self.cfg.jpeg_quality),
            cfg: self.cfg,
            publisher: self.publisher,
            ledger: self.ledger,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("stream-server".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, state) {
                    log::error!("stream server stopped: {:#}", err);
                }
            })?;
        log::info!("stream server listening on http://{}", addr);

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("stream-viewer".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::debug!("connection from {} ended: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(request_timeout()))?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("request rejected: {:#}", err);
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Ok(());
        }
    };
    log::debug!("{} {}", request.method, request.path);

    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/" => {
            let rows = state.ledger.snapshot(state.ledger.row_limit());
            let refresh_ms = state.cfg.table_refresh.as_millis() as u64;
            let body = page::render_index(&rows, refresh_ms);
            write_response(&mut stream, 200, "text/html; charset=utf-8", body.as_bytes())
        }
        "/table_data" => {
            let rows = state.ledger.snapshot(state.ledger.row_limit());
            let body = render_table_html(&rows);
            write_response(&mut stream, 200, "text/html; charset=utf-8", body.as_bytes())
        }
        "/table.json" => {
            let rows = state.ledger.snapshot(state.ledger.row_limit());
            let body = serde_json::to_vec(&rows)?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "frames": state.publisher.sequence(),
            });
            write_json_response(&mut stream, 200, &body.to_string())
        }
        "/stream_frames" => {
            let pacing = StreamPacing {
                poll: state.cfg.stream_poll,
                resend: state.cfg.stream_resend,
            };
            serve_stream(
                &mut stream,
                &state.publisher,
                &state.cache,
                &pacing,
                &state.shutdown,
            )
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}
