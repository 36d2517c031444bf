use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use inference_viewer::{
    DetectionLedger, Frame, FramePublisher, LedgerRow, ServerConfig, ServerHandle, StreamServer,
};

struct TestServer {
    publisher: Arc<FramePublisher>,
    ledger: Arc<DetectionLedger>,
    handle: Option<ServerHandle>,
}

impl TestServer {
    fn new() -> Result<Self> {
        let publisher = Arc::new(FramePublisher::new());
        let ledger = Arc::new(DetectionLedger::new(25));
        let cfg = ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            stream_poll: Duration::from_millis(5),
            stream_resend: Duration::from_millis(100),
            ..ServerConfig::default()
        };
        let handle = StreamServer::new(cfg, publisher.clone(), ledger.clone()).spawn()?;
        Ok(Self {
            publisher,
            ledger,
            handle: Some(handle),
        })
    }

    fn handle(&self) -> &ServerHandle {
        self.handle
            .as_ref()
            .expect("test server handle should be initialized")
    }

    fn get(&self, path: &str) -> Result<(String, String)> {
        self.request("GET", path)
    }

    fn request(&self, method: &str, path: &str) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes())?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("").to_string();
        let body = parts.next().unwrap_or("").to_string();
        Ok((headers, body))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("failed to stop stream server");
        }
    }
}

/// Read from a stream until `needle` has been seen `count` times or the deadline passes.
fn read_until(stream: &mut TcpStream, needle: &[u8], count: usize, deadline: Duration) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .expect("set read timeout");
    let started = Instant::now();
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while started.elapsed() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(_) => {}
        }
        if data.windows(needle.len()).filter(|w| *w == needle).count() >= count {
            break;
        }
    }
    data
}

#[test]
fn health_reports_publish_sequence() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get("/health")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["status"], "ok");
    assert_eq!(value["frames"], 0);

    server.publisher.publish(Frame::solid(8, 8, [0, 0, 0]));
    let (_, body) = server.get("/health")?;
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["frames"], 1);
    Ok(())
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<()> {
    let server = TestServer::new()?;
    let (headers, body) = server.get("/events")?;
    assert!(headers.contains("404 Not Found"));
    assert!(body.contains(r#""error":"not_found""#));

    let (headers, _) = server.request("POST", "/table_data")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn table_routes_serve_newest_rows_first() -> Result<()> {
    let server = TestServer::new()?;
    server
        .ledger
        .append(vec![LedgerRow::new("2024-05-01 12:00:00", "dent", 0.9)]);
    server
        .ledger
        .append(vec![LedgerRow::new("2024-05-01 12:00:05", "scratch", 0.42)]);

    let (headers, body) = server.get("/table_data")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("text/html"));
    let scratch = body.find("scratch").expect("scratch row");
    let dent = body.find("dent").expect("dent row");
    assert!(scratch < dent);

    let (_, body) = server.get("/table.json")?;
    let rows: Value = serde_json::from_str(&body)?;
    assert_eq!(rows[0]["class"], "scratch");
    assert_eq!(rows[1]["class"], "dent");
    assert_eq!(rows[1]["timestamp"], "2024-05-01 12:00:00");

    let (headers, body) = server.get("/")?;
    assert!(headers.contains("200 OK"));
    assert!(body.contains("/stream_frames"));
    assert!(body.contains("<td>scratch</td>"));
    Ok(())
}

#[test]
fn table_routes_never_serve_more_than_the_row_limit() -> Result<()> {
    let server = TestServer::new()?;
    for idx in 0..30 {
        server
            .ledger
            .append(vec![LedgerRow::new(format!("t{idx}"), "dent", 0.5)]);
    }
    assert!(server.ledger.len() > server.ledger.row_limit());

    let (_, body) = server.get("/table.json")?;
    let rows: Value = serde_json::from_str(&body)?;
    let rows = rows.as_array().expect("row array");
    assert_eq!(rows.len(), server.ledger.row_limit());
    assert_eq!(rows[0]["timestamp"], "t29");

    let (_, body) = server.get("/table_data")?;
    assert_eq!(body.matches("<tr>").count(), server.ledger.row_limit());
    Ok(())
}

#[test]
fn stream_waits_for_first_frame_then_sends_jpeg_parts() -> Result<()> {
    let server = TestServer::new()?;
    let mut stream = TcpStream::connect(server.handle().addr)?;
    stream.write_all(b"GET /stream_frames HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let before = read_until(&mut stream, b"--frame", 1, Duration::from_millis(200));
    let text = String::from_utf8_lossy(&before);
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(!text.contains("--frame\r\n"));

    server.publisher.publish(Frame::solid(32, 24, [200, 30, 30]));
    let data = read_until(&mut stream, b"--frame\r\n", 2, Duration::from_secs(3));
    let text = String::from_utf8_lossy(&data);
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: "));

    // Idle resend: the same frame goes out again without a new publish.
    let parts = data
        .windows(b"--frame\r\n".len())
        .filter(|w| *w == b"--frame\r\n")
        .count();
    assert!(parts >= 2, "expected a resent part, saw {parts}");

    let marker = b"Content-Length: ";
    let at = data
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("part length")
        + marker.len();
    let line_end = at + data[at..].windows(2).position(|w| w == b"\r\n").expect("crlf");
    let len: usize = std::str::from_utf8(&data[at..line_end])?.parse()?;
    let body = line_end + 4;
    let decoded = Frame::decode(&data[body..body + len])?;
    assert_eq!((decoded.width, decoded.height), (32, 24));
    Ok(())
}

#[test]
fn viewer_disconnect_does_not_affect_other_viewers() -> Result<()> {
    let server = TestServer::new()?;
    server.publisher.publish(Frame::solid(16, 16, [0, 128, 0]));

    {
        let mut first = TcpStream::connect(server.handle().addr)?;
        first.write_all(b"GET /stream_frames HTTP/1.1\r\n\r\n")?;
        read_until(&mut first, b"--frame\r\n", 1, Duration::from_secs(2));
    }

    let mut second = TcpStream::connect(server.handle().addr)?;
    second.write_all(b"GET /stream_frames HTTP/1.1\r\n\r\n")?;
    let data = read_until(&mut second, b"--frame\r\n", 1, Duration::from_secs(2));
    assert!(String::from_utf8_lossy(&data).contains("--frame\r\n"));

    let (headers, _) = server.get("/health")?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn mjpeg_source_can_consume_the_stream() -> Result<()> {
    use inference_viewer::ingest::MjpegSource;
    use inference_viewer::FrameSource;

    let server = TestServer::new()?;
    server.publisher.publish(Frame::solid(40, 30, [10, 200, 10]));

    let url = format!("http://{}/stream_frames", server.handle().addr);
    let mut source = MjpegSource::new(&url, 30)?;
    source.open()?;
    let frame = source.next_frame()?.expect("frame from stream");
    assert_eq!((frame.width, frame.height), (40, 30));
    assert_eq!(source.stats().frames_captured, 1);
    source.close()?;
    Ok(())
}
