//! Minimal HTTP/1.1 request parsing and response writing.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{anyhow, Result};

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
}

/// Read the request head. The body, if any, is ignored.
pub(crate) fn read_request<S: Read>(stream: &mut S) -> Result<HttpRequest> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    parse_request_head(&data)
}

pub(crate) fn parse_request_head(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    })
}

pub(crate) fn request_timeout() -> Duration {
    Duration::from_secs(2)
}

pub(crate) fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

pub(crate) fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line(status),
        content_type,
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

pub(crate) fn write_json_response<W: Write>(stream: &mut W, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_method_and_strips_query() -> Result<()> {
        let mut raw = Cursor::new(b"GET /table_data?t=123 HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
        let req = read_request(&mut raw)?;
        assert_eq!(
            req,
            HttpRequest {
                method: "GET".to_string(),
                path: "/table_data".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn rejects_empty_and_oversized_requests() {
        assert!(parse_request_head(b"").is_err());
        assert!(parse_request_head(b"GET\r\n\r\n").is_err());

        let mut huge = b"GET / HTTP/1.1\r\n".to_vec();
        huge.extend(std::iter::repeat(b'a').take(MAX_REQUEST_BYTES + 10));
        assert!(read_request(&mut Cursor::new(huge)).is_err());
    }

    #[test]
    fn response_carries_length_and_status() -> Result<()> {
        let mut out = Vec::new();
        write_json_response(&mut out, 404, r#"{"error":"not_found"}"#)?;
        let text = String::from_utf8(out)?;
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 21\r\n"));
        assert!(text.ends_with(r#"{"error":"not_found"}"#));
        Ok(())
    }
}
