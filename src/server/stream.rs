//! Multipart JPEG stream for `/stream_frames`.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::publisher::FramePublisher;

pub const BOUNDARY: &str = "frame";

/// Encoded JPEG of the latest published frame, shared by every viewer.
///
/// A frame is encoded once per publish sequence no matter how many viewers are
/// attached.
#[derive(Debug)]
pub struct JpegCache {
    quality: u8,
    entry: Mutex<Option<(u64, Arc<Vec<u8>>)>>,
}

impl JpegCache {
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            entry: Mutex::new(None),
        }
    }

    /// `(sequence, jpeg)` for the latest frame, `None` before the first publish.
    pub fn latest(&self, publisher: &FramePublisher) -> Result<Option<(u64, Arc<Vec<u8>>)>> {
        let Some(published) = publisher.snapshot() else {
            return Ok(None);
        };
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((sequence, jpeg)) = entry.as_ref() {
            if *sequence == published.sequence {
                return Ok(Some((*sequence, jpeg.clone())));
            }
        }
        let jpeg = Arc::new(published.frame.encode_jpeg(self.quality)?);
        *entry = Some((published.sequence, jpeg.clone()));
        Ok(Some((published.sequence, jpeg)))
    }
}

pub(crate) struct StreamPacing {
    pub poll: Duration,
    pub resend: Duration,
}

pub(crate) fn write_stream_header<W: Write>(out: &mut W) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
    );
    out.write_all(header.as_bytes())?;
    out.flush()?;
    Ok(())
}

pub(crate) fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> Result<()> {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    out.write_all(head.as_bytes())?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()?;
    Ok(())
}

/// Serve parts until the viewer goes away or the server shuts down.
///
/// A part goes out whenever the publish sequence moves, and the current frame is
/// repeated every `resend` while nothing new arrives. Nothing is written before
/// the first publish.
pub(crate) fn serve_stream<W: Write>(
    out: &mut W,
    publisher: &FramePublisher,
    cache: &JpegCache,
    pacing: &StreamPacing,
    shutdown: &AtomicBool,
) -> Result<()> {
    write_stream_header(out)?;
    let mut last_sequence = 0u64;
    let mut last_sent: Option<Instant> = None;
    while !shutdown.load(Ordering::SeqCst) {
        if let Some((sequence, jpeg)) = cache.latest(publisher)? {
            let stale = last_sent.map_or(true, |sent| sent.elapsed() >= pacing.resend);
            if sequence != last_sequence || stale {
                write_part(out, &jpeg)?;
                last_sequence = sequence;
                last_sent = Some(Instant::now());
            }
        }
        std::thread::sleep(pacing.poll);
    }
    Ok(())
}
