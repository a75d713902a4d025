//! SSE (Server-Sent Events) frame decoder, encoder, and stream utilities.
//!
//! Decoding buffers raw bytes and only converts complete blocks to text, so a
//! multi-byte character split across network chunks is reassembled before
//! UTF-8 validation.

use std::sync::LazyLock;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use memchr::{memchr_iter, memmem};
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";
pub const KEEP_ALIVE_FRAME: &str = ":keep-alive\n\n";

const DONE_MARKER: &str = "[DONE]";

/// One decoded SSE block.
#[derive(Debug, Clone, PartialEq)]
pub enum SseItem {
    Data(Value),
    /// `data: [DONE]`; the stream is over.
    Done,
}

// ---------------------------------------------------------------------------
// SseDecoder: incremental byte-level block decoder
// ---------------------------------------------------------------------------

/// Incremental SSE decoder.
///
/// Feed it raw byte chunks split at arbitrary offsets and it yields one
/// [`SseItem`] per complete block. Blocks without `data:` lines (comments,
/// keep-alives) yield nothing. A block whose payload is not JSON is logged and
/// skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    scan_from: usize,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scan_from: 0,
        }
    }

    /// Feed raw bytes and return any items completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append completed items into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<SseItem>) {
        self.buffer.extend_from_slice(chunk);
        while let Some((start, len)) = find_sse_frame_terminator_from(&self.buffer, self.scan_from)
        {
            let block = self.buffer.split_to(start + len);
            if let Some(item) = decode_block(&block[..start]) {
                out.push(item);
            }
            self.scan_from = 0;
        }
        // Keep a small overlap so a terminator spanning chunks is still found.
        self.scan_from = self.buffer.len().saturating_sub(3);
    }

    /// Flush a trailing unterminated block at end of input.
    pub fn finish(&mut self) -> Option<SseItem> {
        self.scan_from = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let block = self.buffer.split();
        decode_block(&block)
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_block(block: &[u8]) -> Option<SseItem> {
    let mut data_lines: SmallVec<[&[u8]; 4]> = SmallVec::new();
    let mut line_start = 0;
    let line_ends = memchr_iter(b'\n', block).chain(std::iter::once(block.len()));
    for line_end in line_ends {
        if line_start > block.len() {
            break;
        }
        let mut line = &block[line_start..line_end];
        line_start = line_end + 1;
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if let Some(value) = line.strip_prefix(b"data:") {
            data_lines.push(value.strip_prefix(b" ").unwrap_or(value));
        }
        // `event:`, `id:`, `retry:` and `:` comment lines carry nothing we use.
    }
    if data_lines.is_empty() {
        return None;
    }

    let payload = data_lines.join(&b'\n');
    let text = match std::str::from_utf8(&payload) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("skipping SSE block with invalid UTF-8: {err}");
            return None;
        }
    };
    if text.trim() == DONE_MARKER {
        return Some(SseItem::Done);
    }
    match serde_json::from_str(text) {
        Ok(value) => Some(SseItem::Data(value)),
        Err(err) => {
            tracing::warn!("skipping malformed SSE data block: {err}");
            None
        }
    }
}

#[inline]
fn find_sse_frame_terminator_from(buffer: &[u8], scan_from: usize) -> Option<(usize, usize)> {
    static LF_LF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\n\n"));
    static CRLF_CRLF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\r\n\r\n"));

    let scan_from = scan_from.min(buffer.len());
    let haystack = &buffer[scan_from..];
    let lf_lf_pos = LF_LF_FINDER.find(haystack).map(|rel| scan_from + rel);
    let crlf_crlf_pos = CRLF_CRLF_FINDER.find(haystack).map(|rel| scan_from + rel);

    match (lf_lf_pos, crlf_crlf_pos) {
        (Some(lf_pos), Some(crlf_pos)) => {
            if lf_pos <= crlf_pos {
                Some((lf_pos, 2))
            } else {
                Some((crlf_pos, 4))
            }
        }
        (Some(lf_pos), None) => Some((lf_pos, 2)),
        (None, Some(crlf_pos)) => Some((crlf_pos, 4)),
        (None, None) => None,
    }
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Decode an HTTP body byte stream into [`SseItem`]s.
///
/// The stream ends after the first [`SseItem::Done`]. Transport errors are
/// passed through and end the stream.
pub fn decode_sse_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseItem, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseDecoder::new(),
            std::collections::VecDeque::<SseItem>::with_capacity(8),
            Vec::<SseItem>::with_capacity(8),
            false,
        ),
        |(mut stream, mut decoder, mut pending, mut parsed, mut finished)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    if item == SseItem::Done {
                        pending.clear();
                        finished = true;
                    }
                    return Some((Ok(item), (stream, decoder, pending, parsed, finished)));
                }
                if finished {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        decoder.feed_into(&bytes, &mut parsed);
                        pending.extend(parsed.drain(..));
                    }
                    Some(Err(err)) => {
                        finished = true;
                        return Some((Err(err), (stream, decoder, pending, parsed, finished)));
                    }
                    None => {
                        finished = true;
                        if let Some(item) = decoder.finish() {
                            pending.push_back(item);
                        }
                    }
                }
            }
        },
    )
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format a `data:` frame around an already-serialized JSON payload.
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Serialize `value` and wrap it in a `data:` frame.
///
/// # Errors
///
/// Returns an error when `value` cannot be serialized.
pub fn json_frame<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(b"data: ");
    serde_json::to_writer(&mut out, value)?;
    out.extend_from_slice(b"\n\n");
    Ok(Bytes::from(out))
}

#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

#[must_use]
pub fn keep_alive_frame() -> Bytes {
    Bytes::from_static(KEEP_ALIVE_FRAME.as_bytes())
}

/// `200 OK` response with the event-stream headers.
#[must_use]
pub fn sse_ok_response(body: axum::body::Body) -> axum::response::Response {
    let mut response = axum::response::Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
