//! Server-side stream relay: vendor SSE in, normalized delta frames out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::keepalive::KeepAlive;
use super::sse::{done_frame, json_frame, SseItem};
use super::{error_frame_payload, StreamEvent};
use crate::capability::{CapabilityContext, CapabilityRegistry};
use crate::error::RelayError;
use crate::observability::log_request_complete;
use crate::observability::token_counter::{estimate_tokens, merge_usage};
use crate::protocol::{ModelConfig, ProviderAdapter, ProviderResponse, Usage};
use crate::transport::UpstreamStream;

const CHUNK_LOG_INTERVAL: u64 = 50;

/// Per-request settings for [`relay_sse_stream`].
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub keep_alive_interval: Duration,
    /// Cancelling ends the output immediately, keep-alives included.
    pub cancel: CancellationToken,
    pub request_id: String,
    pub estimated_input_tokens: u64,
}

impl RelayOptions {
    #[must_use]
    pub fn new(keep_alive_interval: Duration) -> Self {
        Self {
            keep_alive_interval,
            cancel: CancellationToken::new(),
            request_id: String::new(),
            estimated_input_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Finishing,
    Finished,
}

struct RelayState {
    upstream: UpstreamStream,
    adapter: Arc<dyn ProviderAdapter>,
    capabilities: Arc<CapabilityRegistry>,
    model_config: ModelConfig,
    request_id: String,
    phase: Phase,
    chunks: u64,
    output_tokens: u64,
    input_tokens: u64,
    upstream_usage: Option<Usage>,
    started: Instant,
}

impl RelayState {
    /// Frame for one decoded upstream chunk, if it produces any output.
    fn on_chunk(&mut self, chunk: &Value) -> Option<Bytes> {
        if let Some(usage) = chunk_usage(chunk) {
            self.upstream_usage = Some(usage);
        }

        match self.adapter.stream_event(chunk)? {
            StreamEvent::Delta(text) => {
                let ctx = CapabilityContext::new(self.adapter.kind(), &self.model_config);
                let response = self
                    .capabilities
                    .apply_response_middleware(ProviderResponse::delta(text), &ctx);
                if response.text().is_empty() {
                    return None;
                }
                self.chunks += 1;
                self.output_tokens += estimate_tokens(response.text());
                if self.chunks % CHUNK_LOG_INTERVAL == 0 {
                    tracing::debug!(
                        request_id = %self.request_id,
                        chunks = self.chunks,
                        "relaying stream"
                    );
                }
                // Relay only the normalized delta shape.
                let frame = ProviderResponse::delta(response.text());
                self.frame(&frame)
            }
            StreamEvent::Error { status, message } => {
                tracing::warn!(
                    request_id = %self.request_id,
                    status,
                    "upstream reported error mid-stream: {message}"
                );
                self.phase = Phase::Finishing;
                let err = crate::error::classify_upstream_status(status, message, None);
                self.frame(&error_frame_payload(&err))
            }
            StreamEvent::Start | StreamEvent::Stop => None,
        }
    }

    fn on_failure(&mut self, err: &RelayError) -> Option<Bytes> {
        tracing::warn!(request_id = %self.request_id, error = %err, "stream relay failed");
        self.phase = Phase::Finishing;
        self.frame(&error_frame_payload(err))
    }

    fn frame<T: serde::Serialize>(&self, value: &T) -> Option<Bytes> {
        match json_frame(value) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::error!(request_id = %self.request_id, "failed to encode frame: {err}");
                None
            }
        }
    }

    fn finish(&mut self) -> Bytes {
        self.phase = Phase::Finished;
        let usage = merge_usage(
            self.upstream_usage.as_ref(),
            self.input_tokens,
            self.output_tokens,
        );
        log_request_complete(&self.model_config.model, &usage, self.started);
        done_frame()
    }
}

fn chunk_usage(chunk: &Value) -> Option<Usage> {
    let usage = chunk.get("usage")?;
    if !usage.is_object() || usage.get("prompt_tokens").is_none() {
        return None;
    }
    serde_json::from_value(usage.clone()).ok()
}

/// Convert a decoded vendor stream into the relay's SSE output.
///
/// Every text chunk becomes `data: {"choices":[{"delta":{"content":..}}]}`
/// after response middleware. A failure becomes one error frame. The output
/// always ends with `data: [DONE]` unless cancelled, and `:keep-alive`
/// comments fill idle gaps until then.
pub fn relay_sse_stream(
    upstream: UpstreamStream,
    adapter: Arc<dyn ProviderAdapter>,
    capabilities: Arc<CapabilityRegistry>,
    model_config: ModelConfig,
    options: RelayOptions,
) -> impl Stream<Item = Bytes> + Send + 'static {
    let state = RelayState {
        upstream,
        adapter,
        capabilities,
        model_config,
        request_id: options.request_id,
        phase: Phase::Streaming,
        chunks: 0,
        output_tokens: 0,
        input_tokens: options.estimated_input_tokens,
        upstream_usage: None,
        started: Instant::now(),
    };

    let frames = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Finished => return None,
                Phase::Finishing => {
                    let frame = state.finish();
                    return Some((frame, state));
                }
                Phase::Streaming => {}
            }

            match state.upstream.next().await {
                None | Some(Ok(SseItem::Done)) => state.phase = Phase::Finishing,
                Some(Ok(SseItem::Data(chunk))) => {
                    if let Some(frame) = state.on_chunk(&chunk) {
                        return Some((frame, state));
                    }
                }
                Some(Err(err)) => {
                    if let Some(frame) = state.on_failure(&err) {
                        return Some((frame, state));
                    }
                }
            }
        }
    });

    let cancel = options.cancel;
    KeepAlive::new(
        frames.take_until(cancel.cancelled_owned()),
        options.keep_alive_interval,
    )
}
