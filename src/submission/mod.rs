//! Client-side submission orchestrator.
//!
//! Drives one generation per conversation: formats the request, runs the
//! capability pipeline, sends it through a [`ProviderClient`], appends each
//! chunk to the conversation store and records failures. At most one
//! generation is in flight per conversation.

pub mod state;
pub mod store;
pub mod title;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

pub use state::{Phase, SubmissionState};
pub use store::{Conversation, ConversationStore, InMemoryConversationStore};
pub use title::TitleSettings;

use crate::auth::{ApiKey, ApiKeyProvider};
use crate::capability::{CapabilityContext, CapabilityRegistry};
use crate::config::AppConfig;
use crate::error::{classify_upstream_status, RelayError};
use crate::protocol::{AdapterRegistry, ModelConfig, ProviderKind, ProviderResponse, Role};
use crate::state::request_id::RequestIdGenerator;
use crate::stream::{SseItem, StreamEvent};
use crate::transport::{Endpoint, HttpTransport, ProviderClient};

/// Ended phases remembered before entries for conversations the store no
/// longer knows are pruned.
const MAX_REMEMBERED_PHASES: usize = 1024;

/// Result of a submission that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReport {
    /// `Done` or `Cancelled`.
    pub phase: Phase,
    /// Non-empty chunks appended to the conversation.
    pub chunks: u64,
}

pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    keys: Arc<dyn ApiKeyProvider>,
    capabilities: Arc<CapabilityRegistry>,
    clients: FxHashMap<ProviderKind, ProviderClient>,
    titles: Option<TitleSettings>,
    in_flight: Mutex<FxHashMap<String, Arc<SubmissionState>>>,
    last_phase: Mutex<FxHashMap<String, Phase>>,
    trace_ids: RequestIdGenerator,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        keys: Arc<dyn ApiKeyProvider>,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            store,
            keys,
            capabilities,
            clients: FxHashMap::default(),
            titles: None,
            in_flight: Mutex::new(FxHashMap::default()),
            last_phase: Mutex::new(FxHashMap::default()),
            trace_ids: RequestIdGenerator::new(),
        }
    }

    /// Orchestrator with one client per provider, sending through
    /// `client.relay_url` when set and straight to the vendor otherwise.
    #[must_use]
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        keys: Arc<dyn ApiKeyProvider>,
        transport: Arc<HttpTransport>,
        adapters: &AdapterRegistry,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Self {
        let timeout = Duration::from_secs(config.server.timeout);
        let mut orchestrator = Self::new(store, keys, capabilities);
        for kind in ProviderKind::ALL {
            let endpoint = match config.client.relay_url.as_deref() {
                Some(relay) => Endpoint::Relay(relay.to_string()),
                None => Endpoint::Direct(config.providers.base_url(kind).to_string()),
            };
            orchestrator = orchestrator.with_client(ProviderClient::new(
                Arc::clone(&transport),
                adapters.get(kind),
                endpoint,
                timeout,
            ));
        }
        if config.client.generate_titles {
            orchestrator = orchestrator.with_titles(TitleSettings {
                max_tokens: config.client.title_max_tokens,
                ..TitleSettings::default()
            });
        }
        orchestrator
    }

    #[must_use]
    pub fn with_client(mut self, client: ProviderClient) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    #[must_use]
    pub fn with_titles(mut self, settings: TitleSettings) -> Self {
        self.titles = Some(settings);
        self
    }

    /// Current phase of the conversation's generation, or the phase the last
    /// one ended in. Conversations the store no longer knows are `Idle`.
    #[must_use]
    pub fn phase(&self, conversation_id: &str) -> Phase {
        if let Some(state) = self.in_flight.lock().get(conversation_id) {
            return state.phase();
        }
        let mut last_phase = self.last_phase.lock();
        let Some(phase) = last_phase.get(conversation_id).copied() else {
            return Phase::Idle;
        };
        if self.store.conversation(conversation_id).is_none() {
            last_phase.remove(conversation_id);
            return Phase::Idle;
        }
        phase
    }

    #[must_use]
    pub fn is_generating(&self, conversation_id: &str) -> bool {
        self.in_flight.lock().contains_key(conversation_id)
    }

    /// Cancel the conversation's in-flight generation.
    ///
    /// Returns `false` when nothing was in flight.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let state = self.in_flight.lock().get(conversation_id).cloned();
        let cancelled = state.is_some_and(|state| state.cancel());
        if cancelled {
            tracing::info!(conversation = conversation_id, "generation cancelled");
        }
        cancelled
    }

    /// Submit the store's active conversation.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::submit`].
    pub async fn submit_active(&self) -> Result<SubmissionReport, RelayError> {
        let id = self
            .store
            .active_conversation()
            .ok_or_else(|| RelayError::InvalidRequest("no active conversation".into()))?;
        self.submit(&id).await
    }

    /// Generate the next assistant turn of `conversation_id`.
    ///
    /// Cancellation is not an error: it yields a report in
    /// [`Phase::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SubmissionInFlight`] without any network call
    /// when the conversation is already generating. Any other failure is
    /// also written to the conversation's error slot.
    pub async fn submit(&self, conversation_id: &str) -> Result<SubmissionReport, RelayError> {
        let state = self.reserve(conversation_id)?;
        let guard = InFlightGuard {
            orchestrator: self,
            id: conversation_id.to_string(),
            state: Arc::clone(&state),
        };

        let outcome = self.run(conversation_id, &state).await;
        let result = match outcome {
            Ok(chunks) if state.advance(Phase::Done) => Ok(SubmissionReport {
                phase: Phase::Done,
                chunks,
            }),
            Ok(chunks) => Ok(SubmissionReport {
                phase: state.phase(),
                chunks,
            }),
            Err(err) if state.advance(Phase::Errored) => {
                if err.is_transport() {
                    tracing::warn!(conversation = conversation_id, error = %err, "generation failed");
                } else {
                    tracing::error!(conversation = conversation_id, error = %err, "generation failed");
                }
                self.store
                    .set_error(conversation_id, Some(err.user_message()));
                Err(err)
            }
            // Cancelled before any output, or while the failure was in flight.
            Err(err) => {
                tracing::debug!(conversation = conversation_id, error = %err, "generation ended after cancel");
                Ok(SubmissionReport {
                    phase: state.phase(),
                    chunks: 0,
                })
            }
        };
        drop(guard);

        if let Ok(report) = &result {
            if report.phase == Phase::Done && report.chunks > 0 {
                self.maybe_generate_title(conversation_id).await;
            }
        }
        result
    }

    fn reserve(&self, conversation_id: &str) -> Result<Arc<SubmissionState>, RelayError> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(conversation_id) {
            tracing::debug!(conversation = conversation_id, "submission rejected: already in flight");
            return Err(RelayError::SubmissionInFlight(conversation_id.to_string()));
        }
        let state = Arc::new(SubmissionState::new());
        state.advance(Phase::Sending);
        in_flight.insert(conversation_id.to_string(), Arc::clone(&state));
        Ok(state)
    }

    fn client_and_key(&self, provider: ProviderKind) -> Result<(&ProviderClient, ApiKey), RelayError> {
        let client = self
            .clients
            .get(&provider)
            .ok_or_else(|| RelayError::UnsupportedProvider(provider.to_string()))?;
        let key = self
            .keys
            .get_key(provider)
            .ok_or(RelayError::MissingApiKey(provider))?;
        Ok((client, key))
    }

    /// Run one generation; returns the number of appended chunks.
    async fn run(&self, id: &str, state: &SubmissionState) -> Result<u64, RelayError> {
        let conversation = self
            .store
            .conversation(id)
            .ok_or_else(|| RelayError::InvalidRequest(format!("unknown conversation '{id}'")))?;
        let provider = conversation.provider;
        let (client, key) = self.client_and_key(provider)?;

        self.store.set_generating(id, true);
        self.store.set_error(id, None);

        let mut config = conversation.config.clone();
        self.capabilities.normalize_config(&mut config);
        let adapter = client.adapter();
        let request = adapter.format_request(&conversation.messages, &config);
        if request.messages.is_empty() {
            return Err(RelayError::InvalidRequest("conversation has no content to send".into()));
        }
        let ctx = CapabilityContext::new(provider, &config);
        let request = self.capabilities.apply_request_middleware(request, &ctx);
        let trace_id = self.trace_ids.next_id();
        let token = state.token().clone();

        tracing::info!(
            conversation = id,
            provider = %provider,
            model = %request.model,
            stream = request.stream,
            trace_id = %trace_id,
            "submitting"
        );

        if !request.stream {
            let response = tokio::select! {
                biased;
                () = token.cancelled() => return Err(RelayError::Cancelled),
                response = client.submit_completion(&request, &key, Some(&trace_id)) => response?,
            };
            let response = self.capabilities.apply_response_middleware(response, &ctx);
            if response.text().is_empty() {
                return Ok(0);
            }
            self.store.append_assistant_chunk(id, response.text());
            return Ok(1);
        }

        let mut upstream = tokio::select! {
            biased;
            () = token.cancelled() => return Err(RelayError::Cancelled),
            opened = client.submit_stream(&request, &key, Some(&trace_id)) => opened?,
        };
        if !state.advance(Phase::Streaming) {
            return Err(RelayError::Cancelled);
        }

        let mut chunks = 0;
        loop {
            let item = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(chunks),
                item = upstream.next() => item,
            };
            match item {
                None | Some(Ok(SseItem::Done)) => break,
                Some(Ok(SseItem::Data(chunk))) => match adapter.stream_event(&chunk) {
                    Some(StreamEvent::Delta(text)) => {
                        let response = self
                            .capabilities
                            .apply_response_middleware(ProviderResponse::delta(text), &ctx);
                        if !response.text().is_empty() {
                            self.store.append_assistant_chunk(id, response.text());
                            chunks += 1;
                        }
                    }
                    Some(StreamEvent::Error { status, message }) => {
                        return Err(classify_upstream_status(status, message, None));
                    }
                    Some(StreamEvent::Start | StreamEvent::Stop) | None => {}
                },
                Some(Err(err)) => return Err(err),
            }
        }
        tracing::debug!(conversation = id, chunks, "stream finished");
        Ok(chunks)
    }

    async fn maybe_generate_title(&self, id: &str) {
        let Some(settings) = self.titles.as_ref() else {
            return;
        };
        let Some(conversation) = self.store.conversation(id) else {
            return;
        };
        if !conversation.title.is_empty() && conversation.title != title::DEFAULT_TITLE {
            return;
        }
        let (Some(user), Some(assistant)) = (
            conversation.last_content(Role::User),
            conversation.last_content(Role::Assistant),
        ) else {
            return;
        };
        let (client, key) = match self.client_and_key(conversation.provider) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(conversation = id, error = %err, "skipping title generation");
                return;
            }
        };
        let base = ModelConfig {
            stream: false,
            ..conversation.config.clone()
        };
        match title::generate_title(client, &key, &base, user, assistant, settings).await {
            Ok(title) => {
                tracing::debug!(conversation = id, title = %title, "title generated");
                self.store.set_title(id, &title);
            }
            Err(err) => tracing::warn!(conversation = id, error = %err, "title generation failed"),
        }
    }
}

/// Releases the in-flight slot and clears the generating flag on every exit
/// path, including the submit future being dropped.
struct InFlightGuard<'a> {
    orchestrator: &'a Orchestrator,
    id: String,
    state: Arc<SubmissionState>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        // Still active here means the submit future was dropped mid-flight.
        if self.state.phase().is_active() {
            self.state.cancel();
        }
        {
            let mut in_flight = self.orchestrator.in_flight.lock();
            if in_flight
                .get(&self.id)
                .is_some_and(|current| Arc::ptr_eq(current, &self.state))
            {
                in_flight.remove(&self.id);
            }
        }
        {
            let mut last_phase = self.orchestrator.last_phase.lock();
            if last_phase.len() >= MAX_REMEMBERED_PHASES {
                let store = &self.orchestrator.store;
                last_phase.retain(|id, _| store.conversation(id).is_some());
            }
            last_phase.insert(self.id.clone(), self.state.phase());
        }
        self.orchestrator.store.set_generating(&self.id, false);
    }
}
