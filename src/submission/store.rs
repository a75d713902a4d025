use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::protocol::{Message, ModelConfig, ProviderKind, Role};

/// One conversation as the orchestrator sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub provider: ProviderKind,
    pub config: ModelConfig,
    pub messages: Vec<Message>,
    pub generating: bool,
    pub error: Option<String>,
}

impl Conversation {
    #[must_use]
    pub fn new(id: impl Into<String>, provider: ProviderKind, config: ModelConfig) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            provider,
            config,
            messages: Vec::new(),
            generating: false,
            error: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Content of the last message with `role`.
    #[must_use]
    pub fn last_content(&self, role: Role) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == role)
            .map(|message| message.content.as_str())
    }
}

/// Conversation storage the orchestrator writes results into.
///
/// Every method is a single atomic read-modify-write; callers never hold a
/// lock across calls.
pub trait ConversationStore: Send + Sync {
    fn active_conversation(&self) -> Option<String>;

    fn conversation(&self, id: &str) -> Option<Conversation>;

    /// Append `text` to the trailing assistant message, creating that message
    /// on the first chunk of a turn.
    fn append_assistant_chunk(&self, id: &str, text: &str);

    fn set_generating(&self, id: &str, generating: bool);

    fn set_error(&self, id: &str, error: Option<String>);

    fn set_title(&self, _id: &str, _title: &str) {}
}

/// Process-local [`ConversationStore`].
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<FxHashMap<String, Conversation>>,
    active: RwLock<Option<String>>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conversation: Conversation) {
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation);
    }

    pub fn set_active(&self, id: Option<&str>) {
        *self.active.write() = id.map(str::to_string);
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn active_conversation(&self) -> Option<String> {
        self.active.read().clone()
    }

    fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.read().get(id).cloned()
    }

    fn append_assistant_chunk(&self, id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut conversations = self.conversations.write();
        let Some(conversation) = conversations.get_mut(id) else {
            tracing::warn!(conversation = id, "dropping chunk for unknown conversation");
            return;
        };
        match conversation.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content.push_str(text),
            _ => conversation.messages.push(Message::assistant(text)),
        }
    }

    fn set_generating(&self, id: &str, generating: bool) {
        if let Some(conversation) = self.conversations.write().get_mut(id) {
            conversation.generating = generating;
        }
    }

    fn set_error(&self, id: &str, error: Option<String>) {
        if let Some(conversation) = self.conversations.write().get_mut(id) {
            conversation.error = error;
        }
    }

    fn set_title(&self, id: &str, title: &str) {
        if let Some(conversation) = self.conversations.write().get_mut(id) {
            conversation.title = title.to_string();
        }
    }
}
