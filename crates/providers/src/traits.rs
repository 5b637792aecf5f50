use ava_domain::error::Result;
use ava_domain::intent::IntentTag;
use ava_domain::provider::ProviderCapabilities;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation in order; system messages may appear anywhere and are
    /// hoisted by adapters whose API needs that.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// Intent the preamble was selected for. Offline providers key their
    /// reply on it.
    pub intent: IntentTag,
}

impl ChatRequest {
    /// The most recent user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// The model that actually produced the response.
    pub model: String,
    /// Why the model stopped (e.g. "stop", "length", "content_filter").
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Adapters translate between the internal request shape and one backend's
/// wire format. Failures must be reported as `Error::Provider` with the
/// right subtype so the registry's failover loop can consume them.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Cheap liveness check used by the background probe.
    async fn probe(&self) -> Result<()> {
        let req = ChatRequest {
            messages: vec![ChatMessage::new(ChatRole::User, "ping")],
            max_tokens: 1,
            intent: IntentTag::Conversation,
        };
        self.chat(&req).await.map(|_| ())
    }

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;
}
