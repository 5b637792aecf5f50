//! Offline provider that answers with a stock reply per intent.
//!
//! Needs no network or credentials, so a fresh install can boot and hold a
//! conversation before any model backend is configured.

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use ava_domain::config::ProviderConfig;
use ava_domain::error::Result;
use ava_domain::intent::IntentTag;
use ava_domain::provider::ProviderCapabilities;

pub const DEFAULT_NAME: &str = "canned";
const MODEL: &str = "canned-v1";

pub struct CannedProvider {
    id: String,
    capabilities: ProviderCapabilities,
}

impl CannedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: ProviderCapabilities {
                supports_chat: true,
                supports_long_context: true,
                max_output_tokens: u32::MAX,
            },
        }
    }

    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let mut provider = Self::new(cfg.name.clone());
        // Advertised limits from config are ignored; a stock reply fits any budget.
        provider.capabilities.supports_chat = cfg.capabilities.supports_chat;
        provider
    }
}

/// Stock reply for `intent`, quoting the user's words where it reads naturally.
pub fn stock_reply(intent: IntentTag, user_text: &str) -> String {
    let quoted = user_text.trim();
    match intent {
        IntentTag::DeviceControl => "I can help you control your device. For full \
            functionality, please ensure proper API access is configured."
            .into(),
        IntentTag::Advice | IntentTag::BusinessAnalysis => format!(
            "For advice on '{quoted}', I recommend researching best practices and \
             consulting with experts in that area."
        ),
        IntentTag::Information => format!(
            "I'd be happy to help explain '{quoted}'. For detailed information, \
             please ensure full AI capabilities are enabled."
        ),
        IntentTag::TaskAssist => "I'm here to help guide you through tasks. Let me know \
            what specific assistance you need."
            .into(),
        IntentTag::Conversation => "I'm here to chat! What's on your mind today?".into(),
        IntentTag::CodeHelp => "I'm listening and ready to help with whatever you need.".into(),
    }
}

#[async_trait::async_trait]
impl LlmProvider for CannedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let user_text = req.last_user_text().unwrap_or_default();
        Ok(ChatResponse {
            content: stock_reply(req.intent, user_text),
            model: MODEL.into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        MODEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChatMessage, ChatRole};

    #[tokio::test]
    async fn replies_by_intent_and_quotes_the_question() {
        let p = CannedProvider::new("canned");
        let req = ChatRequest {
            messages: vec![
                ChatMessage::new(ChatRole::System, "sys"),
                ChatMessage::new(ChatRole::User, "what is rust "),
            ],
            max_tokens: 64,
            intent: IntentTag::Information,
        };
        let resp = p.chat(&req).await.unwrap();
        assert!(resp.content.contains("'what is rust'"));
        assert_eq!(resp.model, "canned-v1");
    }

    #[test]
    fn greeting_reply_is_not_empty() {
        assert!(!stock_reply(IntentTag::Conversation, "hello").is_empty());
    }
}
