//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API, where system messages go in a
//! separate top-level `system` field.

use crate::traits::{ChatRequest, ChatResponse, ChatRole, LlmProvider};
use crate::util::{from_reqwest, malformed, resolve_api_key, status_error};
use ava_domain::config::ProviderConfig;
use ava_domain::error::{Error, Result};
use ava_domain::provider::ProviderCapabilities;
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?.ok_or_else(|| {
            Error::Config(format!("provider '{}': anthropic requires auth.env", cfg.name))
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest(&cfg.name))?;
        let model = if cfg.model.is_empty() {
            "claude-3-5-haiku-latest".to_string()
        } else {
            cfg.model.clone()
        };

        Ok(Self {
            id: cfg.name.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            capabilities: cfg.capabilities,
            client,
        })
    }

    fn build_messages_body(&self, req: &ChatRequest) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                ChatRole::System => system_parts.push(&msg.content),
                ChatRole::User | ChatRole::Assistant => {
                    api_messages.push(serde_json::json!({
                        "role": msg.role.as_str(),
                        "content": [{"type": "text", "text": msg.content}],
                    }));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": api_messages,
            "max_tokens": req.max_tokens,
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        body
    }
}

fn parse_messages_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| malformed(provider, "no content blocks in response"))?;

    let content: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    Ok(ChatResponse {
        content,
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req);

        tracing::debug!(provider = %self.id, url = %url, "anthropic messages request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest(&self.id))?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest(&self.id))?;
        if !status.is_success() {
            return Err(status_error(&self.id, status, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)
            .map_err(|e| malformed(&self.id, format!("undecodable body: {e}")))?;
        parse_messages_response(&self.id, &resp_json)
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_text_blocks_and_reads_stop_reason() {
        let body = json!({
            "model": "claude-3-5-haiku-latest",
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "text", "text": "there."}
            ],
            "stop_reason": "end_turn"
        });
        let resp = parse_messages_response("a", &body).unwrap();
        assert_eq!(resp.content, "Hello, there.");
        assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn missing_content_is_malformed() {
        assert!(parse_messages_response("a", &json!({"type": "error"})).is_err());
    }
}
