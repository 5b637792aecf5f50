//! Provider registry.
//!
//! Holds every configured LLM provider together with its health, picks the
//! candidates for a request, and walks them in order until one produces a
//! usable reply or the caller's deadline passes.

use crate::anthropic::AnthropicProvider;
use crate::canned::{self, CannedProvider};
use crate::health::{HealthPolicy, HealthState};
use crate::openai_compat::OpenAiCompatProvider;
use crate::preamble::system_preamble;
use crate::traits::{ChatMessage, ChatRequest, ChatResponse, ChatRole, LlmProvider};
use ava_domain::config::{LlmConfig, ProviderKind};
use ava_domain::error::{Error, ProviderFailureKind, Result};
use ava_domain::intent::IntentTag;
use ava_domain::provider::{HealthChange, ProviderDescriptor, ProviderHealth};
use ava_domain::trace::TraceEvent;
use ava_domain::turn::{Role, Turn};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Contexts estimated above this many tokens need a long-context provider.
const LONG_CONTEXT_TOKENS: usize = 8_192;
/// Upper bound on a single background probe.
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Trailing transcript, oldest first. Usually ends with the user turn
    /// carrying `user_text`.
    pub session_context: Vec<Turn>,
    pub user_text: String,
    pub intent_tag: IntentTag,
    pub max_output_tokens: u32,
    /// Absolute instant the whole call must finish by.
    pub deadline: Instant,
}

impl GenerateRequest {
    fn needs_long_context(&self) -> bool {
        needs_long_context(&self.session_context)
    }
}

/// Whether `context` is too large for a provider without long-context
/// support.
pub fn needs_long_context(context: &[Turn]) -> bool {
    let chars: usize = context.iter().map(|t| t.text.len()).sum();
    chars / 4 > LONG_CONTEXT_TOKENS
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub provider: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    /// Provider that answered; `None` for a synthesized fallback.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// True when every candidate failed and `text` is an apology.
    pub degraded: bool,
    pub attempts: Vec<Attempt>,
    /// Health transitions caused by this call, for the caller to publish.
    pub health_changes: Vec<HealthChange>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Registered {
    provider: Arc<dyn LlmProvider>,
    priority: i32,
}

pub struct ProviderRegistry {
    providers: Vec<Registered>,
    health: Mutex<HashMap<String, HealthState>>,
    policy: HealthPolicy,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Providers that fail to initialize (usually a missing API key) are
    /// logged and skipped. When nothing is left the offline canned provider
    /// is registered so the service can still answer.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: Vec<(Arc<dyn LlmProvider>, i32)> = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::Canned => Ok(Arc::new(CannedProvider::from_config(pc))),
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider = %pc.name,
                        kind = ?pc.kind,
                        priority = pc.priority,
                        "registered LLM provider"
                    );
                    providers.push((provider, pc.priority));
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %pc.name,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                }
            }
        }

        if providers.is_empty() {
            tracing::warn!("no LLM providers initialized; answering with canned replies");
            providers.push((Arc::new(CannedProvider::new(canned::DEFAULT_NAME)), i32::MAX));
        }

        Self::new(providers, HealthPolicy::new(&config.health))
    }

    /// Build a registry from already-constructed providers.
    pub fn new(providers: Vec<(Arc<dyn LlmProvider>, i32)>, policy: HealthPolicy) -> Self {
        let health = providers
            .iter()
            .map(|(p, _)| (p.provider_id().to_string(), HealthState::default()))
            .collect();
        Self {
            providers: providers
                .into_iter()
                .map(|(provider, priority)| Registered { provider, priority })
                .collect(),
            health: Mutex::new(health),
            policy,
        }
    }

    /// Snapshot of every provider, sorted by priority then name.
    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        let health = self.health.lock();
        let mut out: Vec<ProviderDescriptor> = self
            .providers
            .iter()
            .map(|r| {
                let id = r.provider.provider_id();
                let state = health.get(id).cloned().unwrap_or_default();
                ProviderDescriptor {
                    name: id.to_string(),
                    model: r.provider.model().to_string(),
                    capabilities: *r.provider.capabilities(),
                    priority: r.priority,
                    health: state.health,
                    consecutive_failures: state.consecutive_failures,
                    last_success: state.last_success,
                }
            })
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Whether any provider could take a request of this shape right now.
    pub fn has_eligible(&self, max_output_tokens: u32, long_context: bool) -> bool {
        !self.candidates(max_output_tokens, long_context).is_empty()
    }

    /// Eligible providers in the order they should be tried.
    fn candidates(&self, max_output_tokens: u32, long_context: bool) -> Vec<Arc<dyn LlmProvider>> {
        let health = self.health.lock();
        let mut eligible: Vec<(&Registered, Option<chrono::DateTime<Utc>>)> = self
            .providers
            .iter()
            .filter_map(|r| {
                let state = health.get(r.provider.provider_id())?;
                let ok = state.health.is_selectable()
                    && r.provider
                        .capabilities()
                        .satisfies(max_output_tokens, long_context);
                ok.then_some((r, state.last_success))
            })
            .collect();
        // Priority ascending, then freshest success first.
        eligible.sort_by(|(a, a_ok), (b, b_ok)| {
            a.priority.cmp(&b.priority).then_with(|| b_ok.cmp(a_ok))
        });
        eligible.into_iter().map(|(r, _)| r.provider.clone()).collect()
    }

    /// Update a provider's health after a call.
    ///
    /// Returns the transition, if any. Unknown provider names are ignored.
    pub fn record_outcome(
        &self,
        provider: &str,
        success: bool,
        latency_ms: u64,
        error_kind: Option<ProviderFailureKind>,
    ) -> Option<HealthChange> {
        let change = {
            let mut health = self.health.lock();
            let state = health.get_mut(provider)?;
            let previous = if success {
                state.record_success(Utc::now())
            } else {
                state.record_failure(&self.policy, std::time::Instant::now())
            };
            previous.map(|from| HealthChange {
                provider: provider.to_string(),
                from,
                to: state.health,
            })
        };

        tracing::debug!(
            provider,
            success,
            latency_ms,
            error_kind = ?error_kind,
            "provider outcome recorded"
        );
        if let Some(ref c) = change {
            tracing::warn!(provider, from = c.from.as_str(), to = c.to.as_str(), "provider health changed");
            TraceEvent::ProviderHealthChanged {
                provider: c.provider.clone(),
                from: c.from.as_str().into(),
                to: c.to.as_str().into(),
            }
            .emit();
        }
        change
    }

    /// Produce an assistant reply, failing over across providers.
    ///
    /// Never returns an error: when no candidate succeeds before the
    /// deadline, the response is a synthesized apology with `degraded` set.
    pub async fn generate(&self, req: &GenerateRequest) -> GenerateResponse {
        let chat = build_chat_request(req);
        let candidates = self.candidates(req.max_output_tokens, req.needs_long_context());

        let mut attempts = Vec::new();
        let mut health_changes = Vec::new();
        let mut last_error: Option<Error> = None;

        for (i, provider) in candidates.iter().enumerate() {
            let id = provider.provider_id().to_string();
            if Instant::now() >= req.deadline {
                last_error = Some(Error::Timeout("turn deadline passed".into()));
                break;
            }

            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout_at(req.deadline, provider.chat(&chat)).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let (result, deadline_hit) = match outcome {
                Ok(r) => (r.and_then(|resp| check_response(&id, resp)), false),
                Err(_) => (Err(Error::Timeout(format!("no reply from {id} before the turn deadline"))), true),
            };

            match result {
                Ok(resp) => {
                    health_changes.extend(self.record_outcome(&id, true, duration_ms, None));
                    attempts.push(Attempt {
                        provider: id.clone(),
                        success: true,
                        duration_ms,
                        error: None,
                    });
                    TraceEvent::ProviderAttempt {
                        provider: id.clone(),
                        model: resp.model.clone(),
                        intent: req.intent_tag.as_str().into(),
                        success: true,
                        duration_ms,
                        failure: None,
                    }
                    .emit();
                    return GenerateResponse {
                        text: resp.content,
                        provider: Some(id),
                        model: Some(resp.model),
                        degraded: false,
                        attempts,
                        health_changes,
                    };
                }
                Err(e) => {
                    let kind = match &e {
                        Error::Provider { kind, .. } => Some(*kind),
                        _ => None,
                    };
                    health_changes.extend(self.record_outcome(&id, false, duration_ms, kind));
                    attempts.push(Attempt {
                        provider: id.clone(),
                        success: false,
                        duration_ms,
                        error: Some(e.to_string()),
                    });
                    TraceEvent::ProviderAttempt {
                        provider: id.clone(),
                        model: provider.model().into(),
                        intent: req.intent_tag.as_str().into(),
                        success: false,
                        duration_ms,
                        failure: Some(e.to_string()),
                    }
                    .emit();

                    if deadline_hit {
                        tracing::warn!(provider = %id, "turn deadline passed during provider call");
                        last_error = Some(e);
                        break;
                    }
                    if let Some(next) = candidates.get(i + 1) {
                        TraceEvent::ProviderFallback {
                            from_provider: id.clone(),
                            to_provider: next.provider_id().into(),
                            reason: e.to_string(),
                        }
                        .emit();
                    }
                    last_error = Some(e);
                }
            }
        }

        let summary = match last_error {
            Some(e) => e.to_string(),
            None => "no eligible provider".to_string(),
        };
        tracing::error!(attempts = attempts.len(), error = %summary, "all providers failed");
        GenerateResponse {
            text: format!(
                "I'm sorry, I couldn't get an answer from any language model just now. \
                 Last error: {summary}"
            ),
            provider: None,
            model: None,
            degraded: true,
            attempts,
            health_changes,
        }
    }

    /// Probe every unavailable provider once; a success restores it.
    pub async fn probe_unavailable(&self) -> Vec<HealthChange> {
        let targets: Vec<Arc<dyn LlmProvider>> = {
            let health = self.health.lock();
            self.providers
                .iter()
                .filter(|r| {
                    health
                        .get(r.provider.provider_id())
                        .is_some_and(|s| s.health == ProviderHealth::Unavailable)
                })
                .map(|r| r.provider.clone())
                .collect()
        };

        let mut changes = Vec::new();
        for provider in targets {
            let id = provider.provider_id().to_string();
            let started = std::time::Instant::now();
            let ok = match tokio::time::timeout(PROBE_TIMEOUT, provider.probe()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::debug!(provider = %id, error = %e, "probe failed");
                    false
                }
                Err(_) => {
                    tracing::debug!(provider = %id, "probe timed out");
                    false
                }
            };
            let latency = started.elapsed().as_millis() as u64;
            changes.extend(self.record_outcome(&id, ok, latency, None));
        }
        changes
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembly and response checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_chat_request(req: &GenerateRequest) -> ChatRequest {
    let mut messages = vec![ChatMessage::new(ChatRole::System, system_preamble(req.intent_tag))];
    for turn in &req.session_context {
        let msg = match turn.role {
            Role::User => ChatMessage::new(ChatRole::User, turn.text.clone()),
            Role::Assistant => ChatMessage::new(ChatRole::Assistant, turn.text.clone()),
            Role::System => ChatMessage::new(ChatRole::System, turn.text.clone()),
            Role::CapabilityResult => {
                ChatMessage::new(ChatRole::System, format!("Capability result: {}", turn.text))
            }
        };
        messages.push(msg);
    }

    let ends_with_user_text = messages
        .iter()
        .rev()
        .find(|m| m.role != ChatRole::System)
        .is_some_and(|m| m.role == ChatRole::User && m.content == req.user_text);
    if !ends_with_user_text {
        messages.push(ChatMessage::new(ChatRole::User, req.user_text.clone()));
    }

    ChatRequest {
        messages,
        max_tokens: req.max_output_tokens,
        intent: req.intent_tag,
    }
}

/// Reject empty completions and refusals.
fn check_response(provider: &str, resp: ChatResponse) -> Result<ChatResponse> {
    if resp.content.trim().is_empty() {
        return Err(Error::provider(provider, ProviderFailureKind::Malformed, "empty completion"));
    }
    if matches!(resp.finish_reason.as_deref(), Some("content_filter" | "refusal")) {
        return Err(Error::provider(
            provider,
            ProviderFailureKind::Malformed,
            "response refused by provider",
        ));
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ava_domain::turn::NewTurn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted provider for failover tests.
    struct Scripted {
        id: String,
        reply: Option<String>,
        delay: Duration,
        calls: AtomicUsize,
        caps: ava_domain::provider::ProviderCapabilities,
    }

    impl Scripted {
        fn ok(id: &str, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                reply: Some(reply.into()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                caps: Default::default(),
            })
        }

        fn failing(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                reply: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                caps: Default::default(),
            })
        }

        fn slow(id: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                reply: Some("late".into()),
                delay,
                calls: AtomicUsize::new(0),
                caps: Default::default(),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for Scripted {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Some(text) => Ok(ChatResponse {
                    content: text.clone(),
                    model: format!("{}-model", self.id),
                    finish_reason: Some("stop".into()),
                }),
                None => Err(Error::provider(&self.id, ProviderFailureKind::Network, "connection refused")),
            }
        }
        fn capabilities(&self) -> &ava_domain::provider::ProviderCapabilities {
            &self.caps
        }
        fn provider_id(&self) -> &str {
            &self.id
        }
        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn request(deadline: Duration) -> GenerateRequest {
        GenerateRequest {
            session_context: vec![NewTurn::user("hello").into_turn(0, Utc::now())],
            user_text: "hello".into(),
            intent_tag: IntentTag::Conversation,
            max_output_tokens: 256,
            deadline: Instant::now() + deadline,
        }
    }

    fn registry(providers: Vec<(Arc<dyn LlmProvider>, i32)>) -> ProviderRegistry {
        ProviderRegistry::new(providers, HealthPolicy::default())
    }

    #[tokio::test]
    async fn fails_over_to_next_priority() {
        let p1 = Scripted::failing("p1");
        let p2 = Scripted::ok("p2", "from p2");
        let reg = registry(vec![(p2.clone(), 2), (p1.clone(), 1)]);

        let resp = reg.generate(&request(Duration::from_secs(5))).await;
        assert_eq!(resp.text, "from p2");
        assert_eq!(resp.provider.as_deref(), Some("p2"));
        assert!(!resp.degraded);
        assert_eq!(resp.attempts.len(), 2);
        assert_eq!(p1.calls.load(Ordering::SeqCst), 1);

        let listed = reg.list_providers();
        assert_eq!(listed[0].name, "p1");
        assert_eq!(listed[0].consecutive_failures, 1);
        assert!(listed[1].last_success.is_some());
    }

    #[tokio::test]
    async fn all_failing_yields_degraded_apology() {
        let reg = registry(vec![(Scripted::failing("a"), 1), (Scripted::failing("b"), 2)]);
        let resp = reg.generate(&request(Duration::from_secs(5))).await;
        assert!(resp.degraded);
        assert!(resp.provider.is_none());
        assert!(resp.text.contains("connection refused"));
    }

    #[tokio::test]
    async fn deadline_abandons_slow_provider() {
        let slow = Scripted::slow("slow", Duration::from_secs(5));
        let backup = Scripted::ok("backup", "never reached");
        let reg = registry(vec![(slow, 1), (backup.clone(), 2)]);

        let started = std::time::Instant::now();
        let resp = reg.generate(&request(Duration::from_millis(100))).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(resp.degraded);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reg.list_providers()[0].consecutive_failures, 1);
    }

    #[tokio::test]
    async fn empty_reply_counts_as_failure() {
        let blank = Scripted::ok("blank", "   ");
        let good = Scripted::ok("good", "hi");
        let reg = registry(vec![(blank, 1), (good, 2)]);
        let resp = reg.generate(&request(Duration::from_secs(5))).await;
        assert_eq!(resp.provider.as_deref(), Some("good"));
        assert!(resp.attempts[0].error.as_deref().unwrap_or("").contains("malformed"));
    }

    #[tokio::test]
    async fn failure_storm_degrades_then_disables() {
        let p = Scripted::failing("p");
        let reg = registry(vec![(p.clone(), 1)]);

        for _ in 0..3 {
            reg.record_outcome("p", false, 5, Some(ProviderFailureKind::Network));
        }
        assert_eq!(reg.list_providers()[0].health, ProviderHealth::Degraded);
        assert!(reg.has_eligible(256, false));

        let mut last = None;
        for _ in 0..5 {
            last = reg.record_outcome("p", false, 5, Some(ProviderFailureKind::RateLimit)).or(last);
        }
        assert_eq!(
            last,
            Some(HealthChange {
                provider: "p".into(),
                from: ProviderHealth::Degraded,
                to: ProviderHealth::Unavailable,
            })
        );
        assert!(!reg.has_eligible(256, false));

        // Unavailable providers are skipped entirely.
        let resp = reg.generate(&request(Duration::from_secs(1))).await;
        assert!(resp.degraded);
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_success_restores_health() {
        let p = Scripted::ok("p", "pong");
        let reg = registry(vec![(p, 1)]);
        for _ in 0..8 {
            reg.record_outcome("p", false, 1, None);
        }
        assert_eq!(reg.list_providers()[0].health, ProviderHealth::Unavailable);

        let changes = reg.probe_unavailable().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, ProviderHealth::Healthy);
        assert_eq!(reg.list_providers()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn ties_prefer_fresher_success() {
        let a = Scripted::ok("a", "from a");
        let b = Scripted::ok("b", "from b");
        let reg = registry(vec![(a, 1), (b, 1)]);
        reg.record_outcome("b", true, 1, None);

        let resp = reg.generate(&request(Duration::from_secs(5))).await;
        assert_eq!(resp.provider.as_deref(), Some("b"));
    }

    #[test]
    fn capability_filter_excludes_small_providers() {
        let reg = registry(vec![(Scripted::ok("small", "x"), 1)]);
        assert!(reg.has_eligible(1024, false));
        assert!(!reg.has_eligible(4096, false));
    }

    #[test]
    fn long_context_needs_a_capable_provider() {
        let reg = registry(vec![(Scripted::ok("short", "x"), 1)]);
        assert!(reg.has_eligible(256, false));
        assert!(!reg.has_eligible(256, true));

        let small = vec![NewTurn::user("hello").into_turn(0, Utc::now())];
        let large = vec![NewTurn::user("x".repeat(LONG_CONTEXT_TOKENS * 4 + 8)).into_turn(0, Utc::now())];
        assert!(!needs_long_context(&small));
        assert!(needs_long_context(&large));
    }

    #[test]
    fn chat_request_does_not_duplicate_trailing_user_turn() {
        let req = request(Duration::from_secs(1));
        let chat = build_chat_request(&req);
        let users = chat.messages.iter().filter(|m| m.role == ChatRole::User).count();
        assert_eq!(users, 1);
        assert_eq!(chat.messages[0].role, ChatRole::System);
    }

    #[test]
    fn empty_config_falls_back_to_canned() {
        let reg = ProviderRegistry::from_config(&LlmConfig::default());
        let listed = reg.list_providers();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "canned");
    }
}
