//! End-to-end scenarios driven through the axum router.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use ava_domain::config::Config;
use ava_domain::error::{Error, ProviderFailureKind, Result};
use ava_domain::provider::ProviderCapabilities;
use ava_domain::session::PermissionSet;
use ava_domain::turn::NewTurn;
use ava_gateway::runtime::{recovery, sweeper};
use ava_gateway::state::AppState;
use ava_gateway::{api, bootstrap};
use ava_providers::{ChatRequest, ChatResponse, HealthPolicy, LlmProvider, ProviderRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Scripted {
    id: String,
    fail: bool,
    delay: Duration,
    caps: ProviderCapabilities,
}

impl Scripted {
    fn ok(id: &str) -> Arc<dyn LlmProvider> {
        Arc::new(Self::new(id, false, Duration::ZERO))
    }

    fn failing(id: &str) -> Arc<dyn LlmProvider> {
        Arc::new(Self::new(id, true, Duration::ZERO))
    }

    fn slow(id: &str, delay: Duration) -> Arc<dyn LlmProvider> {
        Arc::new(Self::new(id, false, delay))
    }

    fn short_context(id: &str) -> Arc<dyn LlmProvider> {
        let mut provider = Self::new(id, false, Duration::ZERO);
        provider.caps.supports_long_context = false;
        Arc::new(provider)
    }

    fn new(id: &str, fail: bool, delay: Duration) -> Self {
        Self {
            id: id.into(),
            fail,
            delay,
            caps: ProviderCapabilities {
                supports_chat: true,
                supports_long_context: true,
                max_output_tokens: 100_000,
            },
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for Scripted {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::provider(&self.id, ProviderFailureKind::Network, "forced failure"));
        }
        Ok(ChatResponse {
            content: format!("{} heard: {}", self.id, req.last_user_text().unwrap_or("")),
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.caps
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_path_buf();
    config
}

fn build(config: Config, providers: Vec<(Arc<dyn LlmProvider>, i32)>) -> AppState {
    let llm = ProviderRegistry::new(providers, HealthPolicy::default());
    bootstrap::assemble(Arc::new(config), llm, Arc::new(tokio::sync::Notify::new())).unwrap()
}

fn state(dir: &TempDir) -> AppState {
    build(config(dir.path()), vec![(Scripted::ok("p1"), 1)])
}

fn app(state: &AppState) -> Router {
    api::router().with_state(state.clone())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call_with(app, method, uri, body, None).await
}

async fn call_with(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn open(app: &Router, id: &str) {
    let (status, body) = call(app, "POST", "/api/session", Some(json!({ "session_id": id }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

async fn transcript(app: &Router, id: &str) -> Vec<Value> {
    let (status, body) = call(app, "GET", &format!("/api/transcript?session_id={id}"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["turns"].as_array().cloned().unwrap_or_default()
}

async fn spawn_http_fixture() -> SocketAddr {
    let fixture = Router::new().route("/hello", get(|| async { "hello from fixture" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, fixture).await.unwrap();
    });
    addr
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn basic_turn_records_user_and_assistant() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);

    let (status, body) = call(&app, "POST", "/api/session", Some(json!({ "session_id": "S1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "S1");

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let reply = body["reply"].as_str().unwrap().to_string();
    assert!(!reply.is_empty());
    assert_eq!(body["turn_index"], 1);

    let turns = transcript(&app, "S1").await;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["text"], "hello");
    assert_eq!(turns[1]["role"], "assistant");
    assert_eq!(turns[1]["text"], reply);
}

#[tokio::test]
async fn chat_without_session_mints_one() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);

    let (status, body) = call(&app, "POST", "/api/chat", Some(json!({ "message": "hi there" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let id = body["session_id"].as_str().unwrap();
    assert_eq!(transcript(&app, id).await.len(), 2);

    let (status, body) = call(&app, "POST", "/api/chat", Some(json!({ "message": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidArgument");
}

#[tokio::test]
async fn non_queuable_turn_is_rejected_while_busy() {
    let dir = TempDir::new().unwrap();
    let state = build(
        config(dir.path()),
        vec![(Scripted::slow("p1", Duration::from_millis(400)), 1)],
    );
    let app = app(&state);
    open(&app, "S1").await;

    let first = {
        let app = app.clone();
        tokio::spawn(async move {
            call(&app, "POST", "/api/chat", Some(json!({ "session_id": "S1", "message": "one" }))).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "two", "non_queuable": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "ConcurrentTurn");

    let (status, _) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transcript(&app, "S1").await.len(), 2);
}

#[tokio::test]
async fn queued_turns_append_in_acceptance_order() {
    let dir = TempDir::new().unwrap();
    let state = build(
        config(dir.path()),
        vec![(Scripted::slow("p1", Duration::from_millis(200)), 1)],
    );
    let app = app(&state);
    open(&app, "S1").await;

    let mut handles = Vec::new();
    for message in ["first", "second"] {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            call(&app, "POST", "/api/chat", Some(json!({ "session_id": "S1", "message": message }))).await
        }));
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().0, StatusCode::OK);
    }

    let turns = transcript(&app, "S1").await;
    let texts: Vec<&str> = turns.iter().map(|t| t["text"].as_str().unwrap()).collect();
    assert_eq!(texts.len(), 4);
    assert_eq!(texts[0], "first");
    assert_eq!(texts[2], "second");
    for (i, turn) in turns.iter().enumerate() {
        assert_eq!(turn["turn_index"], i as u64);
    }
}

#[tokio::test]
async fn failover_answers_from_next_provider() {
    let dir = TempDir::new().unwrap();
    let state = build(
        config(dir.path()),
        vec![(Scripted::failing("P1"), 1), (Scripted::ok("P2"), 2)],
    );
    let app = app(&state);
    open(&app, "S1").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["provider"], "P2");
    assert!(body["reply"].as_str().unwrap().starts_with("P2 heard"));
    assert_eq!(body["degraded"], false);

    let (_, body) = call(&app, "GET", "/api/providers", None).await;
    let providers = body["providers"].as_array().unwrap();
    let p1 = providers.iter().find(|p| p["name"] == "P1").unwrap();
    assert!(p1["consecutive_failures"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn every_provider_failing_yields_degraded_reply() {
    let dir = TempDir::new().unwrap();
    let state = build(config(dir.path()), vec![(Scripted::failing("P1"), 1)]);
    let app = app(&state);

    let (status, body) = call(&app, "POST", "/api/chat", Some(json!({ "message": "hello" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["degraded"], true);
    assert!(!body["reply"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn http_fetch_capability_is_recorded() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;
    let widened = PermissionSet {
        allow_external_http: true,
        ..PermissionSet::default()
    };
    state.sessions.set_permissions("S1", widened).await.unwrap();

    let addr = spawn_http_fixture().await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/capability",
        Some(json!({
            "session_id": "S1",
            "kind": "http_fetch",
            "arguments": { "url": format!("http://{addr}/hello"), "method": "GET", "timeout_ms": 5000 },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["result"]["success"], true);
    assert_eq!(body["result"]["payload"]["status"], 200);
    assert!(body["result"]["payload"]["body_text"]
        .as_str()
        .unwrap()
        .contains("hello"));

    let turns = transcript(&app, "S1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["role"], "capability_result");
}

#[tokio::test]
async fn code_exec_without_permission_is_denied_and_not_recorded() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/capability",
        Some(json!({
            "session_id": "S1",
            "kind": "code_exec",
            "arguments": { "language": "python", "source": "print(1)", "timeout_ms": 1000 },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "PermissionDenied");
    assert!(transcript(&app, "S1").await.is_empty());
}

#[tokio::test]
async fn everyday_chat_is_answered_on_a_default_session() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;

    let sentences = [
        "How do I start a business?",
        "I want to start learning Spanish",
        "open up to me about your day",
        "search for meaning in life with me",
    ];
    for message in sentences {
        let (status, body) = call(
            &app,
            "POST",
            "/api/chat",
            Some(json!({ "session_id": "S1", "message": message })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{message}: {body}");
        assert!(body.get("capability").is_none(), "{message}: {body}");
    }

    let turns = transcript(&app, "S1").await;
    assert_eq!(turns.len(), sentences.len() * 2);
    assert!(turns.iter().all(|t| t["role"] != "capability_result"));
}

#[cfg(unix)]
#[tokio::test]
async fn chat_implied_code_run_is_recorded_before_the_reply() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;
    let widened = PermissionSet {
        allow_code_execution: true,
        ..PermissionSet::default()
    };
    state.sessions.set_permissions("S1", widened).await.unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "run this\n```bash\necho hi\n```" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["capability"]["success"], true);
    assert!(body["capability"]["payload"]["stdout"]
        .as_str()
        .unwrap()
        .contains("hi"));

    let turns = transcript(&app, "S1").await;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[1]["role"], "capability_result");
    assert_eq!(turns[1]["ref_turn_index"], 0);
    assert_eq!(turns[2]["role"], "assistant");
    assert_eq!(turns[2]["ref_turn_index"], 0);
}

#[cfg(unix)]
#[tokio::test]
async fn chat_implied_code_run_failure_is_recorded_as_unsuccessful() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.sessions.turn_budget_ms = 1500;
    let state = build(config, vec![(Scripted::ok("p1"), 1)]);
    let app = app(&state);
    open(&app, "S1").await;
    let widened = PermissionSet {
        allow_code_execution: true,
        ..PermissionSet::default()
    };
    state.sessions.set_permissions("S1", widened).await.unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "run this\n```bash\nsleep 20\n```" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["capability"]["success"], false);
    assert_eq!(body["capability"]["error"]["kind"], "Timeout");
    assert!(!body["reply"].as_str().unwrap().is_empty());

    let turns = transcript(&app, "S1").await;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[1]["role"], "capability_result");
    assert_eq!(turns[2]["role"], "assistant");
}

#[tokio::test]
async fn unavailable_providers_refuse_the_turn_without_recording_it() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;
    for _ in 0..8 {
        state
            .llm
            .record_outcome("p1", false, 5, Some(ProviderFailureKind::Network));
    }

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    assert_eq!(body["error"]["kind"], "ProviderExhausted");
    assert!(transcript(&app, "S1").await.is_empty());
}

#[tokio::test]
async fn oversized_context_needs_a_long_context_provider() {
    let dir = TempDir::new().unwrap();
    let state = build(config(dir.path()), vec![(Scripted::short_context("p1"), 1)]);
    let app = app(&state);
    open(&app, "S1").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "word ".repeat(8_000) })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    assert_eq!(body["error"]["kind"], "ProviderExhausted");
    assert!(transcript(&app, "S1").await.is_empty());

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn non_http_fetch_url_is_rejected_before_recording() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;
    let widened = PermissionSet {
        allow_external_http: true,
        ..PermissionSet::default()
    };
    state.sessions.set_permissions("S1", widened).await.unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/capability",
        Some(json!({
            "session_id": "S1",
            "kind": "http_fetch",
            "arguments": { "url": "ftp://example.com/file", "method": "GET", "timeout_ms": 1000 },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["kind"], "InvalidArgument");
    assert!(transcript(&app, "S1").await.is_empty());
}

#[tokio::test]
async fn restart_preserves_turns_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let before = {
        let state = state(&dir);
        let app = app(&state);
        open(&app, "S1").await;
        let (status, _) = call(
            &app,
            "POST",
            "/api/chat",
            Some(json!({ "session_id": "S1", "message": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(
            &app,
            "POST",
            "/api/capability",
            Some(json!({
                "session_id": "S1",
                "kind": "text_extract",
                "arguments": { "from_payload": "<p>kept</p>" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        transcript(&app, "S1").await
    };
    assert_eq!(before.len(), 3);

    let state = state(&dir);
    recovery::recover(&state).await;
    let after = transcript(&app(&state), "S1").await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn recovery_answers_a_dangling_user_turn() {
    let dir = TempDir::new().unwrap();
    {
        let state = state(&dir);
        state.sessions.open_session("S1", "").await.unwrap();
        state
            .sessions
            .append_turn("S1", NewTurn::user("are you there?"))
            .await
            .unwrap();
    }

    let state = state(&dir);
    assert_eq!(recovery::recover(&state).await, 1);
    let turns = transcript(&app(&state), "S1").await;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["role"], "assistant");
    assert_eq!(turns[1]["ref_turn_index"], 0);
}

#[tokio::test]
async fn store_outage_holds_the_turn_until_the_next_one() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;

    // Both the attempt and its retry fail.
    state.sessions.inject_failures(2);
    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "remember me" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "StoreUnavailable");
    assert_eq!(state.pending.len(), 1);

    let (status, _) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "and this" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.pending.is_empty());

    let turns = transcript(&app, "S1").await;
    let users: Vec<&str> = turns
        .iter()
        .filter(|t| t["role"] == "user")
        .map(|t| t["text"].as_str().unwrap())
        .collect();
    assert_eq!(users, vec!["remember me", "and this"]);
    assert_eq!(turns.len(), 4);
}

#[tokio::test]
async fn idle_sweep_closes_session_until_reopened() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(dir.path());
    cfg.sessions.idle_timeout_minutes = 0;
    let state = build(cfg, vec![(Scripted::ok("p1"), 1)]);
    let app = app(&state);
    open(&app, "S1").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = sweeper::sweep_once(&state).await.unwrap();
    assert_eq!(report.expired, vec!["S1".to_string()]);

    let turns = transcript(&app, "S1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["role"], "system");

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello?" })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["kind"], "SessionExpired");

    let (status, body) = call(&app, "POST", "/api/session/S1/reopen", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
}

#[tokio::test]
async fn explicit_expire_and_missing_session() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;

    let (status, body) = call(&app, "POST", "/api/session/S1/expire", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    let (_, body) = call(&app, "GET", "/api/session/S1", None).await;
    assert_eq!(body["active"], false);

    let (status, body) = call(&app, "POST", "/api/session/nope/expire", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "SessionMissing");

    let (status, _) = call(&app, "GET", "/api/transcript?session_id=nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preferences_are_last_write_wins() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;

    for value in ["en", "fr"] {
        let (status, _) = call(
            &app,
            "PUT",
            "/api/session/S1/preferences",
            Some(json!({ "key": "language", "value": value })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, body) = call(&app, "GET", "/api/session/S1/preferences", None).await;
    assert_eq!(body["preferences"]["language"], "fr");
}

#[tokio::test]
async fn operator_endpoints_need_the_token() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(dir.path());
    cfg.server.operator_token_env = "AVA_TEST_OPERATOR_TOKEN_SCENARIOS".into();
    std::env::set_var("AVA_TEST_OPERATOR_TOKEN_SCENARIOS", "s3cret");
    let state = build(cfg, vec![(Scripted::ok("p1"), 1)]);
    let app = app(&state);
    open(&app, "S1").await;

    let patch = json!({ "allow_code_execution": true });
    let (status, body) =
        call_with(&app, "POST", "/api/session/S1/permissions", Some(patch.clone()), Some("wrong")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "PermissionDenied");

    let (status, body) =
        call_with(&app, "POST", "/api/session/S1/permissions", Some(patch), Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["permissions"]["allow_code_execution"], true);
    assert_eq!(body["permissions"]["allow_chat"], true);

    // A degraded session refuses turns until restored.
    state.sessions.set_degraded("S1", true).await.unwrap();
    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["kind"], "InvariantViolated");

    let (status, _) = call_with(&app, "POST", "/api/session/S1/restore", None, Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_and_catalog_are_served() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);

    let (status, body) = call(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions_active"], 0);

    let (status, body) = call(&app, "GET", "/api/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capabilities"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn websocket_subscriber_sees_session_events() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let dir = TempDir::new().unwrap();
    let state = state(&dir);
    let app = app(&state);
    open(&app, "S1").await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, server).await.unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/events"))
        .await
        .unwrap();
    ws.send(Message::Text(json!({ "type": "subscribe", "session_id": "S1" }).to_string()))
        .await
        .unwrap();
    ws.send(Message::Text(json!({ "type": "ping" }).to_string()))
        .await
        .unwrap();

    let next_json = |msg: Message| -> Option<Value> {
        match msg {
            Message::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    };

    // Frames are handled in order, so the filter is set once pong arrives.
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if next_json(msg).is_some_and(|v| v["event"] == "pong") {
            break;
        }
    }

    let (status, _) = call(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "S1", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Some(event) = next_json(msg) {
            if event["event"] == "turn_appended" {
                assert_eq!(event["session_id"], "S1");
                seen.push(event["payload"]["role"].as_str().unwrap().to_string());
            }
        }
    }
    assert_eq!(seen, vec!["user", "assistant"]);
}
