//! `http_fetch`: one HTTP request with strict limits.
//!
//! - http/https URLs only
//! - body read up to the output cap, the rest is discarded
//! - redirect limit (5 hops)
//! - one request in flight per session

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ava_domain::capability::{HttpFetchArgs, HttpMethod};
use ava_domain::error::{Error, Result};
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::{json, Value};

use crate::output::CappedBuffer;

const BUSY_BACKOFF: Duration = Duration::from_millis(100);

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    body_cap: usize,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases a session's in-flight slot on drop.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.session_id);
    }
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>, body_cap: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("build HTTP client: {e}")))?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
            body_cap,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn try_acquire(&self, session_id: &str) -> Option<InFlight> {
        let mut set = self.in_flight.lock();
        if !set.insert(session_id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: self.in_flight.clone(),
            session_id: session_id.to_string(),
        })
    }

    /// Take the session's slot, waiting once before giving up.
    async fn acquire(&self, session_id: &str) -> Result<InFlight> {
        if let Some(guard) = self.try_acquire(session_id) {
            return Ok(guard);
        }
        tokio::time::sleep(BUSY_BACKOFF).await;
        self.try_acquire(session_id).ok_or_else(|| {
            Error::ResourceExhausted(format!(
                "an http_fetch is already in flight for session {session_id}"
            ))
        })
    }

    pub async fn fetch(&self, session_id: &str, args: &HttpFetchArgs, timeout: Duration) -> Result<Value> {
        let url = parse_url(&args.url)?;
        let headers = build_headers(&args.headers)?;
        let _slot = self.acquire(session_id).await?;

        let method = match args.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut req = self
            .client
            .request(method, url)
            .timeout(timeout)
            .header(USER_AGENT, &self.user_agent)
            .headers(headers);
        if let Some(ref body) = args.body {
            req = req.body(body.clone());
        }

        tracing::debug!(session_id, url = %args.url, method = args.method.as_str(), "http_fetch");

        let fetch = async {
            let resp = req.send().await.map_err(classify)?;
            let status = resp.status().as_u16();
            let final_url = resp.url().to_string();
            let response_headers: BTreeMap<String, String> = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
                .collect();

            let mut body = CappedBuffer::new(self.body_cap);
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                body.push(&chunk.map_err(classify)?);
                if body.truncated() {
                    break;
                }
            }
            let truncated = body.truncated();

            Ok::<Value, Error>(json!({
                "status": status,
                "response_headers": response_headers,
                "body_text": body.into_text(),
                "final_url": final_url,
                "truncated": truncated,
            }))
        };

        // reqwest's own timeout covers the request; this also bounds body streaming.
        match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(timeout)),
        }
    }
}

/// Argument checks that need no I/O: URL scheme and header syntax.
pub fn validate(args: &HttpFetchArgs) -> Result<()> {
    parse_url(&args.url)?;
    build_headers(&args.headers)?;
    Ok(())
}

fn parse_url(raw: &str) -> Result<url::Url> {
    let url = url::Url::parse(raw).map_err(|e| Error::InvalidArgument(format!("url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidArgument(format!(
            "url scheme '{other}' is not allowed; use http or https"
        ))),
    }
}

fn build_headers(raw: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (k, v) in raw {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| Error::InvalidArgument(format!("invalid header name '{k}'")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|_| Error::InvalidArgument(format!("invalid value for header '{k}'")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn timeout_error(timeout: Duration) -> Error {
    Error::Timeout(format!("http_fetch did not finish within {} ms", timeout.as_millis()))
}

fn classify(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("http_fetch: {e}"))
    } else {
        Error::ExternalFailure(format!("http_fetch: {e}"))
    }
}
