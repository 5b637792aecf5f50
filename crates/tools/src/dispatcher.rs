//! Capability dispatcher: validation, permission checks, bounded execution.
//!
//! Every execution produces a [`CapabilityResult`]; failures are carried in
//! the result, never swallowed. Publishing and transcript recording are the
//! caller's job.

use std::sync::Arc;
use std::time::Duration;

use ava_domain::capability::{CapabilityKind, CapabilityRequest, CapabilityResult};
use ava_domain::config::ToolsConfig;
use ava_domain::error::{Error, Result};
use ava_domain::session::PermissionSet;
use ava_domain::trace::TraceEvent;
use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;

use crate::code_exec::CodeRunner;
use crate::device::DeviceBackend;
use crate::http_fetch::{self, HttpFetcher};
use crate::network_probe::NetworkProber;
use crate::text_extract;

pub struct Dispatcher {
    max_timeout_ms: u64,
    output_cap: usize,
    http: HttpFetcher,
    code: CodeRunner,
    probe: NetworkProber,
    device: Arc<dyn DeviceBackend>,
}

impl Dispatcher {
    pub fn new(cfg: &ToolsConfig, device: Arc<dyn DeviceBackend>) -> Result<Self> {
        Ok(Self {
            max_timeout_ms: cfg.max_timeout_ms,
            output_cap: cfg.output_cap_bytes,
            http: HttpFetcher::new(cfg.http_user_agent.clone(), cfg.output_cap_bytes)?,
            code: CodeRunner::new(cfg.code_exec_languages.clone(), cfg.output_cap_bytes),
            probe: NetworkProber::new(cfg.probe.clone()),
            device,
        })
    }

    pub fn device(&self) -> &Arc<dyn DeviceBackend> {
        &self.device
    }

    /// Reject `kind` unless the session's permission set allows it.
    pub fn check_permission(permissions: &PermissionSet, kind: CapabilityKind) -> Result<()> {
        if permissions.allows(kind) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "session is not allowed to run {kind}"
            )))
        }
    }

    /// Static checks that need no I/O: permission, timeout bounds, fetch
    /// URL and headers, and whether the interpreter is enabled.
    pub fn preflight(&self, permissions: &PermissionSet, req: &CapabilityRequest) -> Result<()> {
        Self::check_permission(permissions, req.kind())?;
        if let Some(timeout_ms) = req.timeout_ms() {
            if timeout_ms == 0 || timeout_ms > self.max_timeout_ms {
                return Err(Error::InvalidArgument(format!(
                    "timeout_ms must be between 1 and {}",
                    self.max_timeout_ms
                )));
            }
        }
        match req {
            CapabilityRequest::HttpFetch(args) => http_fetch::validate(args),
            CapabilityRequest::CodeExec(args) if !self.code.is_allowed(args.language) => {
                Err(Error::PermissionDenied(format!(
                    "interpreter '{}' is not enabled on this host",
                    args.language.as_str()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Run `req` to completion and fold the outcome into a result record.
    ///
    /// `deadline` is the owning turn's deadline; the effective timeout is
    /// the smaller of it and the request's own `timeout_ms`.
    pub async fn execute(
        &self,
        session_id: &str,
        req: &CapabilityRequest,
        deadline: Option<Instant>,
    ) -> CapabilityResult {
        let kind = req.kind();
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        let outcome = self.run(session_id, req, deadline).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Err(ref e) = outcome {
            tracing::info!(session_id, kind = kind.as_str(), error = %e, "capability failed");
        }
        TraceEvent::CapabilityExecuted {
            session_id: session_id.to_string(),
            kind: kind.as_str().into(),
            success: outcome.is_ok(),
            duration_ms,
        }
        .emit();

        CapabilityResult::from_outcome(kind, started_at, duration_ms, &outcome)
    }

    async fn run(
        &self,
        session_id: &str,
        req: &CapabilityRequest,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        let requested = Duration::from_millis(req.timeout_ms().unwrap_or(self.max_timeout_ms));
        let timeout = match deadline {
            Some(d) => requested.min(d.saturating_duration_since(Instant::now())),
            None => requested,
        };
        if timeout.is_zero() {
            return Err(Error::Timeout("turn deadline already passed".into()));
        }

        match req {
            CapabilityRequest::HttpFetch(args) => self.http.fetch(session_id, args, timeout).await,
            CapabilityRequest::CodeExec(args) => self.code.run(args, timeout).await,
            CapabilityRequest::NetworkProbe(args) => {
                bounded(timeout, "network_probe", self.probe.probe(args)).await
            }
            CapabilityRequest::DeviceCommand(args) => {
                bounded(timeout, "device_command", self.device.execute(args)).await
            }
            CapabilityRequest::TextExtract(args) => {
                Ok(text_extract::extract(&args.from_payload, self.output_cap))
            }
        }
    }
}

async fn bounded<F>(timeout: Duration, what: &str, fut: F) -> Result<Value>
where
    F: std::future::Future<Output = Result<Value>>,
{
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        Err(Error::Timeout(format!(
            "{what} did not finish within {} ms",
            timeout.as_millis()
        )))
    })
}
