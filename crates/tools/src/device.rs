//! `device_command`: pluggable device backends.
//!
//! The built-in `local` backend answers `system_info` and records, without
//! performing, the commands that would touch the desktop (launching apps,
//! opening URLs, writing files). A platform integration implements
//! [`DeviceBackend`] and is injected at bootstrap.

use std::collections::VecDeque;

use ava_domain::capability::DeviceCommandArgs;
use ava_domain::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

/// Executes a device command and returns `{status, details}`.
#[async_trait::async_trait]
pub trait DeviceBackend: Send + Sync {
    async fn execute(&self, args: &DeviceCommandArgs) -> Result<Value>;

    /// Commands this backend understands, for catalog listings.
    fn commands(&self) -> &'static [&'static str];
}

pub const LOCAL_DEVICE_ID: &str = "local";

const COMMANDS: &[&str] = &[
    "system_info",
    "open_application",
    "open_website",
    "search_web",
    "create_file",
    "file_operation",
    "send_notification",
];

const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct RecordedCommand {
    pub command: String,
    pub parameters: serde_json::Map<String, Value>,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
pub struct LocalDevice {
    history: Mutex<VecDeque<RecordedCommand>>,
}

impl LocalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent recorded commands, oldest first.
    pub fn recent(&self) -> Vec<RecordedCommand> {
        self.history.lock().iter().cloned().collect()
    }

    fn record(&self, args: &DeviceCommandArgs) -> RecordedCommand {
        let entry = RecordedCommand {
            command: args.command.clone(),
            parameters: args.parameters.clone(),
            at: Utc::now(),
        };
        let mut history = self.history.lock();
        if history.len() == HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(entry.clone());
        entry
    }
}

fn required<'a>(args: &'a DeviceCommandArgs, key: &str) -> Result<&'a str> {
    args.parameters
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            Error::InvalidArgument(format!("{} requires parameter '{key}'", args.command))
        })
}

#[async_trait::async_trait]
impl DeviceBackend for LocalDevice {
    async fn execute(&self, args: &DeviceCommandArgs) -> Result<Value> {
        if args.device_id != LOCAL_DEVICE_ID {
            return Err(Error::InvalidArgument(format!(
                "unknown device '{}'",
                args.device_id
            )));
        }

        match args.command.as_str() {
            "system_info" => Ok(json!({
                "status": "ok",
                "details": {
                    "os": std::env::consts::OS,
                    "family": std::env::consts::FAMILY,
                    "arch": std::env::consts::ARCH,
                    "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
                    "time": Utc::now().to_rfc3339(),
                },
            })),
            "open_application" => {
                required(args, "app_name")?;
                Ok(recorded(self.record(args)))
            }
            "open_website" => {
                let raw = required(args, "url")?;
                let url = url::Url::parse(raw)
                    .map_err(|e| Error::InvalidArgument(format!("url '{raw}': {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::InvalidArgument("open_website needs an http(s) url".into()));
                }
                Ok(recorded(self.record(args)))
            }
            "search_web" => {
                required(args, "query")?;
                Ok(recorded(self.record(args)))
            }
            "create_file" | "file_operation" => {
                required(args, "path")?;
                Ok(recorded(self.record(args)))
            }
            "send_notification" => {
                required(args, "message")?;
                Ok(recorded(self.record(args)))
            }
            other => Err(Error::InvalidArgument(format!(
                "unknown device command '{other}'; expected one of {}",
                COMMANDS.join(", ")
            ))),
        }
    }

    fn commands(&self) -> &'static [&'static str] {
        COMMANDS
    }
}

fn recorded(entry: RecordedCommand) -> Value {
    json!({
        "status": "recorded",
        "details": {
            "command": entry.command,
            "parameters": entry.parameters,
            "performed": false,
            "at": entry.at.to_rfc3339(),
        },
    })
}
