//! `code_exec`: run a snippet with a language interpreter.
//!
//! The source is written into a fresh temporary directory and run with the
//! interpreter for its language. stdout and stderr are captured up to the
//! output cap. On timeout the whole process group is killed, so nothing
//! the snippet spawned outlives the call.

use std::process::Stdio;
use std::time::Duration;

use ava_domain::capability::{CodeExecArgs, CodeLanguage};
use ava_domain::error::{Error, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::output::CappedBuffer;

pub struct CodeRunner {
    allowed: Vec<CodeLanguage>,
    output_cap: usize,
}

impl CodeRunner {
    pub fn new(allowed: Vec<CodeLanguage>, output_cap: usize) -> Self {
        Self { allowed, output_cap }
    }

    pub fn is_allowed(&self, language: CodeLanguage) -> bool {
        self.allowed.contains(&language)
    }

    /// Run `args.source`, waiting at most `timeout`.
    pub async fn run(&self, args: &CodeExecArgs, timeout: Duration) -> Result<Value> {
        if !self.is_allowed(args.language) {
            return Err(Error::PermissionDenied(format!(
                "interpreter '{}' is not enabled on this host",
                args.language.as_str()
            )));
        }

        let dir = tempfile::tempdir()?;
        let script = dir
            .path()
            .join(format!("snippet.{}", args.language.file_extension()));
        tokio::fs::write(&script, &args.source).await?;

        let mut cmd = Command::new(args.language.interpreter());
        cmd.arg(&script)
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            Error::ExternalFailure(format!(
                "failed to start {}: {e}",
                args.language.interpreter()
            ))
        })?;

        let pid = child.id();
        let stdout = spawn_reader(child.stdout.take(), self.output_cap);
        let stderr = spawn_reader(child.stderr.take(), self.output_cap);

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                kill_group(pid);
                let _ = child.kill().await;
                stdout.abort();
                stderr.abort();
                tracing::debug!(
                    language = args.language.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "code_exec timed out, process group killed"
                );
                return Err(Error::Timeout(format!(
                    "{} did not finish within {} ms",
                    args.language.as_str(),
                    timeout.as_millis()
                )));
            }
        };

        // Background jobs left by the snippet would otherwise hold the pipes open.
        kill_group(pid);
        let (stdout, stdout_truncated) = collect(stdout).await;
        let (stderr, stderr_truncated) = collect(stderr).await;

        Ok(json!({
            "exit_code": status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "truncated": stdout_truncated || stderr_truncated,
        }))
    }
}

/// Drain a pipe to EOF, keeping only the first `cap` bytes so a chatty
/// child never blocks on a full pipe.
fn spawn_reader<R>(pipe: Option<R>, cap: usize) -> JoinHandle<CappedBuffer>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = CappedBuffer::new(cap);
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.push(&chunk[..n]),
                }
            }
        }
        buf
    })
}

async fn collect(handle: JoinHandle<CappedBuffer>) -> (String, bool) {
    match handle.await {
        Ok(buf) => {
            let truncated = buf.truncated();
            (buf.into_text(), truncated)
        }
        Err(_) => (String::new(), false),
    }
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // Negative pid targets the process group created at spawn.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn bash(source: &str) -> CodeExecArgs {
        CodeExecArgs {
            language: CodeLanguage::Bash,
            source: source.into(),
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn captures_streams_and_exit_code() {
        let runner = CodeRunner::new(vec![CodeLanguage::Bash], 1024);
        let out = runner
            .run(&bash("echo out; echo err >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 3);
        assert_eq!(out["stdout"], "out\n");
        assert_eq!(out["stderr"], "err\n");
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn output_is_capped() {
        let runner = CodeRunner::new(vec![CodeLanguage::Bash], 10);
        let out = runner
            .run(&bash("for i in $(seq 1 200); do echo line$i; done"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out["stdout"].as_str().unwrap().len(), 10);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let runner = CodeRunner::new(vec![CodeLanguage::Bash], 1024);
        let started = std::time::Instant::now();
        let err = runner
            .run(&bash("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Running and not merely a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn is_running(pid: i32) -> bool {
        // SAFETY: signal 0 only checks that the pid exists.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_leaves_no_background_process_running() {
        let runner = CodeRunner::new(vec![CodeLanguage::Bash], 1024);
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let source = format!("sleep 30 &\necho $! > '{}'\nwait\n", pid_file.display());

        let err = runner
            .run(&bash(&source), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = is_running(pid);
        for _ in 0..20 {
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            alive = is_running(pid);
        }
        assert!(!alive, "background sleep {pid} survived the timeout");
    }

    #[tokio::test]
    async fn disabled_interpreter_is_denied() {
        let runner = CodeRunner::new(vec![CodeLanguage::Python], 1024);
        let err = runner.run(&bash("true"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}
