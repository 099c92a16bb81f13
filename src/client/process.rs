//! # Local child-process backend.
//!
//! [`ProcessClient`] treats each session as a child process running the
//! worker script under the interpreter for its language (`python3` or
//! `groovy` by default) with the descriptor's environment on top of the
//! inherited one.
//!
//! ```text
//! create    -> spawn `<interpreter> <script>`            serial = local counter
//! subscribe -> Running, then wait:
//!                exit 0            -> Completed
//!                exit != 0         -> Failed { exit status + stderr tail }
//!                batch timeout     -> kill, Failed { timed out }
//! delete    -> kill if still running, forget
//! ```
//!
//! A process is forgotten as soon as its terminal status has been handed to
//! the sink, so deleting a finished session is a no-op.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{SessionClient, SessionHandle, SessionStatus, StatusSink};
use crate::config::ScriptLanguage;
use crate::error::SessionError;
use crate::tasks::SessionDescriptor;

/// Bytes of stderr kept for failure details.
const STDERR_TAIL: usize = 2048;

struct Proc {
    child: Option<Child>,
    timeout: Option<Duration>,
    token: CancellationToken,
}

/// [`SessionClient`] backed by local child processes.
pub struct ProcessClient {
    python: OsString,
    groovy: OsString,
    workdir: Option<PathBuf>,
    next_serial: AtomicU64,
    procs: Procs,
}

impl Default for ProcessClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessClient {
    /// Uses `python3` and `groovy` from `PATH`.
    pub fn new() -> Self {
        Self {
            python: "python3".into(),
            groovy: "groovy".into(),
            workdir: None,
            next_serial: AtomicU64::new(1),
            procs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Overrides the interpreter for `language`.
    pub fn with_interpreter(mut self, language: ScriptLanguage, program: impl Into<OsString>) -> Self {
        match language {
            ScriptLanguage::Python => self.python = program.into(),
            ScriptLanguage::Groovy => self.groovy = program.into(),
        }
        self
    }

    /// Runs every worker in `dir`.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn interpreter(&self, language: ScriptLanguage) -> &OsString {
        match language {
            ScriptLanguage::Python => &self.python,
            ScriptLanguage::Groovy => &self.groovy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Proc>> {
        lock(&self.procs)
    }

    /// Processes created and not yet finished or deleted.
    pub(crate) fn tracked(&self) -> usize {
        self.lock().len()
    }
}

type Procs = Arc<Mutex<HashMap<u64, Proc>>>;

fn lock(procs: &Procs) -> MutexGuard<'_, HashMap<u64, Proc>> {
    procs.lock().unwrap_or_else(|e| e.into_inner())
}

fn spawn_error(program: &OsString, err: io::Error) -> SessionError {
    let reason = format!("failed to spawn {}: {err}", program.to_string_lossy());
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => SessionError::Fatal { reason },
        _ => SessionError::Fail { reason },
    }
}

#[async_trait]
impl SessionClient for ProcessClient {
    fn name(&self) -> &str {
        "process"
    }

    async fn create(&self, desc: &SessionDescriptor) -> Result<SessionHandle, SessionError> {
        let program = self.interpreter(desc.script_language);
        let mut cmd = Command::new(program);
        cmd.arg(&desc.script_path)
            .envs(desc.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        debug!(serial, pid = ?child.id(), name = %desc.name, "worker process spawned");

        self.lock().insert(
            serial,
            Proc {
                child: Some(child),
                timeout: desc.timeout,
                token: CancellationToken::new(),
            },
        );
        Ok(SessionHandle {
            serial,
            name: desc.name.as_str().into(),
        })
    }

    async fn subscribe(
        &self,
        handle: &SessionHandle,
        sink: StatusSink,
    ) -> Result<(), SessionError> {
        let (child, timeout, token) = {
            let mut procs = self.lock();
            let p = procs
                .get_mut(&handle.serial)
                .ok_or_else(|| SessionError::fail(format!("unknown session {handle}")))?;
            let child = p
                .child
                .take()
                .ok_or_else(|| SessionError::fail(format!("{handle} already subscribed")))?;
            (child, p.timeout, p.token.clone())
        };

        let procs = Arc::clone(&self.procs);
        let serial = handle.serial;
        tokio::spawn(async move {
            watch(child, timeout, token, sink).await;
            lock(&procs).remove(&serial);
        });
        Ok(())
    }

    async fn delete(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        let Some(p) = self.lock().remove(&handle.serial) else {
            debug!(serial = handle.serial, "session already finished");
            return Ok(());
        };
        p.token.cancel();
        if let Some(mut child) = p.child {
            child
                .start_kill()
                .map_err(|e| SessionError::fail(format!("kill {handle}: {e}")))?;
        }
        Ok(())
    }
}

enum Outcome {
    Canceled,
    TimedOut,
    Exited(io::Result<ExitStatus>, Vec<u8>),
}

/// Drives one child to a terminal status.
async fn watch(
    mut child: Child,
    timeout: Option<Duration>,
    token: CancellationToken,
    sink: StatusSink,
) {
    if sink.is_closed() || !sink.send(SessionStatus::Running).await {
        let _ = child.start_kill();
        return;
    }

    let mut stderr = child.stderr.take();
    let read_stderr = async move {
        let mut buf = Vec::new();
        if let Some(s) = stderr.as_mut() {
            let _ = s.read_to_end(&mut buf).await;
        }
        buf
    };
    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = {
        let exited = async { tokio::join!(child.wait(), read_stderr) };
        tokio::select! {
            _ = token.cancelled() => Outcome::Canceled,
            _ = deadline => Outcome::TimedOut,
            (res, err) = exited => Outcome::Exited(res, err),
        }
    };

    let status = match outcome {
        Outcome::Canceled => {
            let _ = child.kill().await;
            return;
        }
        Outcome::TimedOut => {
            let _ = child.kill().await;
            SessionStatus::Failed {
                details: format!("timed out after {:?}", timeout.unwrap_or_default()),
            }
        }
        Outcome::Exited(Ok(s), _) if s.success() => SessionStatus::Completed,
        Outcome::Exited(Ok(s), err) => SessionStatus::Failed {
            details: failure_details(&s.to_string(), &err),
        },
        Outcome::Exited(Err(e), _) => SessionStatus::Failed {
            details: format!("wait failed: {e}"),
        },
    };
    debug!(serial = sink.serial(), ?status, "worker finished");
    sink.send(status).await;
}

fn failure_details(exit: &str, stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL);
    let tail = String::from_utf8_lossy(&stderr[start..]);
    let tail = tail.trim();
    if tail.is_empty() {
        exit.to_owned()
    } else {
        format!("{exit}: {tail}")
    }
}
