//! Encoder process supervision
//!
//! One supervisor owns one encoder process for its whole life:
//!
//! - a writer task per input pipe (see [`pipes`](super::pipes))
//! - a diagnostics task reading stderr and reporting [`EncoderEvent`]s
//! - a lifecycle task owning the [`Child`], which performs the staged
//!   shutdown and reports the exit
//!
//! Shutdown closes the input pipes, waits `stop_grace` for the encoder to
//! finish on its own, sends SIGINT, waits `kill_timeout`, then kills.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::{EncoderConfig, SupervisorSettings};
use super::pipes::{EncoderPipes, PreparedPipes};
use super::telemetry::{classify, Diagnostic, Telemetry};
use crate::codec::Medium;
use crate::error::{EncoderError, Result};

/// Longest stderr line kept; anything longer is discarded unparsed
const MAX_LINE_LEN: usize = 16 * 1024;

/// Something the encoder reported
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderEvent {
    /// Supervisor that produced the event
    pub encoder_id: u64,
    pub kind: EncoderEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEventKind {
    /// First stream opened (or first progress report seen)
    Ready,
    /// Progress report
    Telemetry(Telemetry),
    /// The encoder logged an I/O failure
    StreamError(String),
    /// Writing into an input pipe failed
    PipeFailed { medium: Medium, error: String },
    /// The process is gone
    Exited {
        /// Exit code; `None` when killed by a signal
        code: Option<i32>,
        /// Whether the exit followed [`EncoderSupervisor::stop`]
        expected: bool,
    },
}

/// Handle to a running encoder
pub struct EncoderSupervisor {
    id: u64,
    config: EncoderConfig,
    pid: Option<u32>,
    pipes: EncoderPipes,
    stop_tx: Option<oneshot::Sender<()>>,
    stopping: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    lifecycle: JoinHandle<()>,
}

impl EncoderSupervisor {
    /// Start an encoder for `config`
    ///
    /// Events are tagged with `id` and sent to `events` until the process
    /// has exited.
    pub fn spawn(
        id: u64,
        config: &EncoderConfig,
        settings: &SupervisorSettings,
        events: mpsc::UnboundedSender<EncoderEvent>,
    ) -> Result<Self> {
        Self::launch(id, config.clone(), settings.command_args(config), settings, events)
    }

    pub(crate) fn launch(
        id: u64,
        config: EncoderConfig,
        args: Vec<String>,
        settings: &SupervisorSettings,
        events: mpsc::UnboundedSender<EncoderEvent>,
    ) -> Result<Self> {
        let mut command = Command::new(&settings.program);
        command
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let prepared = PreparedPipes::prepare(config.pipes(), &mut command)?;
        let mut child = command.spawn().map_err(EncoderError::Spawn)?;
        let pid = child.id();

        let stderr = child
            .stderr
            .take()
            .ok_or(EncoderError::MissingHandle("stderr"))?;
        let stdin = child.stdin.take();
        let (pipes, mut tasks) =
            prepared.into_writers(id, stdin, settings.pipe_queue_depth, &events)?;

        tasks.push(tokio::spawn(read_diagnostics(id, stderr, events.clone())));

        let (stop_tx, stop_rx) = oneshot::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let lifecycle = tokio::spawn(supervise(
            id,
            child,
            stop_rx,
            settings.clone(),
            Arc::clone(&stopping),
            events,
        ));

        tracing::info!(
            encoder_id = id,
            pid = ?pid,
            program = %settings.program,
            url = %config.url(),
            "Encoder started"
        );

        Ok(Self {
            id,
            config,
            pid,
            pipes,
            stop_tx: Some(stop_tx),
            stopping,
            tasks,
            lifecycle,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// OS process id, if the process was still running at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Input pipes, usable as a [`MediaSink`](crate::scheduler::MediaSink)
    pub fn pipes(&self) -> &EncoderPipes {
        &self.pipes
    }

    pub fn pipes_mut(&mut self) -> &mut EncoderPipes {
        &mut self.pipes
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_tx.is_none()
    }

    /// Whether the process has been reaped and every helper task has ended
    pub fn is_finished(&self) -> bool {
        self.lifecycle.is_finished() && self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Begin the staged shutdown
    ///
    /// Returns false if the supervisor was already stopping.
    pub fn stop(&mut self) -> bool {
        let Some(stop_tx) = self.stop_tx.take() else {
            return false;
        };

        self.stopping.store(true, Ordering::Release);
        let _ = stop_tx.send(());
        self.pipes.close();

        tracing::info!(encoder_id = self.id, pid = ?self.pid, "Encoder stopping");
        true
    }
}

impl Drop for EncoderSupervisor {
    fn drop(&mut self) {
        // Writer and diagnostics tasks end on their own once the pipes close
        self.stop();
    }
}

impl std::fmt::Debug for EncoderSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSupervisor")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

async fn supervise(
    id: u64,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    settings: SupervisorSettings,
    stopping: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<EncoderEvent>,
) {
    let early_exit = tokio::select! {
        biased;
        // A dropped sender also means stop
        _ = &mut stop_rx => None,
        status = child.wait() => Some(status),
    };

    let status = match early_exit {
        Some(status) => status,
        None => shutdown(id, &mut child, &settings).await,
    };

    let code = status.as_ref().ok().and_then(ExitStatus::code);
    let expected = stopping.load(Ordering::Acquire);

    match &status {
        Ok(status) if expected => {
            tracing::info!(encoder_id = id, status = %status, "Encoder exited")
        }
        Ok(status) => {
            tracing::warn!(encoder_id = id, status = %status, "Encoder exited unexpectedly")
        }
        Err(e) => tracing::error!(encoder_id = id, error = %e, "Failed to reap encoder"),
    }

    let _ = events.send(EncoderEvent {
        encoder_id: id,
        kind: EncoderEventKind::Exited { code, expected },
    });
}

async fn shutdown(
    id: u64,
    child: &mut Child,
    settings: &SupervisorSettings,
) -> std::io::Result<ExitStatus> {
    if let Ok(status) = timeout(settings.stop_grace, child.wait()).await {
        return status;
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            tracing::debug!(encoder_id = id, pid = pid, "Sending SIGINT to encoder");
            if let Err(e) = super::pipes::interrupt(pid) {
                tracing::debug!(encoder_id = id, error = %e, "SIGINT failed");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if let Ok(status) = timeout(settings.kill_timeout, child.wait()).await {
        return status;
    }

    tracing::warn!(
        encoder_id = id,
        timeout_ms = settings.kill_timeout.as_millis() as u64,
        "Encoder ignored SIGINT, killing"
    );
    child.kill().await?;
    child.wait().await
}

/// Read stderr, splitting on `\r` as well as `\n`
async fn read_diagnostics(
    id: u64,
    mut stderr: ChildStderr,
    events: mpsc::UnboundedSender<EncoderEvent>,
) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut ready = false;

    loop {
        match stderr.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(encoder_id = id, error = %e, "Encoder stderr read failed");
                break;
            }
        }

        while let Some(pos) = buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line = buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line[..pos]);
            if !handle_line(id, line.trim(), &mut ready, &events) {
                return;
            }
        }

        if buf.len() > MAX_LINE_LEN {
            buf.clear();
        }
    }

    if !buf.is_empty() {
        let line = String::from_utf8_lossy(&buf);
        handle_line(id, line.trim(), &mut ready, &events);
    }
}

/// Returns false once nobody is listening
fn handle_line(
    id: u64,
    line: &str,
    ready: &mut bool,
    events: &mpsc::UnboundedSender<EncoderEvent>,
) -> bool {
    if line.is_empty() {
        return true;
    }

    let send = |kind| {
        events
            .send(EncoderEvent {
                encoder_id: id,
                kind,
            })
            .is_ok()
    };

    match classify(line) {
        Diagnostic::Progress(telemetry) => {
            if !*ready {
                *ready = true;
                if !send(EncoderEventKind::Ready) {
                    return false;
                }
            }
            send(EncoderEventKind::Telemetry(telemetry))
        }
        Diagnostic::StreamReady if !*ready => {
            *ready = true;
            send(EncoderEventKind::Ready)
        }
        Diagnostic::StreamError => {
            tracing::warn!(encoder_id = id, line = line, "Encoder stream error");
            send(EncoderEventKind::StreamError(line.to_string()))
        }
        Diagnostic::StreamReady | Diagnostic::Other => {
            tracing::trace!(encoder_id = id, line = line, "encoder");
            true
        }
    }
}
