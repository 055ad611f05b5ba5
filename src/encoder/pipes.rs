//! Encoder input pipes
//!
//! Each input gets an OS pipe whose read end is inherited by the child on
//! the descriptor named in the [`PipeMap`]. The write end stays in the
//! parent and is drained by a writer task fed through a bounded queue, so
//! the playout tick never blocks on a full pipe.
//!
//! ```text
//!  tick ──try_send──► mpsc(depth) ──► writer task ──write_all──► pipe ──► fd N in child
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::{PipeMap, PipeSlot};
use super::supervisor::{EncoderEvent, EncoderEventKind};
use crate::codec::Medium;
use crate::error::{EncoderError, Result};
use crate::scheduler::{MediaSink, SinkError};

#[cfg(unix)]
mod os {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    /// Read ends are parked at or above this number before exec so that
    /// remapping one input never clobbers another
    const PARKING_FD: libc::c_int = 64;

    fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }

    /// Anonymous pipe, both ends close-on-exec
    pub(super) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for the two descriptors pipe() writes
        check(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        // SAFETY: both descriptors were just created and are owned by nobody else
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        for fd in [&read, &write] {
            // SAFETY: valid open descriptor
            check(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
        }

        let parked = park(&read)?;
        Ok((parked, write))
    }

    fn park(fd: &OwnedFd) -> io::Result<OwnedFd> {
        // SAFETY: valid open descriptor; the duplicate is close-on-exec
        let raw = check(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, PARKING_FD) })?;
        // SAFETY: fcntl returned a fresh descriptor
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }

    /// Arrange for each `(source, target)` pair to be `dup2`ed in the child
    pub(super) fn inherit(command: &mut tokio::process::Command, mappings: Vec<(RawFd, RawFd)>) {
        // SAFETY: the closure only calls dup2, which is async-signal-safe,
        // and allocates nothing
        unsafe {
            command.pre_exec(move || {
                for &(source, target) in &mappings {
                    if libc::dup2(source, target) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    /// Ask the process to shut down
    pub(super) fn interrupt(pid: u32) -> io::Result<()> {
        // SAFETY: plain signal delivery
        check(unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) }).map(|_| ())
    }
}

/// Pipes created before spawn
///
/// The parent's copies of the read ends must outlive `spawn` and are
/// closed by [`PreparedPipes::into_writers`] afterwards.
pub(crate) struct PreparedPipes {
    #[cfg(unix)]
    read_ends: Vec<std::os::fd::OwnedFd>,
    #[cfg(unix)]
    write_ends: Vec<(Medium, std::os::fd::OwnedFd)>,
    stdin: Option<Medium>,
}

impl PreparedPipes {
    /// Create the pipes and wire them into `command`
    pub fn prepare(map: &PipeMap, command: &mut Command) -> Result<Self> {
        map.validate()?;

        let mut prepared = PreparedPipes {
            #[cfg(unix)]
            read_ends: Vec::new(),
            #[cfg(unix)]
            write_ends: Vec::new(),
            stdin: None,
        };

        #[cfg(unix)]
        let mut mappings = Vec::new();

        for (medium, slot) in map.slots() {
            match slot {
                PipeSlot::Stdin => prepared.stdin = Some(medium),
                #[cfg(unix)]
                PipeSlot::Fd(target) => {
                    use std::os::fd::AsRawFd;

                    let (read, write) = os::pipe().map_err(EncoderError::PipeSetup)?;
                    mappings.push((read.as_raw_fd(), target as i32));
                    prepared.read_ends.push(read);
                    prepared.write_ends.push((medium, write));
                }
                #[cfg(not(unix))]
                PipeSlot::Fd(_) => {
                    return Err(crate::error::ConfigError::UnsupportedPipe(slot).into())
                }
            }
        }

        #[cfg(unix)]
        {
            if !mappings.is_empty() {
                os::inherit(command, mappings);
            }
        }

        command.stdin(if prepared.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });

        Ok(prepared)
    }

    /// Close the parent's read ends and start one writer task per input
    pub fn into_writers(
        self,
        encoder_id: u64,
        stdin: Option<tokio::process::ChildStdin>,
        depth: usize,
        events: &mpsc::UnboundedSender<EncoderEvent>,
    ) -> Result<(EncoderPipes, Vec<JoinHandle<()>>)> {
        let mut pipes = EncoderPipes::default();
        let mut tasks = Vec::new();

        #[cfg(unix)]
        {
            drop(self.read_ends);
            for (medium, fd) in self.write_ends {
                let sender = tokio::net::unix::pipe::Sender::from_owned_fd(fd)
                    .map_err(EncoderError::PipeSetup)?;
                let (tx, rx) = mpsc::channel(depth);
                tasks.push(spawn_writer(encoder_id, medium, sender, rx, events.clone()));
                pipes.set(medium, tx);
            }
        }

        if let Some(medium) = self.stdin {
            let stdin = stdin.ok_or(EncoderError::MissingHandle("stdin"))?;
            let (tx, rx) = mpsc::channel(depth);
            tasks.push(spawn_writer(encoder_id, medium, stdin, rx, events.clone()));
            pipes.set(medium, tx);
        }

        Ok((pipes, tasks))
    }
}

/// Send SIGINT to `pid`
#[cfg(unix)]
pub(crate) fn interrupt(pid: u32) -> std::io::Result<()> {
    os::interrupt(pid)
}

fn spawn_writer<W>(
    encoder_id: u64,
    medium: Medium,
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    events: mpsc::UnboundedSender<EncoderEvent>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                tracing::warn!(
                    encoder_id = encoder_id,
                    medium = %medium,
                    error = %e,
                    "Encoder pipe write failed"
                );
                let _ = events.send(EncoderEvent {
                    encoder_id,
                    kind: EncoderEventKind::PipeFailed {
                        medium,
                        error: e.to_string(),
                    },
                });
                return;
            }
        }

        // Queue closed: flush and let the encoder see EOF
        let _ = writer.shutdown().await;
        tracing::trace!(encoder_id = encoder_id, medium = %medium, "Encoder pipe closed");
    })
}

/// Queues feeding the encoder's input pipes
#[derive(Debug, Default)]
pub struct EncoderPipes {
    video: Option<mpsc::Sender<Bytes>>,
    audio: Option<mpsc::Sender<Bytes>>,
}

impl EncoderPipes {
    fn set(&mut self, medium: Medium, tx: mpsc::Sender<Bytes>) {
        match medium {
            Medium::Video => self.video = Some(tx),
            Medium::Audio => self.audio = Some(tx),
        }
    }

    fn sender(&self, medium: Medium) -> Option<&mpsc::Sender<Bytes>> {
        match medium {
            Medium::Video => self.video.as_ref(),
            Medium::Audio => self.audio.as_ref(),
        }
    }

    /// Whether an input exists for `medium`
    pub fn has_input(&self, medium: Medium) -> bool {
        self.sender(medium).is_some()
    }

    /// Drop the queues; writer tasks flush what is queued and close the pipes
    pub fn close(&mut self) {
        self.video = None;
        self.audio = None;
    }

    pub fn is_closed(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

impl MediaSink for EncoderPipes {
    fn has_capacity(&self, medium: Medium) -> bool {
        match self.sender(medium) {
            Some(tx) => tx.capacity() > 0,
            // Let the write report it
            None => true,
        }
    }

    fn write(&mut self, medium: Medium, data: Bytes) -> std::result::Result<(), SinkError> {
        let tx = self.sender(medium).ok_or(SinkError::Unavailable(medium))?;
        tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full(medium),
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed(medium),
        })
    }
}
