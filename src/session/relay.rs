//! Per-stream relay session
//!
//! A session owns everything needed to relay one stream: the active
//! [`Pipeline`] (scheduler plus encoder), possibly a second pipeline that is
//! draining after a parameter change, and three background tasks:
//!
//! - playout: ticks the schedulers every `tick_interval`
//! - watchdog: enforces the inactivity and telemetry timeouts
//! - encoder events: turns [`EncoderEvent`]s into [`RelayEvent`]s
//!
//! All mutable state lives in one [`SessionCore`] behind a mutex. Tasks hold
//! weak references, so dropping the last [`RelaySession`] handle tears the
//! session down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::config::RelayConfig;
use super::events::{RelayEvent, StopReason};
use super::pipeline::Pipeline;
use crate::codec::{Chunk, MediaChange, MediaInfo, PacketType};
use crate::encoder::{EncoderConfig, EncoderEvent, EncoderEventKind};
use crate::error::{ConfigError, Error, Result};
use crate::event::EventBus;
use crate::registry::StreamKey;
use crate::scheduler::{PlayoutError, PlayoutState};
use crate::stats::SessionStats;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a relay session; clones share the session
#[derive(Clone)]
pub struct RelaySession {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    key: StreamKey,
    config: RelayConfig,
    output_url: String,
    core: Mutex<SessionCore>,
    events: Arc<EventBus<RelayEvent>>,
    /// Held while emitting, so nothing is delivered after `Stopped`
    emit_lock: StdMutex<()>,
    encoder_events: mpsc::UnboundedSender<EncoderEvent>,
    stopped: AtomicBool,
    playout_task: StdMutex<Option<JoinHandle<()>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

struct SessionCore {
    active: Option<Pipeline>,
    draining: Option<Pipeline>,
    media_info: Option<MediaInfo>,
    next_encoder_id: u64,
    ready: bool,
    started_at: Instant,
    last_feed: Instant,
    stats: SessionStats,
}

impl RelaySession {
    /// Create a session and start its background tasks
    ///
    /// Must be called from within a tokio runtime. Nothing is spawned
    /// until the first video chunk is admitted.
    pub fn new(key: StreamKey, config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let output_url = config
            .output_url
            .clone()
            .unwrap_or_else(|| key.to_string());
        if output_url.trim().is_empty() {
            return Err(ConfigError::EmptyOutputUrl.into());
        }

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let (encoder_events, encoder_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            id,
            key,
            config,
            output_url,
            core: Mutex::new(SessionCore {
                active: None,
                draining: None,
                media_info: None,
                next_encoder_id: 1,
                ready: false,
                started_at: now,
                last_feed: now,
                stats: SessionStats::new(),
            }),
            events: Arc::new(EventBus::new()),
            emit_lock: StdMutex::new(()),
            encoder_events,
            stopped: AtomicBool::new(false),
            playout_task: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
        });

        let playout = spawn_playout(&inner);
        let watchdog = spawn_watchdog(&inner);
        let event_loop = spawn_event_loop(&inner, encoder_rx);
        *lock(&inner.playout_task) = Some(playout);
        lock(&inner.tasks).extend([watchdog, event_loop]);

        tracing::info!(
            stream = %inner.key,
            session_id = id,
            url = %inner.output_url,
            "Relay session created"
        );

        Ok(Self { inner })
    }

    /// Unique session ID
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn key(&self) -> &StreamKey {
        &self.inner.key
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Where the encoder publishes
    pub fn output_url(&self) -> &str {
        &self.inner.output_url
    }

    /// Session event bus
    pub fn events(&self) -> &Arc<EventBus<RelayEvent>> {
        &self.inner.events
    }

    /// Receive every event from now on through a channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RelayEvent> {
        self.inner.events.channel()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Feed one packet as received from the sender
    ///
    /// Returns the number of chunks admitted. Malformed packets are dropped
    /// and reported as [`Error::Protocol`]; the session keeps running.
    pub async fn feed(&self, data: Bytes) -> Result<usize> {
        if self.is_stopped() {
            return Err(Error::SessionStopped);
        }

        let decoded = self.inner.config.wire_format.decode(&data);
        let now = Instant::now();
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        if self.is_stopped() {
            return Err(Error::SessionStopped);
        }

        core.last_feed = now;
        core.stats.record_packet(data.len());

        let packet = match decoded {
            Ok(packet) => packet,
            Err(e) => {
                core.stats.protocol_errors += 1;
                tracing::warn!(
                    stream = %inner.key,
                    session_id = inner.id,
                    error = %e,
                    "Dropping malformed packet"
                );
                return Err(e.into());
            }
        };

        match packet.kind {
            PacketType::Stop => {
                drop(core);
                tracing::info!(stream = %inner.key, session_id = inner.id, "Sender stopped");
                self.stop_with(StopReason::SenderStopped).await;
                return Ok(0);
            }
            PacketType::Json => {
                tracing::debug!(stream = %inner.key, index = packet.index, "Ignoring JSON packet");
                return Ok(0);
            }
            PacketType::Media => {}
        }

        let info = packet.media_info;
        let mut events = Vec::new();
        let changes = core.apply_media_info(inner, info, now, &mut events)?;
        let admitted = core.admit(packet.chunks, now);

        let spawn_result = if core.draining.is_none() {
            core.spawn_encoder_if_needed(inner)
        } else {
            Ok(())
        };
        drop(core);

        inner.emit_with(|bus| {
            bus.emit_changes(
                changes.into_iter().map(RelayEvent::from),
                Some(RelayEvent::MediaInfo(info)),
            );
            for event in &events {
                bus.emit(event);
            }
        });
        if let Err(e) = spawn_result {
            self.stop_with(StopReason::SpawnFailed).await;
            return Err(e);
        }
        Ok(admitted)
    }

    /// Stop the session
    ///
    /// Returns false if it was already stopped.
    pub async fn stop(&self) -> bool {
        self.stop_with(StopReason::Requested).await
    }

    /// Stop the session for `reason`
    ///
    /// Only the first call has an effect. Playout is cancelled before the
    /// encoders are stopped; `Error` (for failures) and `Stopped` are
    /// emitted once.
    pub async fn stop_with(&self, reason: StopReason) -> bool {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(task) = lock(&inner.playout_task).take() {
            task.abort();
        }

        let stats = {
            let mut core = inner.core.lock().await;
            core.shutdown();
            core.snapshot()
        };

        for task in lock(&inner.tasks).drain(..) {
            task.abort();
        }

        if reason.is_error() {
            tracing::warn!(
                stream = %inner.key,
                session_id = inner.id,
                reason = %reason,
                "Relay session failed"
            );
        }
        tracing::info!(
            stream = %inner.key,
            session_id = inner.id,
            reason = %reason,
            packets = stats.packets_received,
            protocol_errors = stats.protocol_errors,
            dropped = stats.dropped_chunks,
            duration_secs = stats.duration.as_secs(),
            "Relay session stopped"
        );

        let _emitting = lock(&inner.emit_lock);
        if reason.is_error() {
            inner.events.emit(&RelayEvent::Error(reason.to_string()));
        }
        inner.events.emit(&RelayEvent::Stopped(reason));
        true
    }

    /// Playout state of the active pipeline
    pub async fn state(&self) -> PlayoutState {
        if self.is_stopped() {
            return PlayoutState::Stopped;
        }
        let core = self.inner.core.lock().await;
        core.active
            .as_ref()
            .map_or(PlayoutState::Empty, |p| p.scheduler().state())
    }

    /// Current stream parameters, once the first packet has arrived
    pub async fn media_info(&self) -> Option<MediaInfo> {
        self.inner.core.lock().await.media_info
    }

    /// ID of the encoder currently receiving chunks
    pub async fn encoder_id(&self) -> Option<u64> {
        let core = self.inner.core.lock().await;
        core.active
            .as_ref()
            .filter(|p| p.has_encoder())
            .map(Pipeline::id)
    }

    /// Whether the encoder has reported its output open
    pub async fn is_ready(&self) -> bool {
        self.inner.core.lock().await.ready
    }

    /// Whether an old encoder is still draining after a parameter change
    pub async fn is_draining(&self) -> bool {
        self.inner.core.lock().await.draining.is_some()
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> SessionStats {
        self.inner.core.lock().await.snapshot()
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Inner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn encoder_config(&self, info: MediaInfo) -> Result<EncoderConfig> {
        Ok(EncoderConfig::new(self.output_url.as_str(), info, self.config.pipes)?
            .audio_bitrate(self.config.audio_bitrate_kbps))
    }

    /// Emit through `emit` unless the session has stopped
    fn emit_with(&self, emit: impl FnOnce(&EventBus<RelayEvent>)) {
        let _emitting = lock(&self.emit_lock);
        if self.is_stopped() {
            return;
        }
        emit(&self.events);
    }

    fn emit_all(&self, events: Vec<RelayEvent>) {
        self.emit_with(|bus| {
            for event in &events {
                bus.emit(event);
            }
        });
    }

    /// Stop from inside one of the session's own tasks
    ///
    /// Runs on a fresh task since stopping aborts the caller.
    fn spawn_stop(self: &Arc<Self>, reason: StopReason) {
        let session = RelaySession {
            inner: Arc::clone(self),
        };
        tokio::spawn(async move {
            session.stop_with(reason).await;
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.playout_task).take() {
            task.abort();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl SessionCore {
    fn new_pipeline(&mut self, inner: &Inner, encoder_config: EncoderConfig) -> Pipeline {
        let id = self.next_encoder_id;
        self.next_encoder_id += 1;
        Pipeline::new(id, encoder_config, &inner.config)
    }

    fn apply_media_info(
        &mut self,
        inner: &Inner,
        info: MediaInfo,
        now: Instant,
        events: &mut Vec<RelayEvent>,
    ) -> Result<Vec<MediaChange>> {
        let Some(previous) = self.media_info else {
            self.media_info = Some(info);
            events.push(RelayEvent::MediaInfo(info));

            let pipeline = self.new_pipeline(inner, inner.encoder_config(info)?);
            self.active = Some(pipeline);
            return Ok(Vec::new());
        };

        if previous == info {
            return Ok(Vec::new());
        }

        let changes = info.changes(&previous);
        tracing::info!(
            stream = %inner.key,
            session_id = inner.id,
            changed = ?changes.iter().map(|c| c.field).collect::<Vec<_>>(),
            "Media parameters changed"
        );
        self.media_info = Some(info);
        self.stats.media_changes += 1;

        let (next_config, running) = match self.active.as_ref() {
            Some(active) => (active.encoder_config().apply(&info), active.has_encoder()),
            None => return Ok(changes),
        };
        let Some(next_config) = next_config else {
            tracing::debug!(stream = %inner.key, "Encoder parameters unchanged");
            return Ok(changes);
        };

        if !running {
            if let Some(active) = self.active.as_mut() {
                active.reconfigure(next_config);
            }
            return Ok(changes);
        }

        // Fresh from the configured pipes, so audio dropped by the old
        // pipeline can come back
        let next = self.new_pipeline(inner, inner.encoder_config(info)?);
        if let Some(mut old) = self.active.replace(next) {
            old.begin_drain(now + inner.config.drain_timeout);
            tracing::info!(
                stream = %inner.key,
                encoder_id = old.id(),
                buffered = old.scheduler().video_depth() + old.scheduler().audio_depth(),
                "Draining encoder before restart"
            );
            if let Some(mut stale) = self.draining.replace(old) {
                stale.stop();
            }
        }
        Ok(changes)
    }

    fn admit(&mut self, chunks: Vec<Chunk>, now: Instant) -> usize {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };

        let mut admitted = 0;
        for chunk in chunks {
            let medium = chunk.medium;
            let keyframe = chunk.is_keyframe();
            let admission = active.scheduler_mut().push(chunk, now);
            if admission.is_admitted() {
                admitted += 1;
            }
            self.stats.record_admission(medium, keyframe, admission);
        }
        admitted
    }

    fn spawn_encoder_if_needed(&mut self, inner: &Inner) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.needs_encoder() {
            return Ok(());
        }

        if let Err(e) = active.spawn_encoder(&inner.config.supervisor, inner.encoder_events.clone()) {
            tracing::error!(
                stream = %inner.key,
                session_id = inner.id,
                error = %e,
                "Failed to start encoder"
            );
            return Err(e);
        }
        self.stats.encoder_spawns += 1;
        Ok(())
    }

    fn tick(&mut self, inner: &Inner, now: Instant) -> Option<StopReason> {
        if let Some(draining) = self.draining.as_mut() {
            let finished = match draining.tick(now) {
                Ok(_) => draining.drain_finished(now),
                Err(e) => {
                    tracing::debug!(encoder_id = draining.id(), error = %e, "Draining encoder failed");
                    true
                }
            };
            if finished {
                if let Some(mut old) = self.draining.take() {
                    tracing::info!(stream = %inner.key, encoder_id = old.id(), "Encoder drained");
                    old.stop();
                }
            }
        }

        if self.draining.is_none() && self.spawn_encoder_if_needed(inner).is_err() {
            return Some(StopReason::SpawnFailed);
        }

        let active = self.active.as_mut()?;
        match active.tick(now) {
            Ok(Some(report)) => {
                if report.started {
                    tracing::info!(
                        stream = %inner.key,
                        encoder_id = active.id(),
                        discarded = report.resynced,
                        "Playout started"
                    );
                }
                self.stats.record_tick(&report);
                None
            }
            Ok(None) => None,
            Err(PlayoutError::Timeout { idle }) => {
                tracing::info!(
                    stream = %inner.key,
                    idle_ms = idle.as_millis() as u64,
                    "Playout ran dry"
                );
                Some(StopReason::InactivityTimeout)
            }
            Err(PlayoutError::Sink(e)) => {
                tracing::warn!(stream = %inner.key, error = %e, "Encoder input failed");
                Some(StopReason::StreamError)
            }
        }
    }

    fn handle_encoder_event(
        &mut self,
        inner: &Inner,
        event: EncoderEvent,
        now: Instant,
        events: &mut Vec<RelayEvent>,
    ) -> Option<StopReason> {
        let EncoderEvent { encoder_id, kind } = event;

        if self.draining.as_ref().map(Pipeline::id) == Some(encoder_id) {
            if matches!(
                kind,
                EncoderEventKind::Exited { .. }
                    | EncoderEventKind::StreamError(_)
                    | EncoderEventKind::PipeFailed { .. }
            ) {
                tracing::debug!(encoder_id = encoder_id, "Draining encoder ended early");
                if let Some(mut old) = self.draining.take() {
                    old.stop();
                }
            }
            return None;
        }

        let Some(active) = self.active.as_mut().filter(|p| p.id() == encoder_id) else {
            tracing::trace!(encoder_id = encoder_id, "Event from retired encoder");
            return None;
        };

        match kind {
            EncoderEventKind::Ready => {
                if !self.ready {
                    self.ready = true;
                    tracing::info!(stream = %inner.key, encoder_id = encoder_id, "Encoder ready");
                    events.push(RelayEvent::Ready);
                }
                None
            }
            EncoderEventKind::Telemetry(telemetry) => {
                let status = active.observe_telemetry(&telemetry, now);
                self.stats.last_telemetry = Some(telemetry);
                events.push(RelayEvent::Update(status));
                None
            }
            EncoderEventKind::StreamError(line) => {
                tracing::warn!(stream = %inner.key, encoder_id = encoder_id, line = %line, "Encoder stream error");
                Some(StopReason::StreamError)
            }
            EncoderEventKind::PipeFailed { medium, error } => {
                tracing::warn!(
                    stream = %inner.key,
                    encoder_id = encoder_id,
                    medium = %medium,
                    error = %error,
                    "Encoder pipe failed"
                );
                Some(StopReason::StreamError)
            }
            EncoderEventKind::Exited { code, expected } => {
                if expected {
                    None
                } else {
                    Some(StopReason::EncoderExited(code))
                }
            }
        }
    }

    fn check_timeouts(&self, config: &RelayConfig, now: Instant) -> Option<StopReason> {
        if now.saturating_duration_since(self.last_feed) >= config.inactivity_timeout {
            return Some(StopReason::InactivityTimeout);
        }

        let stale = self
            .active
            .as_ref()
            .and_then(|p| p.telemetry_age(now))
            .is_some_and(|age| age >= config.telemetry_timeout);
        if stale {
            return Some(StopReason::TelemetryTimeout);
        }
        None
    }

    fn shutdown(&mut self) {
        if let Some(mut draining) = self.draining.take() {
            draining.stop();
        }
        if let Some(active) = self.active.as_mut() {
            active.stop();
        }
    }

    fn snapshot(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.duration = self.started_at.elapsed();
        stats
    }
}

fn spawn_playout(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let period = inner.config.playout.tick_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_stopped() {
                break;
            }

            let reason = {
                let mut core = inner.core.lock().await;
                core.tick(&inner, Instant::now())
            };
            if let Some(reason) = reason {
                inner.spawn_stop(reason);
                break;
            }
        }
    })
}

fn spawn_watchdog(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let period = inner.config.watchdog_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_stopped() {
                break;
            }

            let reason = {
                let core = inner.core.lock().await;
                core.check_timeouts(&inner.config, Instant::now())
            };
            if let Some(reason) = reason {
                tracing::info!(stream = %inner.key, reason = %reason, "Watchdog expired");
                inner.spawn_stop(reason);
                break;
            }
        }
    })
}

fn spawn_event_loop(
    inner: &Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<EncoderEvent>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_stopped() {
                break;
            }

            let mut events = Vec::new();
            let reason = {
                let mut core = inner.core.lock().await;
                core.handle_encoder_event(&inner, event, Instant::now(), &mut events)
            };
            inner.emit_all(events);
            if let Some(reason) = reason {
                inner.spawn_stop(reason);
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::codec::{Packer, PackerConfig};
    use crate::encoder::SupervisorSettings;
    use crate::scheduler::PlayoutConfig;
    use crate::session::AudioDecoding;

    const URL: &str = "rtmp://localhost/live/test";

    fn info() -> MediaInfo {
        MediaInfo {
            width: 640,
            height: 360,
            framerate: 30,
            ..MediaInfo::default()
        }
    }

    fn config() -> RelayConfig {
        RelayConfig::default().audio_decoding(AudioDecoding::Passthrough)
    }

    /// Encoder stand-in: `sh -c <script> ffmpeg <generated args>`
    fn fake_encoder(script: &str) -> SupervisorSettings {
        SupervisorSettings::default()
            .program("sh")
            .leading_args(["-c", script, "ffmpeg"])
            .stop_grace(Duration::from_millis(100))
            .kill_timeout(Duration::from_millis(100))
    }

    /// Media packet carrying one video chunk per timestamp (ms)
    fn video_packet(info: MediaInfo, timestamps: &[u64]) -> Bytes {
        let mut packer = Packer::new(PackerConfig::default(), info);
        let now = Instant::now();
        for (i, &ts) in timestamps.iter().enumerate() {
            let chunk = Chunk::video(ts * 1000, 33_000, i == 0, Bytes::from_static(b"frame"));
            assert!(packer.push(&chunk, now).is_none());
        }
        packer.flush().unwrap()
    }

    fn audio_packet(info: MediaInfo) -> Bytes {
        let mut packer = Packer::new(PackerConfig::default(), info);
        let chunk = Chunk::audio(0, 20_000, Bytes::from_static(b"pcm"));
        assert!(packer.push(&chunk, Instant::now()).is_none());
        packer.flush().unwrap()
    }

    fn stop_packet(info: MediaInfo) -> Bytes {
        Packer::new(PackerConfig::default(), info).stop().pop().unwrap()
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> RelayEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    async fn stopped_reason(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> StopReason {
        loop {
            if let RelayEvent::Stopped(reason) = next_event(rx).await {
                return reason;
            }
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let session = RelaySession::new(StreamKey::new(URL), config()).unwrap();
        let mut rx = session.subscribe();

        assert!(session.stop().await);
        assert!(!session.stop().await);
        assert!(!session.stop_with(StopReason::StreamError).await);

        assert_eq!(next_event(&mut rx).await, RelayEvent::Stopped(StopReason::Requested));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.state().await, PlayoutState::Stopped);

        let result = session.feed(audio_packet(info())).await;
        assert!(matches!(result, Err(Error::SessionStopped)));
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_session() {
        let session = RelaySession::new(StreamKey::new(URL), config()).unwrap();

        let mut bad = video_packet(info(), &[0]).to_vec();
        bad[4] = 9;
        let result = session.feed(Bytes::from(bad)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(!session.is_stopped());

        // Audio before video is not admitted but is a valid packet
        assert_eq!(assert_ok!(session.feed(audio_packet(info())).await), 0);

        let stats = session.stats().await;
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.protocol_errors, 1);
        assert_eq!(stats.rejected_chunks, 1);
        assert_eq!(session.media_info().await, Some(info()));

        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_packet_stops_session() {
        let session = RelaySession::new(StreamKey::new(URL), config()).unwrap();
        let mut rx = session.subscribe();

        assert_eq!(assert_ok!(session.feed(stop_packet(info())).await), 0);
        assert!(session.is_stopped());
        assert_eq!(stopped_reason(&mut rx).await, StopReason::SenderStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout() {
        let config = config().inactivity_timeout(Duration::from_secs(2));
        let session = RelaySession::new(StreamKey::new(URL), config).unwrap();
        let mut rx = session.subscribe();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_ok!(session.feed(audio_packet(info())).await);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!session.is_stopped());

        let reason = stopped_reason(&mut rx).await;
        assert_eq!(reason, StopReason::InactivityTimeout);
        assert_eq!(
            RelayEvent::Stopped(reason).status_line().as_deref(),
            Some("stopped,no activity")
        );
    }

    #[test]
    fn test_rejects_bad_config() {
        // Fails before anything is spawned, so no runtime is needed
        let result = RelaySession::new(StreamKey::new(" "), config());
        assert!(matches!(result, Err(Error::Config(ConfigError::EmptyOutputUrl))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure_stops_session() {
        let settings = SupervisorSettings::default().program("/nonexistent/nomux-relay-encoder");
        let session = RelaySession::new(StreamKey::new(URL), config().supervisor(settings)).unwrap();
        let mut rx = session.subscribe();

        assert_err!(session.feed(video_packet(info(), &[0])).await);
        assert!(session.is_stopped());

        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::MediaInfo(info())
        );
        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::Error("spawn failed".to_string())
        );
        assert_eq!(next_event(&mut rx).await, RelayEvent::Stopped(StopReason::SpawnFailed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encoder_exit_stops_session() {
        let config = config().supervisor(fake_encoder("exit 3"));
        let session = RelaySession::new(StreamKey::new(URL), config).unwrap();
        let mut rx = session.subscribe();

        assert_eq!(assert_ok!(session.feed(video_packet(info(), &[0, 33])).await), 2);

        assert_eq!(next_event(&mut rx).await, RelayEvent::MediaInfo(info()));
        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::Error("ffmpeg exit 3".to_string())
        );
        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::Stopped(StopReason::EncoderExited(Some(3)))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_and_status_updates() {
        let script = "echo 'Stream #0:0: Video: h264' >&2; \
            printf 'frame=    5 fps= 30 q=-1.0 size=      12kB time=00:00:00.16 bitrate= 600.0kbits/s speed=   1x\\r' >&2; \
            cat <&3 >/dev/null";
        let config = config().supervisor(fake_encoder(script));
        let session = RelaySession::new(StreamKey::new(URL), config).unwrap();
        let mut rx = session.subscribe();

        assert_ok!(session.feed(video_packet(info(), &[0, 33, 66])).await);
        assert_eq!(session.encoder_id().await, Some(1));

        assert_eq!(next_event(&mut rx).await, RelayEvent::MediaInfo(info()));
        assert_eq!(next_event(&mut rx).await, RelayEvent::Ready);
        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::Update("buffering,5,30,12,0.16,600,1,3,0".to_string())
        );
        assert!(session.is_ready().await);

        assert!(session.stop().await);
        assert_eq!(stopped_reason(&mut rx).await, StopReason::Requested);
    }

    #[tokio::test]
    async fn test_nothing_delivered_after_stopped() {
        let session = RelaySession::new(StreamKey::new(URL), config()).unwrap();
        let mut rx = session.subscribe();

        session.stop().await;
        session
            .inner
            .emit_all(vec![RelayEvent::Update("live,1,30,1,0.1,1,1,0,0".to_string())]);

        assert_eq!(next_event(&mut rx).await, RelayEvent::Stopped(StopReason::Requested));
        assert_err!(rx.try_recv());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bitrate_change_keeps_encoder() {
        let config = config()
            .supervisor(fake_encoder("cat <&3 >/dev/null"))
            .playout(PlayoutConfig::default().start_threshold(1000));
        let session = RelaySession::new(StreamKey::new(URL), config).unwrap();
        let mut rx = session.subscribe();

        assert_ok!(session.feed(video_packet(info(), &[0, 33])).await);
        assert_eq!(session.encoder_id().await, Some(1));
        assert_eq!(next_event(&mut rx).await, RelayEvent::MediaInfo(info()));

        let faster = MediaInfo {
            video_bitrate_kbps: 4_000,
            ..info()
        };
        assert_ok!(session.feed(video_packet(faster, &[66])).await);
        assert!(!session.is_draining().await);
        assert_eq!(session.encoder_id().await, Some(1));

        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::MediaChanged {
                field: "videoBitrate",
                value: "4000".to_string()
            }
        );
        assert_eq!(next_event(&mut rx).await, RelayEvent::MediaInfo(faster));

        let stats = session.stats().await;
        assert_eq!(stats.encoder_spawns, 1);
        assert_eq!(stats.media_changes, 1);

        session.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_media_change_swaps_encoder() {
        let config = config()
            .supervisor(fake_encoder("cat <&3 >/dev/null"))
            .playout(PlayoutConfig::default().start_threshold(1000))
            .drain_timeout(Duration::from_millis(50));
        let session = RelaySession::new(StreamKey::new(URL), config).unwrap();
        let mut rx = session.subscribe();

        assert_ok!(session.feed(video_packet(info(), &[0, 33])).await);
        assert_eq!(session.encoder_id().await, Some(1));
        assert_eq!(next_event(&mut rx).await, RelayEvent::MediaInfo(info()));

        let wider = MediaInfo {
            width: 1280,
            height: 720,
            ..info()
        };
        assert_ok!(session.feed(video_packet(wider, &[66])).await);
        assert!(session.is_draining().await);
        assert_eq!(session.encoder_id().await, None);

        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::MediaChanged {
                field: "width",
                value: "1280".to_string()
            }
        );
        assert_eq!(
            next_event(&mut rx).await,
            RelayEvent::MediaChanged {
                field: "height",
                value: "720".to_string()
            }
        );
        assert_eq!(next_event(&mut rx).await, RelayEvent::MediaInfo(wider));

        // The old encoder never started playout, so it drains by deadline
        timeout(Duration::from_secs(5), async {
            while session.encoder_id().await != Some(2) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("replacement encoder was not started");
        assert!(!session.is_draining().await);

        let stats = session.stats().await;
        assert_eq!(stats.encoder_spawns, 2);
        assert_eq!(stats.media_changes, 1);

        session.stop().await;
    }
}
