//! One scheduler feeding one encoder
//!
//! A session normally runs a single pipeline. When the stream parameters
//! change after the encoder has started, the old pipeline is put into drain
//! mode and a fresh one takes over the incoming chunks.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::config::{AudioDecoding, RelayConfig};
use crate::encoder::{EncoderConfig, EncoderEvent, EncoderSupervisor, SupervisorSettings, Telemetry};
use crate::error::Result;
use crate::scheduler::{AudioDecoder, PassthroughDecoder, PlayoutError, PlayoutScheduler, TickReport};

pub(crate) struct Pipeline {
    /// Also the id of the encoder this pipeline spawns
    id: u64,
    encoder_config: EncoderConfig,
    scheduler: PlayoutScheduler,
    supervisor: Option<EncoderSupervisor>,
    drain_deadline: Option<Instant>,
    last_telemetry: Option<Instant>,
}

impl Pipeline {
    pub fn new(id: u64, encoder_config: EncoderConfig, config: &RelayConfig) -> Self {
        let mut encoder_config = encoder_config;
        let mut playout = config.playout.clone();
        if !encoder_config.has_audio() {
            playout = playout.disable_audio();
        }

        let scheduler = match audio_decoder(config.audio_decoding, &encoder_config) {
            Some(decoder) => PlayoutScheduler::with_decoder(playout, decoder),
            None => {
                // ffmpeg would wait forever on an audio pipe nobody writes
                encoder_config = encoder_config.without_audio();
                PlayoutScheduler::new(playout.disable_audio())
            }
        };

        Self {
            id,
            encoder_config,
            scheduler,
            supervisor: None,
            drain_deadline: None,
            last_telemetry: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn encoder_config(&self) -> &EncoderConfig {
        &self.encoder_config
    }

    /// Replace the encoder parameters before the encoder has started
    ///
    /// The audio decoder is kept, so a pipeline without audio stays without.
    pub fn reconfigure(&mut self, encoder_config: EncoderConfig) {
        debug_assert!(self.supervisor.is_none());
        self.encoder_config = if self.scheduler.config().audio_enabled {
            encoder_config
        } else {
            encoder_config.without_audio()
        };
    }

    pub fn scheduler(&self) -> &PlayoutScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut PlayoutScheduler {
        &mut self.scheduler
    }

    pub fn has_encoder(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Video has arrived and nothing is running to consume it yet
    pub fn needs_encoder(&self) -> bool {
        self.supervisor.is_none() && self.scheduler.video_seen() && !self.scheduler.is_stopped()
    }

    pub fn spawn_encoder(
        &mut self,
        settings: &SupervisorSettings,
        events: mpsc::UnboundedSender<EncoderEvent>,
    ) -> Result<()> {
        let supervisor = EncoderSupervisor::spawn(self.id, &self.encoder_config, settings, events)?;
        self.supervisor = Some(supervisor);
        Ok(())
    }

    /// Run one playout tick; `None` while no encoder is attached
    pub fn tick(&mut self, now: Instant) -> std::result::Result<Option<TickReport>, PlayoutError> {
        match self.supervisor.as_mut() {
            Some(supervisor) => self.scheduler.tick(now, supervisor.pipes_mut()).map(Some),
            None => Ok(None),
        }
    }

    pub fn begin_drain(&mut self, deadline: Instant) {
        self.drain_deadline = Some(deadline);
    }

    /// Draining pipelines are done once empty or out of time
    pub fn drain_finished(&self, now: Instant) -> bool {
        self.scheduler.is_empty() || self.drain_deadline.map_or(true, |d| now >= d)
    }

    /// Record a progress report and build the status line for it
    pub fn observe_telemetry(&mut self, telemetry: &Telemetry, now: Instant) -> String {
        self.last_telemetry = Some(now);
        let state = self.scheduler.observe_progress(telemetry.frame_count);
        telemetry.status_line(
            state,
            self.scheduler.video_depth(),
            self.scheduler.audio_depth(),
        )
    }

    /// Time since the last progress report, once reports have started
    pub fn telemetry_age(&self, now: Instant) -> Option<Duration> {
        self.last_telemetry.map(|at| now.saturating_duration_since(at))
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
        if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.stop();
        }
    }
}

fn audio_decoder(decoding: AudioDecoding, config: &EncoderConfig) -> Option<Box<dyn AudioDecoder>> {
    match decoding {
        AudioDecoding::Passthrough => Some(Box::new(PassthroughDecoder)),
        #[cfg(feature = "opus")]
        AudioDecoding::Opus => {
            let info = config.media_info();
            match crate::scheduler::OpusDecoder::new(info.audio_sample_rate, info.audio_channels) {
                Ok(decoder) => Some(Box::new(decoder)),
                Err(e) if config.has_audio() => {
                    tracing::warn!(error = %e, "Opus decoder unavailable, dropping audio");
                    None
                }
                Err(_) => None,
            }
        }
        #[cfg(not(feature = "opus"))]
        AudioDecoding::Opus => {
            // Rejected by RelayConfig::validate
            let _ = config;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::{Chunk, MediaInfo};
    use crate::encoder::PipeMap;

    fn pipeline(info: MediaInfo, pipes: PipeMap) -> Pipeline {
        let config = RelayConfig::default().audio_decoding(AudioDecoding::Passthrough);
        let encoder = EncoderConfig::new("rtmp://localhost/live/test", info, pipes).unwrap();
        Pipeline::new(7, encoder, &config)
    }

    #[test]
    fn test_audio_follows_encoder_inputs() {
        let mut p = pipeline(MediaInfo::default(), PipeMap::default());
        let now = Instant::now();
        p.scheduler_mut()
            .push(Chunk::video(0, 0, true, Bytes::from_static(b"v")), now);
        assert!(p
            .scheduler_mut()
            .push(Chunk::audio(0, 0, Bytes::from_static(b"a")), now)
            .is_admitted());

        let mut p = pipeline(MediaInfo::default(), PipeMap::video_only(crate::encoder::PipeSlot::Fd(3)));
        p.scheduler_mut()
            .push(Chunk::video(0, 0, true, Bytes::from_static(b"v")), now);
        assert!(!p
            .scheduler_mut()
            .push(Chunk::audio(0, 0, Bytes::from_static(b"a")), now)
            .is_admitted());
    }

    #[test]
    fn test_undecodable_audio_drops_encoder_input() {
        // No Opus decoder for six channels, and none at all without the feature
        let info = MediaInfo {
            audio_channels: 6,
            ..MediaInfo::default()
        };
        let config = RelayConfig::default().audio_decoding(AudioDecoding::Opus);
        let encoder = EncoderConfig::new("rtmp://localhost/live/test", info, PipeMap::default()).unwrap();
        let mut p = Pipeline::new(7, encoder, &config);

        assert!(!p.encoder_config().has_audio());
        let args = p.encoder_config().args();
        assert!(!args.iter().any(|a| a == "1:a"));
        assert!(!args.iter().any(|a| a == "s16le"));

        let now = Instant::now();
        p.scheduler_mut()
            .push(Chunk::video(0, 0, true, Bytes::from_static(b"v")), now);
        assert!(!p
            .scheduler_mut()
            .push(Chunk::audio(0, 0, Bytes::from_static(b"a")), now)
            .is_admitted());

        let stereo = EncoderConfig::new("rtmp://localhost/live/test", MediaInfo::default(), PipeMap::default())
            .unwrap();
        assert!(stereo.has_audio());
        p.reconfigure(stereo);
        assert!(!p.encoder_config().has_audio());
    }

    #[test]
    fn test_needs_encoder_after_video() {
        let mut p = pipeline(MediaInfo::default(), PipeMap::default());
        assert!(!p.needs_encoder());
        assert_eq!(p.tick(Instant::now()).unwrap(), None);

        p.scheduler_mut()
            .push(Chunk::video(0, 0, true, Bytes::from_static(b"v")), Instant::now());
        assert!(p.needs_encoder());

        p.stop();
        assert!(!p.needs_encoder());
    }

    #[test]
    fn test_drain_finished() {
        let mut p = pipeline(MediaInfo::default(), PipeMap::default());
        let now = Instant::now();
        p.scheduler_mut()
            .push(Chunk::video(0, 0, true, Bytes::from_static(b"v")), now);

        p.begin_drain(now + Duration::from_secs(1));
        assert!(!p.drain_finished(now));
        assert!(p.drain_finished(now + Duration::from_secs(1)));

        p.stop();
        assert!(p.drain_finished(now));
    }

    #[test]
    fn test_telemetry_status() {
        let mut p = pipeline(MediaInfo::default(), PipeMap::default());
        let now = Instant::now();
        assert_eq!(p.telemetry_age(now), None);

        let telemetry = Telemetry {
            frame_count: 10,
            fps: 30.0,
            size_kb: 64,
            elapsed_seconds: 0.5,
            bitrate_kbps: 1000.0,
            speed: 1.0,
        };
        let line = p.observe_telemetry(&telemetry, now);
        assert_eq!(line, "empty,10,30,64,0.5,1000,1,0,0");
        assert_eq!(
            p.telemetry_age(now + Duration::from_secs(2)),
            Some(Duration::from_secs(2))
        );
    }
}
