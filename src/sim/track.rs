//! Simulated local and remote tracks

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::any::Any;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::SimState;
use crate::liveness::VideoBuffer;
use crate::models::StreamType;
use crate::session::{AudioSink, LocalTrack, RemoteTrack, VideoSink};

const SAMPLE_RATE: usize = 48_000;
const SAMPLES_PER_FRAME: usize = SAMPLE_RATE / 50;
const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 8_000.0;
const FRAME_WIDTH: usize = 160;
const FRAME_HEIGHT: usize = 120;

/// One decoded frame travelling through the loopback
#[derive(Clone, Debug)]
pub(crate) enum SimFrame {
    Audio(Vec<u8>),
    Video(VideoBuffer),
}

/// 20ms of PCM16 little-endian mono; a 440Hz tone unless `silent`
pub(crate) fn audio_frame(silent: bool) -> Vec<u8> {
    (0..SAMPLES_PER_FRAME)
        .flat_map(|n| {
            let sample = if silent {
                0
            } else {
                let phase = 2.0 * PI * TONE_HZ * n as f64 / SAMPLE_RATE as f64;
                (TONE_AMPLITUDE * phase.sin()) as i16
            };
            sample.to_le_bytes()
        })
        .collect()
}

/// Solid I420 frame; mid grey unless `black`
pub(crate) fn video_frame(black: bool) -> VideoBuffer {
    let luma = if black { 0 } else { 128 };
    VideoBuffer::solid_i420(FRAME_WIDTH, FRAME_HEIGHT, luma, 128, 128)
}

/// Fake source feeding an encoder and packetizer
pub struct SimLocalTrack {
    state: Arc<SimState>,
    kind: StreamType,
    null: bool,
    started: AtomicBool,
    destroyed: AtomicBool,
}

impl SimLocalTrack {
    pub(crate) fn new(state: Arc<SimState>, kind: StreamType, null: bool) -> Self {
        Self {
            state,
            kind,
            null,
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Whether a frame would be packetized right now
    pub fn is_producing(&self) -> bool {
        !self.is_destroyed() && (self.null || self.started.load(Ordering::SeqCst))
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn next_frame(&self) -> SimFrame {
        let faults = self.state.faults();
        match self.kind {
            StreamType::Audio => SimFrame::Audio(audio_frame(self.null || faults.silent_audio)),
            StreamType::Video => SimFrame::Video(video_frame(faults.black_video)),
        }
    }

    fn label(&self) -> &'static str {
        match (self.kind, self.null) {
            (StreamType::Audio, true) => "null-audio",
            (StreamType::Audio, false) => "audio",
            (StreamType::Video, _) => "video",
        }
    }
}

#[async_trait]
impl LocalTrack for SimLocalTrack {
    fn kind(&self) -> StreamType {
        self.kind
    }

    async fn start(&self) -> Result<()> {
        self.state.delay().await;
        self.state.record(format!("start:{}", self.label()));
        if self.state.faults().fail_track_start {
            bail!("{} source could not be started", self.label());
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.record(format!("stop:{}", self.label()));
        self.started.store(false, Ordering::SeqCst);
        if self.state.faults().fail_teardown {
            bail!("{} source did not stop cleanly", self.label());
        }
        Ok(())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.state.record(format!("destroy:local-{}", self.label()));
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum SimSink {
    Audio(AudioSink),
    Video(VideoSink),
}

/// Depacketizer and decoder ending in a caller-supplied sink
pub struct SimRemoteTrack {
    state: Arc<SimState>,
    sink: SimSink,
    destroyed: AtomicBool,
}

impl SimRemoteTrack {
    pub(crate) fn audio(state: Arc<SimState>, sink: AudioSink) -> Self {
        Self {
            state,
            sink: SimSink::Audio(sink),
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn video(state: Arc<SimState>, sink: VideoSink) -> Self {
        Self {
            state,
            sink: SimSink::Video(sink),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Hand a decoded frame to the sink. Returns false if nothing was raised.
    pub(crate) fn raise(&self, frame: &SimFrame) -> bool {
        if self.is_destroyed() {
            return false;
        }
        match (&self.sink, frame) {
            (SimSink::Audio(sink), SimFrame::Audio(data)) => sink(data.as_slice()),
            (SimSink::Video(sink), SimFrame::Video(buffer)) => sink(buffer),
            _ => return false,
        }
        true
    }
}

impl RemoteTrack for SimRemoteTrack {
    fn kind(&self) -> StreamType {
        match self.sink {
            SimSink::Audio(_) => StreamType::Audio,
            SimSink::Video(_) => StreamType::Video,
        }
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.state.record(format!("destroy:remote-{}", self.kind().label().to_lowercase()));
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::audio::is_live_pcm16;
    use crate::liveness::video::is_live_frame;

    #[test]
    fn test_generated_media_liveness() {
        assert!(is_live_pcm16(&audio_frame(false), 1));
        assert!(!is_live_pcm16(&audio_frame(true), 1));
        assert_eq!(audio_frame(false).len(), SAMPLES_PER_FRAME * 2);

        assert!(is_live_frame(&video_frame(false), 15));
        assert!(!is_live_frame(&video_frame(true), 15));
    }
}
