//! Media liveness verification
//!
//! Probes attached to remote sinks inspect decoded samples and flip a
//! [`VerificationSignal`] the first time a stream carries real signal.
//! The orchestrator's verify stage waits on those signals.

pub(crate) mod audio;
mod signal;
pub(crate) mod video;

pub use audio::AudioLivenessProbe;
pub use signal::{FrameCounters, VerificationSignal};
pub use video::{VideoBuffer, VideoLivenessProbe};

use serde::{Deserialize, Serialize};

/// Sample excursion that separates audio from quantization noise
pub const DEFAULT_AUDIO_NOISE_FLOOR: i16 = 1;

/// Brightest-channel value at or below which a frame counts as black
pub const DEFAULT_VIDEO_BLACK_LEVEL: u8 = 15;

/// Thresholds used by the liveness probes. Tuned against the fake media
/// generators, so keep them overridable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessThresholds {
    pub audio_noise_floor: i16,
    pub video_black_level: u8,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            audio_noise_floor: DEFAULT_AUDIO_NOISE_FLOOR,
            video_black_level: DEFAULT_VIDEO_BLACK_LEVEL,
        }
    }
}
