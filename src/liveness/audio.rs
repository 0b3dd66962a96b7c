//! Audio liveness
//!
//! Decoded audio is little-endian signed 16-bit PCM. A buffer is live when it
//! swings past the noise floor in both directions.

use std::sync::Arc;

use super::signal::VerificationSignal;
use super::LivenessThresholds;

/// Returns true when `min < -floor` and `max > floor`
pub fn is_live_pcm16(data: &[u8], noise_floor: i16) -> bool {
    let mut samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]));

    let Some(first) = samples.next() else {
        return false;
    };
    let (min, max) = samples.fold((first, first), |(min, max), s| (min.min(s), max.max(s)));

    i32::from(min) < -i32::from(noise_floor) && i32::from(max) > i32::from(noise_floor)
}

/// Sink-side probe that flips a signal on the first live buffer
#[derive(Clone)]
pub struct AudioLivenessProbe {
    signal: Arc<VerificationSignal>,
    noise_floor: i16,
}

impl AudioLivenessProbe {
    pub fn new(signal: Arc<VerificationSignal>, thresholds: &LivenessThresholds) -> Self {
        Self {
            signal,
            noise_floor: thresholds.audio_noise_floor,
        }
    }

    pub fn observe(&self, data: &[u8]) {
        if self.signal.is_set() {
            return;
        }
        if is_live_pcm16(data, self.noise_floor) {
            self.signal.set();
        }
    }
}
