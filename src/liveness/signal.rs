//! Verification signals and frame counters
//!
//! A [`VerificationSignal`] flips from unset to set exactly once; later
//! attempts are no-ops. [`FrameCounters`] are bumped from media callbacks and
//! only feed diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Single-write completion flag observable by waiters
#[derive(Debug)]
pub struct VerificationSignal {
    state: watch::Sender<bool>,
}

impl VerificationSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Set the flag. Returns true only for the call that set it.
    pub fn set(&self) -> bool {
        self.state.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the flag is set
    pub async fn wait(&self) {
        let mut receiver = self.state.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = receiver.wait_for(|set| *set).await;
    }
}

impl Default for VerificationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stream send/receive frame counters
#[derive(Debug, Default)]
pub struct FrameCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl FrameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}
