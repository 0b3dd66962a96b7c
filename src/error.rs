//! Error taxonomy for test iterations
//!
//! Every stage of an iteration translates collaborator faults into one of
//! these kinds. Cancellation has its own variant and is never reported as a
//! stage failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::executor::FanOutError;
use crate::models::StreamType;

pub type Result<T> = std::result::Result<T, HammerError>;

/// Errors surfaced by an iteration
#[derive(Error, Debug)]
pub enum HammerError {
    #[error("{message}")]
    ClientRegister {
        message: String,
        #[source]
        source: FanOutError,
    },

    #[error("{message}")]
    ChannelJoin {
        message: String,
        #[source]
        source: FanOutError,
    },

    #[error("{message}")]
    TrackStart {
        message: String,
        #[source]
        source: FanOutError,
    },

    #[error("{message}")]
    ConnectionOpen {
        message: String,
        #[source]
        source: FanOutError,
    },

    #[error("{message}")]
    MediaStreamFailed {
        stream: StreamType,
        participant: usize,
        sent: u64,
        received: u64,
        message: String,
    },

    #[error("Connection connected to Media Server {actual} instead of preferred Media Server {expected}.")]
    MediaServerMismatch { expected: String, actual: String },

    #[error("Media servers could not be listed: {0}")]
    Discovery(#[source] anyhow::Error),

    #[error("Operation was cancelled.")]
    Cancelled,
}

impl HammerError {
    pub fn client_register(message: impl Into<String>, source: FanOutError) -> Self {
        Self::cancelled_or(source, |source| HammerError::ClientRegister {
            message: message.into(),
            source,
        })
    }

    pub fn channel_join(message: impl Into<String>, source: FanOutError) -> Self {
        Self::cancelled_or(source, |source| HammerError::ChannelJoin {
            message: message.into(),
            source,
        })
    }

    pub fn track_start(message: impl Into<String>, source: FanOutError) -> Self {
        Self::cancelled_or(source, |source| HammerError::TrackStart {
            message: message.into(),
            source,
        })
    }

    pub fn connection_open(message: impl Into<String>, source: FanOutError) -> Self {
        Self::cancelled_or(source, |source| HammerError::ConnectionOpen {
            message: message.into(),
            source,
        })
    }

    /// A cancelled fan-out is never reported as a stage failure
    fn cancelled_or(source: FanOutError, wrap: impl FnOnce(FanOutError) -> Self) -> Self {
        match source {
            FanOutError::Cancelled => HammerError::Cancelled,
            source => wrap(source),
        }
    }

    pub fn media_stream_failed(
        stream: StreamType,
        participant: usize,
        sent: u64,
        received: u64,
    ) -> Self {
        let message = format!(
            "{} stream #{participant} failed. Sent: {sent} frames, but received {received} frames.",
            stream.label()
        );
        HammerError::MediaStreamFailed {
            stream,
            participant,
            sent,
            received,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HammerError::ClientRegister { .. } => ErrorKind::ClientRegister,
            HammerError::ChannelJoin { .. } => ErrorKind::ChannelJoin,
            HammerError::TrackStart { .. } => ErrorKind::TrackStart,
            HammerError::ConnectionOpen { .. } => ErrorKind::ConnectionOpen,
            HammerError::MediaStreamFailed { .. } => ErrorKind::MediaStreamFailed,
            HammerError::MediaServerMismatch { .. } => ErrorKind::MediaServerMismatch,
            HammerError::Discovery(_) => ErrorKind::Discovery,
            HammerError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, HammerError::Cancelled)
    }

    /// Message with the full source chain appended
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            detail.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        detail
    }
}

/// Serializable error classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClientRegister,
    ChannelJoin,
    TrackStart,
    ConnectionOpen,
    MediaStreamFailed,
    MediaServerMismatch,
    Discovery,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ClientRegister => "client-register",
            ErrorKind::ChannelJoin => "channel-join",
            ErrorKind::TrackStart => "track-start",
            ErrorKind::ConnectionOpen => "connection-open",
            ErrorKind::MediaStreamFailed => "media-stream-failed",
            ErrorKind::MediaServerMismatch => "media-server-mismatch",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stage_passes_cancellation_through() {
        let err = HammerError::client_register(
            "One or more clients could not be registered.",
            FanOutError::Cancelled,
        );
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_stage_keeps_kind_and_source() {
        let err = HammerError::channel_join(
            "One or more channels could not be joined.",
            FanOutError::Faulted(vec![anyhow::anyhow!("channel full")]),
        );
        assert_eq!(err.kind(), ErrorKind::ChannelJoin);
        assert_eq!(err.to_string(), "One or more channels could not be joined.");
        assert!(err.detail().contains("channel full"));
    }

    #[test]
    fn test_timed_out_stage_is_failure() {
        let err = HammerError::connection_open(
            "Connection could not be opened.",
            FanOutError::TimedOut(Duration::from_secs(5)),
        );
        assert!(!err.is_cancelled());
        assert_eq!(err.kind(), ErrorKind::ConnectionOpen);
    }

    #[test]
    fn test_media_stream_message() {
        let err = HammerError::media_stream_failed(StreamType::Video, 2, 90, 0);
        assert_eq!(
            err.to_string(),
            "Video stream #2 failed. Sent: 90 frames, but received 0 frames."
        );
        assert_eq!(err.kind(), ErrorKind::MediaStreamFailed);
    }
}
