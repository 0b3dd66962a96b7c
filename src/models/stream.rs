//! Media stream kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media carried by a stream or track
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Audio,
    Video,
}

impl StreamType {
    pub fn label(&self) -> &'static str {
        match self {
            StreamType::Audio => "Audio",
            StreamType::Video => "Video",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
