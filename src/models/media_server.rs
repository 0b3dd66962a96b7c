//! Media server (target cluster member) descriptions

use serde::{Deserialize, Serialize};

/// A media-routing node as reported by the cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaServerInfo {
    pub id: String,
    pub available: bool,
    pub active: bool,
    pub over_capacity: bool,
    pub used_capacity: f64,
    pub draining: bool,
}

impl MediaServerInfo {
    /// A healthy, idle server
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            available: true,
            active: true,
            over_capacity: false,
            used_capacity: 0.0,
            draining: false,
        }
    }

    /// Why this server cannot be scanned, if it cannot
    pub fn skip_reason(&self) -> Option<String> {
        if !self.available {
            Some(format!("Media Server {} is not available.", self.id))
        } else if !self.active {
            Some(format!("Media Server {} is not active.", self.id))
        } else if self.draining {
            Some(format!("Media Server {} is draining.", self.id))
        } else if self.over_capacity {
            Some(format!("Media Server {} is over capacity.", self.id))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_server_is_scannable() {
        assert!(MediaServerInfo::new("ms-1").skip_reason().is_none());
    }

    #[test]
    fn test_skip_reasons() {
        let mut server = MediaServerInfo::new("ms-2");
        server.draining = true;
        assert_eq!(
            server.skip_reason().as_deref(),
            Some("Media Server ms-2 is draining.")
        );

        server.available = false;
        assert!(server.skip_reason().unwrap().contains("not available"));
    }
}
