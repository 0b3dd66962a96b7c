//! Configuration module
//!
//! Loads the run configuration from JSON or YAML, with environment and
//! command-line overrides applied on top.

mod env;

pub use env::EnvConfig;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::liveness::LivenessThresholds;
use crate::models::Scenario;
use crate::session::ClientSpec;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./media-hammer.yaml",
    "./media-hammer.yml",
    "./media-hammer.json",
    "~/.config/media-hammer/config.yaml",
];

/// Identity of one simulated participant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub region: Option<String>,
}

/// Placeholder printed instead of secrets
pub const REDACTED: &str = "********";

/// Run configuration. Read-only once a run starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HammerConfig {
    /// Gateway (signaling) URL
    pub gateway_url: String,

    /// Application identity
    pub application_id: String,

    /// Shared secret used to sign register and join tokens
    pub shared_secret: String,

    /// Client tag attached to scan clients
    pub tag: Option<String>,

    /// Cluster test participants (two are used)
    pub participants: Vec<ParticipantConfig>,

    /// Seconds to wait for media liveness
    pub media_timeout_secs: u64,

    /// Hard deadline for register/join/start/open stages, in seconds
    pub stage_timeout_secs: Option<u64>,

    /// Bound on each teardown step, in seconds
    pub teardown_timeout_secs: Option<u64>,

    /// Number of cluster iterations
    pub iterations: u32,

    /// Pause between cluster iterations, in milliseconds
    pub iteration_interval_ms: u64,

    /// Scenarios excluded from the scan matrix
    pub skip_scenarios: Vec<Scenario>,

    /// Restrict scans to these media servers (empty = all)
    pub media_server_ids: Vec<String>,

    /// Liveness thresholds
    pub liveness: LivenessThresholds,
}

impl Default for HammerConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:8080/sync".to_string(),
            application_id: "media-hammer".to_string(),
            shared_secret: "local-development-secret".to_string(),
            tag: None,
            participants: vec![ParticipantConfig::default(), ParticipantConfig::default()],
            media_timeout_secs: 15,
            stage_timeout_secs: None,
            teardown_timeout_secs: Some(30),
            iterations: 1,
            iteration_interval_ms: 0,
            skip_scenarios: Vec::new(),
            media_server_ids: Vec::new(),
            liveness: LivenessThresholds::default(),
        }
    }
}

impl HammerConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from `path`, the first standard location, or defaults
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.gateway_url.starts_with("http://") || self.gateway_url.starts_with("https://")) {
            bail!("gateway_url must be an http(s) URL, got '{}'", self.gateway_url);
        }
        if self.application_id.trim().is_empty() {
            bail!("application_id must not be empty");
        }
        if self.shared_secret.is_empty() {
            bail!("shared_secret must not be empty");
        }
        if self.media_timeout_secs == 0 {
            bail!("media_timeout_secs must be greater than zero");
        }
        if self.iterations == 0 {
            bail!("iterations must be greater than zero");
        }
        if Scenario::all().into_iter().all(|s| !self.should_test(s)) {
            tracing::warn!("every scan scenario is excluded by configuration");
        }
        Ok(())
    }

    /// Copy safe to print: the shared secret is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.shared_secret.is_empty() {
            config.shared_secret = REDACTED.to_string();
        }
        config
    }

    pub fn should_test(&self, scenario: Scenario) -> bool {
        !self.skip_scenarios.contains(&scenario)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    pub fn teardown_timeout(&self) -> Option<Duration> {
        self.teardown_timeout_secs.map(Duration::from_secs)
    }

    pub fn iteration_interval(&self) -> Duration {
        Duration::from_millis(self.iteration_interval_ms)
    }

    /// Client identity for participant `index` (0-based)
    pub fn participant_spec(&self, index: usize) -> ClientSpec {
        let participant = self.participants.get(index).cloned().unwrap_or_default();
        ClientSpec {
            gateway_url: self.gateway_url.clone(),
            application_id: self.application_id.clone(),
            user_id: participant.user_id,
            device_id: participant.device_id,
            region: participant.region,
            tag: self.tag.clone(),
        }
    }

    /// Anonymous client identity used by scans
    pub fn scan_spec(&self) -> ClientSpec {
        ClientSpec {
            gateway_url: self.gateway_url.clone(),
            application_id: self.application_id.clone(),
            tag: self.tag.clone(),
            ..ClientSpec::default()
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = HammerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.media_timeout(), Duration::from_secs(15));
        assert_eq!(config.participants.len(), 2);
        assert!(config.stage_timeout().is_none());
    }

    #[test]
    fn test_validation_errors() {
        let config = HammerConfig {
            gateway_url: "ws://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HammerConfig {
            iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HammerConfig {
            shared_secret: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_masks_secret_only() {
        let config = HammerConfig {
            shared_secret: "hunter2".to_string(),
            ..Default::default()
        };
        let shown = config.redacted();
        assert_eq!(shown.shared_secret, REDACTED);
        assert_eq!(shown.gateway_url, config.gateway_url);
        assert_eq!(config.shared_secret, "hunter2");

        let yaml = serde_yaml::to_string(&shown).unwrap();
        assert!(!yaml.contains("hunter2"));

        let unset = HammerConfig {
            shared_secret: String::new(),
            ..Default::default()
        };
        assert!(unset.redacted().shared_secret.is_empty());
    }

    #[test]
    fn test_should_test() {
        let config = HammerConfig {
            skip_scenarios: vec![Scenario::Stun, Scenario::TurnTcp],
            ..Default::default()
        };
        assert!(config.should_test(Scenario::Host));
        assert!(!config.should_test(Scenario::Stun));
        assert!(!config.should_test(Scenario::TurnTcp));
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hammer.yaml");
        let config = HammerConfig {
            tag: Some("nightly".to_string()),
            skip_scenarios: vec![Scenario::Turns],
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = HammerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hammer.json");
        std::fs::write(
            &path,
            r#"{"gateway_url": "https://cluster.example.com/sync", "skip_scenarios": ["turn-udp"],
                "liveness": {"video_black_level": 20}}"#,
        )
        .unwrap();

        let loaded = HammerConfig::load(&path).unwrap();
        assert_eq!(loaded.gateway_url, "https://cluster.example.com/sync");
        assert_eq!(loaded.skip_scenarios, vec![Scenario::TurnUdp]);
        assert_eq!(loaded.liveness.video_black_level, 20);
        assert_eq!(loaded.liveness.audio_noise_floor, 1);
        assert_eq!(loaded.iterations, 1);
    }

    #[test]
    fn test_participant_spec() {
        let config = HammerConfig {
            participants: vec![ParticipantConfig {
                user_id: Some("alice".to_string()),
                device_id: Some("loadgen-1".to_string()),
                region: Some("us-east".to_string()),
            }],
            ..Default::default()
        };
        let first = config.participant_spec(0);
        assert_eq!(first.user_id.as_deref(), Some("alice"));
        assert_eq!(first.region.as_deref(), Some("us-east"));

        let missing = config.participant_spec(1);
        assert!(missing.user_id.is_none());
        assert_eq!(missing.application_id, "media-hammer");
    }
}
