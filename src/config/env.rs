//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::HammerConfig;
use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "MEDIA_HAMMER";

/// Overrides read from `MEDIA_HAMMER_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Gateway URL from MEDIA_HAMMER_GATEWAY_URL
    pub gateway_url: Option<String>,
    /// Application id from MEDIA_HAMMER_APPLICATION_ID
    pub application_id: Option<String>,
    /// Shared secret from MEDIA_HAMMER_SHARED_SECRET
    pub shared_secret: Option<String>,
    /// Media timeout from MEDIA_HAMMER_MEDIA_TIMEOUT
    pub media_timeout: Option<u64>,
    /// Iterations from MEDIA_HAMMER_ITERATIONS
    pub iterations: Option<u32>,
    /// Config file from MEDIA_HAMMER_CONFIG
    pub config_file: Option<String>,
    /// Verbose from MEDIA_HAMMER_VERBOSE
    pub verbose: Option<bool>,
    /// Log level from MEDIA_HAMMER_LOG_LEVEL
    pub log_level: Option<LogLevel>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            gateway_url: get_env("GATEWAY_URL"),
            application_id: get_env("APPLICATION_ID"),
            shared_secret: get_env("SHARED_SECRET"),
            media_timeout: get_env_parse("MEDIA_TIMEOUT"),
            iterations: get_env_parse("ITERATIONS"),
            config_file: get_env("CONFIG"),
            verbose: get_env_bool("VERBOSE"),
            log_level: get_env("LOG_LEVEL").and_then(|v| LogLevel::parse(&v)),
        }
    }

    /// Logger level: `--verbose` or MEDIA_HAMMER_VERBOSE means debug,
    /// otherwise MEDIA_HAMMER_LOG_LEVEL, otherwise info
    pub fn log_level(&self, verbose: bool) -> LogLevel {
        let verbose = verbose || self.verbose.unwrap_or(false);
        match self.log_level {
            Some(level) if !verbose => level,
            _ => LogLevel::from_verbosity(verbose),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.gateway_url.is_some()
            || self.application_id.is_some()
            || self.shared_secret.is_some()
            || self.media_timeout.is_some()
            || self.iterations.is_some()
            || self.config_file.is_some()
            || self.verbose.is_some()
            || self.log_level.is_some()
    }

    /// Overwrite the fields of `config` that have an environment value
    pub fn apply_to(&self, config: &mut HammerConfig) {
        if let Some(url) = &self.gateway_url {
            config.gateway_url = url.clone();
        }
        if let Some(id) = &self.application_id {
            config.application_id = id.clone();
        }
        if let Some(secret) = &self.shared_secret {
            config.shared_secret = secret.clone();
        }
        if let Some(timeout) = self.media_timeout {
            config.media_timeout_secs = timeout;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.gateway_url.is_none());
        assert!(!config.has_any());
    }

    #[test]
    #[serial]
    fn test_env_overrides_config() {
        let _guard = EnvBuilder::new()
            .set("GATEWAY_URL", "https://hammer.example.com/sync")
            .set("MEDIA_TIMEOUT", "40")
            .set("ITERATIONS", "not-a-number")
            .apply_scoped();

        let env = EnvConfig::load();
        assert!(env.has_any());
        assert_eq!(env.iterations, None);

        let mut config = HammerConfig::default();
        env.apply_to(&mut config);
        assert_eq!(config.gateway_url, "https://hammer.example.com/sync");
        assert_eq!(config.media_timeout_secs, 40);
        assert_eq!(config.iterations, 1);
    }

    #[test]
    #[serial]
    fn test_env_log_level() {
        let _guard = EnvBuilder::new().set("LOG_LEVEL", "warn").apply_scoped();
        let env = EnvConfig::load();
        assert_eq!(env.log_level, Some(LogLevel::Warn));
        assert_eq!(env.log_level(false), LogLevel::Warn);
        assert_eq!(env.log_level(true), LogLevel::Debug);

        let _guard = EnvBuilder::new().set("LOG_LEVEL", "chatty").apply_scoped();
        let env = EnvConfig::load();
        assert!(env.log_level.is_none());
        assert_eq!(env.log_level(false), LogLevel::Info);
    }

    #[test]
    #[serial]
    fn test_env_bool_parsing() {
        let _guard = EnvBuilder::new().set("VERBOSE", "yes").apply_scoped();
        assert_eq!(EnvConfig::load().verbose, Some(true));
    }
}
