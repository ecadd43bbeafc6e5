//! swarmscale.toml configuration parser.
//!
//! Every key is optional; missing sections and keys fall back to the
//! built-in defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use swarmscale_state::{DEFAULT_HIGH_MEM_THRESHOLD, DEFAULT_LOW_MEM_THRESHOLD, ThresholdLimits};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub docker: DockerConfig,
    pub autoscale: AutoscaleConfig,
    pub telemetry: TelemetryConfig,
    pub thresholds: ThresholdDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub request_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub poll_interval_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_secs: u64,
    pub stats_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            stats_timeout_secs: 5,
            channel_capacity: 16,
        }
    }
}

/// Thresholds written for services that have none at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdDefaults {
    pub default_low: u8,
    pub default_high: u8,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            default_low: DEFAULT_LOW_MEM_THRESHOLD,
            default_high: DEFAULT_HIGH_MEM_THRESHOLD,
        }
    }
}

impl ThresholdDefaults {
    pub fn limits(&self) -> ThresholdLimits {
        ThresholdLimits::new(self.default_low, self.default_high)
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.docker.request_timeout_secs == 0 {
            bail!("docker.request_timeout_secs must be positive");
        }
        if self.autoscale.poll_interval_secs == 0 {
            bail!("autoscale.poll_interval_secs must be positive");
        }
        if self.telemetry.interval_secs == 0 {
            bail!("telemetry.interval_secs must be positive");
        }
        if self.telemetry.stats_timeout_secs == 0 {
            bail!("telemetry.stats_timeout_secs must be positive");
        }
        if self.telemetry.channel_capacity == 0 {
            bail!("telemetry.channel_capacity must be positive");
        }
        self.thresholds
            .limits()
            .validate()
            .context("invalid [thresholds] defaults")?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.docker.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.autoscale.poll_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.autoscale.cooldown_secs)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.interval_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry.stats_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.telemetry_interval(), Duration::from_secs(3));
        assert_eq!(config.stats_timeout(), Duration::from_secs(5));
        assert_eq!(config.telemetry.channel_capacity, 16);
        assert_eq!(config.thresholds.limits(), ThresholdLimits::new(20, 80));
        config.validate().unwrap();
    }

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(DaemonConfig::from_toml("").unwrap(), DaemonConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
[autoscale]
cooldown_secs = 120

[thresholds]
default_high = 90
"#,
        )
        .unwrap();
        assert_eq!(config.autoscale.cooldown_secs, 120);
        assert_eq!(config.autoscale.poll_interval_secs, 10);
        assert_eq!(config.thresholds.default_low, 20);
        assert_eq!(config.thresholds.default_high, 90);
        assert_eq!(config.telemetry, TelemetryConfig::default());
    }

    #[test]
    fn zero_interval_rejected() {
        let err = DaemonConfig::from_toml("[telemetry]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn docker_request_timeout_is_configurable() {
        let config = DaemonConfig::from_toml("[docker]\nrequest_timeout_secs = 8\n").unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.autoscale, AutoscaleConfig::default());

        let err = DaemonConfig::from_toml("[docker]\nrequest_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn inverted_threshold_defaults_rejected() {
        let toml = "[thresholds]\ndefault_low = 90\ndefault_high = 10\n";
        assert!(DaemonConfig::from_toml(toml).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[telemetry]\nchannel_capacity = 4").unwrap();

        let config = DaemonConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.telemetry.channel_capacity, 4);
    }

    #[test]
    fn load_without_path_is_defaults() {
        assert_eq!(DaemonConfig::load(None).unwrap(), DaemonConfig::default());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DaemonConfig::from_file(&dir.path().join("absent.toml")).is_err());
    }
}
