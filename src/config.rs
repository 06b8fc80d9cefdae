//! Configuration loading for one hexapod stage
//!
//! YAML configuration with optional sections; accessors fall back to the
//! driver defaults so a minimal file only needs the stage name and address.

use crate::poses::DEFAULT_TOLERANCE;
use crate::session::MotionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Fallback controller port when the stage name has no static assignment.
pub const DEFAULT_CONTROLLER_PORT: u16 = 50000;

/// Per-unit static port assignments used by the reference deployment.
pub fn default_port_for_stage(name: &str) -> Option<u16> {
    match name {
        "A" => Some(10),
        "B" => Some(20),
        "C" => Some(30),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageConfig {
    pub stage: StageSettings,
    pub motion: Option<MotionSettings>,
    pub telemetry: Option<TelemetrySettings>,
    pub poses: Option<PoseTableSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageSettings {
    /// Unit name, e.g. "A"; drives the default port assignment.
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub link: Option<LinkMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    Tcp,
    Sim,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionSettings {
    pub poll_interval_ms: Option<u64>,
    pub completion_timeout_s: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetrySettings {
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoseTableSettings {
    pub path: Option<String>,
    pub tolerance: Option<f64>,
}

impl StageConfig {
    pub fn load_from_path(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: StageConfig =
            serde_yaml::from_str(contents).context("failed to parse stage configuration")?;
        Ok(config)
    }

    /// Controller port: explicit value, then the per-unit static assignment,
    /// then the common default.
    pub fn port(&self) -> u16 {
        self.stage
            .port
            .or_else(|| default_port_for_stage(&self.stage.name))
            .unwrap_or(DEFAULT_CONTROLLER_PORT)
    }

    pub fn link_mode(&self) -> LinkMode {
        self.stage.link.unwrap_or(LinkMode::Tcp)
    }

    pub fn motion_config(&self) -> MotionConfig {
        let defaults = MotionConfig::default();
        let Some(motion) = &self.motion else {
            return defaults;
        };
        MotionConfig {
            poll_interval: motion
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            completion_timeout: motion
                .completion_timeout_s
                .map(Duration::from_secs)
                .unwrap_or(defaults.completion_timeout),
        }
    }

    pub fn telemetry_interval(&self) -> Duration {
        self.telemetry
            .as_ref()
            .and_then(|t| t.interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(crate::telemetry::DEFAULT_INTERVAL)
    }

    pub fn pose_table_path(&self) -> Option<&str> {
        self.poses.as_ref().and_then(|p| p.path.as_deref())
    }

    pub fn resolver_tolerance(&self) -> f64 {
        self.poses
            .as_ref()
            .and_then(|p| p.tolerance)
            .unwrap_or(DEFAULT_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = StageConfig::load_from_str(
            "stage:\n  name: \"A\"\n  address: \"192.168.100.20\"\n",
        )
        .unwrap();

        assert_eq!(config.port(), 10);
        assert_eq!(config.link_mode(), LinkMode::Tcp);
        assert_eq!(
            config.motion_config().poll_interval,
            Duration::from_millis(50)
        );
        assert_eq!(config.telemetry_interval(), Duration::from_millis(100));
        assert_eq!(config.resolver_tolerance(), DEFAULT_TOLERANCE);
        assert!(config.pose_table_path().is_none());
    }

    #[test]
    fn per_unit_port_assignments() {
        for (name, port) in [("A", 10), ("B", 20), ("C", 30)] {
            assert_eq!(default_port_for_stage(name), Some(port));
        }
        assert_eq!(default_port_for_stage("D"), None);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = StageConfig::load_from_str(
            "stage:
  name: \"B\"
  address: \"10.0.0.5\"
  port: 50000
  link: sim
motion:
  poll_interval_ms: 25
  completion_timeout_s: 120
telemetry:
  interval_ms: 250
poses:
  path: \"config/poses.yaml\"
  tolerance: 0.01
",
        )
        .unwrap();

        assert_eq!(config.port(), 50000);
        assert_eq!(config.link_mode(), LinkMode::Sim);
        let motion = config.motion_config();
        assert_eq!(motion.poll_interval, Duration::from_millis(25));
        assert_eq!(motion.completion_timeout, Duration::from_secs(120));
        assert_eq!(config.telemetry_interval(), Duration::from_millis(250));
        assert_eq!(config.pose_table_path(), Some("config/poses.yaml"));
        assert!((config.resolver_tolerance() - 0.01).abs() < 1e-12);
    }
}
