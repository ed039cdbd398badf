//! Configuration loading for the engine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::simulation::handover::HandoverStrategy;
use crate::simulation::link_quality::LinkMetrics;
use crate::simulation::scheduler::SchedulerSettings;

/// Engine tuning read from `config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Wall-clock sleep between advance-loop iterations (ms)
    pub polling_interval_ms: u64,
    /// Upper bound between continuous re-evaluation passes (ms)
    pub reevaluation_interval_ms: u64,
    /// Simulated seconds per mobility tick
    pub step: f64,
    /// Simulated clock speed relative to wall time (1-1000 %)
    pub speed_percent: u32,
    /// Log directives instead of executing them
    pub dry_run: bool,
    /// Prefix executed commands with sudo
    pub use_sudo: bool,
    pub link_metrics: LinkMetrics,
    pub handover: HandoverStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 10,
            reevaluation_interval_ms: 100,
            step: 1.0,
            speed_percent: 100,
            dry_run: false,
            use_sudo: false,
            link_metrics: LinkMetrics::default(),
            handover: HandoverStrategy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Returns
    /// * `Ok(EngineConfig)` if the file was successfully loaded, parsed and validated
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::parse(&content)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(config_path: &Path) -> Result<Self, String> {
        if !config_path.exists() {
            log::info!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        Self::load(config_path)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.polling_interval_ms == 0 {
            return Err("polling-interval-ms must be positive".to_string());
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(format!("step must be a positive number of seconds, got {}", self.step));
        }
        if !(1..=1000).contains(&self.speed_percent) {
            return Err(format!("speed-percent {} outside 1-1000", self.speed_percent));
        }
        let metrics = &self.link_metrics;
        if metrics.bandwidth_floor_mbit <= 0.0 {
            return Err("link-metrics.bandwidth-floor-mbit must be positive".to_string());
        }
        if metrics.bandwidth_decay < 1.0 {
            return Err("link-metrics.bandwidth-decay must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            polling_interval: Duration::from_millis(self.polling_interval_ms),
            reevaluation_interval: Duration::from_millis(self.reevaluation_interval_ms),
            step: self.step,
            speed_percent: self.speed_percent,
        }
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &str) -> PathBuf {
        let scene = Path::new(scene_path);
        scene.parent().unwrap_or(Path::new(".")).join("config.toml")
    }
}
