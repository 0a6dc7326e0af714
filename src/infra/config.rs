//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/dev.toml). A missing or unparsable file falls back
//! to defaults with a warning.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct FacilityConfig {
    /// Unique facility identifier (e.g. "clubhouse")
    #[serde(default = "default_facility_id")]
    pub id: String,
    /// Maximum occupancy for utilization reporting
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_facility_id() -> String {
    "clubhouse".to_string()
}

fn default_capacity() -> u32 {
    225
}

impl Default for FacilityConfig {
    fn default() -> Self {
        Self { id: default_facility_id(), capacity: default_capacity() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    /// Path to the member roster TOML file
    #[serde(default = "default_roster_file")]
    pub file: String,
}

fn default_roster_file() -> String {
    "config/roster.toml".to_string()
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self { file: default_roster_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Idle wait between capture iterations (ms)
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Match event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Enable the TCP sensor bridge
    #[serde(default = "default_sensor_listener_enabled")]
    pub sensor_listener_enabled: bool,
    /// TCP sensor bridge port
    #[serde(default = "default_sensor_listener_port")]
    pub sensor_listener_port: u16,
}

fn default_idle_interval_ms() -> u64 {
    1000
}

fn default_event_buffer() -> usize {
    64
}

fn default_sensor_listener_enabled() -> bool {
    true
}

fn default_sensor_listener_port() -> u16 {
    25901
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            event_buffer: default_event_buffer(),
            sensor_listener_enabled: default_sensor_listener_enabled(),
            sensor_listener_port: default_sensor_listener_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    /// Minimum similarity score for a template to verify
    #[serde(default = "default_match_threshold")]
    pub threshold: f64,
}

fn default_match_threshold() -> f64 {
    0.85
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { threshold: default_match_threshold() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyConfig {
    /// Maximum snapshot age before recompute (seconds)
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

fn default_freshness_secs() -> u64 {
    10
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self { freshness_secs: default_freshness_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoCheckoutConfig {
    #[serde(default = "default_auto_checkout_enabled")]
    pub enabled: bool,
    /// How long shutdown waits for an in-flight sweep (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_auto_checkout_enabled() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for AutoCheckoutConfig {
    fn default() -> Self {
        Self {
            enabled: default_auto_checkout_enabled(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// File path for the attendance audit trail (JSONL format)
    #[serde(default = "default_audit_file")]
    pub file: String,
}

fn default_audit_file() -> String {
    "attendance.jsonl".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { file: default_audit_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Interval for the periodic metrics summary log (seconds)
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Operational HTTP port (0 to disable)
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_http_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), http_port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub facility: FacilityConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default)]
    pub auto_checkout: AutoCheckoutConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    facility_id: String,
    capacity: u32,
    roster_file: String,
    idle_interval_ms: u64,
    event_buffer: usize,
    sensor_listener_enabled: bool,
    sensor_listener_port: u16,
    match_threshold: f64,
    freshness_secs: u64,
    auto_checkout_enabled: bool,
    shutdown_grace_secs: u64,
    audit_file: String,
    metrics_interval_secs: u64,
    http_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            facility_id: toml_config.facility.id,
            capacity: toml_config.facility.capacity,
            roster_file: toml_config.roster.file,
            idle_interval_ms: toml_config.capture.idle_interval_ms,
            event_buffer: toml_config.capture.event_buffer,
            sensor_listener_enabled: toml_config.capture.sensor_listener_enabled,
            sensor_listener_port: toml_config.capture.sensor_listener_port,
            match_threshold: toml_config.matcher.threshold,
            freshness_secs: toml_config.occupancy.freshness_secs,
            auto_checkout_enabled: toml_config.auto_checkout.enabled,
            shutdown_grace_secs: toml_config.auto_checkout.shutdown_grace_secs,
            audit_file: toml_config.audit.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            http_port: toml_config.metrics.http_port,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn facility_id(&self) -> &str {
        &self.facility_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn roster_file(&self) -> &str {
        &self.roster_file
    }

    pub fn idle_interval_ms(&self) -> u64 {
        self.idle_interval_ms
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    pub fn sensor_listener_enabled(&self) -> bool {
        self.sensor_listener_enabled
    }

    pub fn sensor_listener_port(&self) -> u16 {
        self.sensor_listener_port
    }

    pub fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    pub fn freshness_secs(&self) -> u64 {
        self.freshness_secs
    }

    pub fn auto_checkout_enabled(&self) -> bool {
        self.auto_checkout_enabled
    }

    pub fn shutdown_grace_secs(&self) -> u64 {
        self.shutdown_grace_secs
    }

    pub fn audit_file(&self) -> &str {
        &self.audit_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the capture idle interval
    #[cfg(test)]
    pub fn with_idle_interval_ms(mut self, ms: u64) -> Self {
        self.idle_interval_ms = ms;
        self
    }

    /// Builder method for tests to set the occupancy freshness window
    #[cfg(test)]
    pub fn with_freshness_secs(mut self, secs: u64) -> Self {
        self.freshness_secs = secs;
        self
    }
}
