use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::adaptation::AdaptationConfig;
use crate::durability::DurabilityConfig;
use crate::efficiency::EfficiencyConfig;
use crate::error::{AnalyticsError, CalculationError};
use crate::frontier::FrontierConfig;
use crate::logging::LogConfig;
use crate::repeatability::RepeatabilityConfig;
use crate::zones::ZoneStreakConfig;

/// Main analytics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Duration/power and throughput frontier settings
    pub frontier: FrontierConfig,

    /// Durability segments and fatigue grid
    pub durability: DurabilityConfig,

    /// Efficiency window filters
    pub efficiency: EfficiencyConfig,

    /// Interval repeatability targets
    pub repeatability: RepeatabilityConfig,

    /// Zone-dwell streak settings
    pub zones: ZoneStreakConfig,

    /// Adaptation edge window lengths
    pub adaptation: AdaptationConfig,

    /// Response shaping
    pub output: OutputConfig,

    /// Input bounds
    pub limits: LimitsConfig,

    /// Fan-out and merge behaviour
    pub execution: ExecutionConfig,

    /// Logging setup used by the CLI
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Upper bound on points in a downsampled ride series
    pub max_series_points: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { max_series_points: 600 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Activities with more samples are skipped (48 h at 1 Hz by default)
    pub max_samples_per_activity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_samples_per_activity: 172_800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Analyze activities on the rayon pool
    pub parallel: bool,

    /// Attempts made by a snapshot merge before giving up
    pub max_merge_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_merge_retries: 5,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            metadata: ConfigMetadata::default(),
            frontier: FrontierConfig::default(),
            durability: DurabilityConfig::default(),
            efficiency: EfficiencyConfig::default(),
            repeatability: RepeatabilityConfig::default(),
            zones: ZoneStreakConfig::default(),
            adaptation: AdaptationConfig::default(),
            output: OutputConfig::default(),
            limits: LimitsConfig::default(),
            execution: ExecutionConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

fn invalid(calculation: &str, parameter: &str, value: impl ToString) -> AnalyticsError {
    AnalyticsError::Calculation(CalculationError::InvalidParameter {
        calculation: calculation.to_string(),
        parameter: parameter.to_string(),
        value: value.to_string(),
    })
}

fn require_non_empty<T>(
    values: &[T],
    calculation: &str,
    parameter: &str,
) -> crate::error::Result<()> {
    if values.is_empty() {
        return Err(AnalyticsError::Configuration(format!(
            "{calculation}.{parameter} must not be empty"
        )));
    }
    Ok(())
}

fn require_positive(
    values: &[u32],
    calculation: &str,
    parameter: &str,
) -> crate::error::Result<()> {
    require_non_empty(values, calculation, parameter)?;
    match values.iter().find(|v| **v == 0) {
        Some(zero) => Err(invalid(calculation, parameter, zero)),
        None => Ok(()),
    }
}

fn require_fraction(value: f64, calculation: &str, parameter: &str) -> crate::error::Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(calculation, parameter, value))
    }
}

impl AnalyticsConfig {
    /// Reject configurations the analytics cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        require_positive(&self.frontier.durations_sec, "frontier", "durations_sec")?;
        require_positive(
            &self.frontier.throughput_windows_sec,
            "frontier",
            "throughput_windows_sec",
        )?;

        let d = &self.durability;
        require_fraction(d.early_fraction, "durability", "early_fraction")?;
        require_fraction(d.late_fraction, "durability", "late_fraction")?;
        if d.early_fraction > d.late_fraction {
            return Err(AnalyticsError::Configuration(format!(
                "durability.early_fraction ({}) exceeds late_fraction ({})",
                d.early_fraction, d.late_fraction
            )));
        }
        if d.late_effort_sec == 0 {
            return Err(invalid("durability", "late_effort_sec", 0));
        }
        require_non_empty(&d.fatigue_kj, "durability", "fatigue_kj")?;
        require_positive(&d.fatigue_durations_sec, "durability", "fatigue_durations_sec")?;

        let e = &self.efficiency;
        require_positive(&e.durations_sec, "efficiency", "durations_sec")?;
        if e.stride_sec == 0 {
            return Err(invalid("efficiency", "stride_sec", 0));
        }
        require_fraction(e.min_cadence_coverage, "efficiency", "min_cadence_coverage")?;
        require_fraction(e.min_moving_coverage, "efficiency", "min_moving_coverage")?;
        require_fraction(e.min_hr_coverage, "efficiency", "min_hr_coverage")?;

        let r = &self.repeatability;
        require_non_empty(&r.targets, "repeatability", "targets")?;
        for target in &r.targets {
            if target.min_pct > target.max_pct
                || target.min_duration_sec > target.max_duration_sec
            {
                return Err(AnalyticsError::Configuration(format!(
                    "repeatability target '{}' has inverted bounds",
                    target.key
                )));
            }
        }
        if r.min_rest_ratio > r.max_rest_ratio {
            return Err(invalid("repeatability", "min_rest_ratio", r.min_rest_ratio));
        }

        let z = &self.zones;
        require_non_empty(&z.zones, "zones", "zones")?;
        if let Some(zone) = z.zones.iter().find(|zone| zone.min_pct >= zone.max_pct) {
            return Err(AnalyticsError::Configuration(format!(
                "zone '{}' has inverted bounds",
                zone.key
            )));
        }
        if z.smoothing_sec <= 0.0 {
            return Err(invalid("zones", "smoothing_sec", z.smoothing_sec));
        }
        require_fraction(z.tolerance, "zones", "tolerance")?;

        require_positive(&self.adaptation.window_days, "adaptation", "window_days")?;

        if self.output.max_series_points == 0 {
            return Err(invalid("output", "max_series_points", 0));
        }
        if self.limits.max_samples_per_activity == 0 {
            return Err(invalid("limits", "max_samples_per_activity", 0));
        }
        if self.execution.max_merge_retries == 0 {
            return Err(invalid("execution", "max_merge_retries", 0));
        }
        Ok(())
    }

    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AnalyticsConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ridelab")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %err,
                    "Using default configuration"
                );
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to_file(config_path)
    }
}
