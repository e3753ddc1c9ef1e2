use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AnalyticsError, Result};

/// Individual telemetry sample of a recorded ride
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Seconds from activity start
    pub t: f64,

    /// Power output in watts
    #[serde(default)]
    pub power: Option<f64>,

    /// Heart rate in beats per minute
    #[serde(default)]
    pub heart_rate: Option<f64>,

    /// Cadence in revolutions per minute
    #[serde(default)]
    pub cadence: Option<f64>,

    /// Speed in meters per second
    #[serde(default)]
    pub speed: Option<f64>,
}

impl Sample {
    /// Power-only sample, used heavily by tests and benches
    pub fn with_power(t: f64, power: f64) -> Self {
        Self {
            t,
            power: Some(power),
            heart_rate: None,
            cadence: None,
            speed: None,
        }
    }
}

/// Read-only metadata describing an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMeta {
    /// Unique identifier for the activity
    pub id: String,

    /// Wall-clock start of the activity
    pub start_time: DateTime<Utc>,

    /// Elapsed duration in seconds
    #[serde(default)]
    pub duration_sec: f64,

    /// Original file name or upload source
    #[serde(default)]
    pub source: Option<String>,

    /// Recording rate as stated by the device, if known
    #[serde(default)]
    pub sample_rate_hz: Option<f64>,
}

/// An activity as delivered by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub meta: ActivityMeta,

    /// Raw, possibly unordered samples
    #[serde(default)]
    pub samples: Vec<Sample>,
}

/// Athlete thresholds used to express results relative to the rider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AthleteProfile {
    /// Functional Threshold Power (watts)
    #[serde(default)]
    pub ftp_watts: Option<f64>,

    /// Body weight in kilograms
    #[serde(default)]
    pub weight_kg: Option<f64>,

    /// Maximum heart rate
    #[serde(default)]
    pub hr_max_bpm: Option<f64>,

    /// Resting heart rate
    #[serde(default)]
    pub hr_rest_bpm: Option<f64>,
}

impl AthleteProfile {
    /// FTP if it is usable as a denominator
    pub fn ftp(&self) -> Option<f64> {
        self.ftp_watts.filter(|f| f.is_finite() && *f > 0.0)
    }

    /// Weight if it is usable as a denominator
    pub fn weight(&self) -> Option<f64> {
        self.weight_kg.filter(|w| w.is_finite() && *w > 0.0)
    }

    /// Resting and maximum heart rate, only when they describe a real reserve
    pub fn heart_rate_reserve(&self) -> Option<(f64, f64)> {
        match (self.hr_rest_bpm, self.hr_max_bpm) {
            (Some(rest), Some(max)) if rest.is_finite() && max.is_finite() && max > rest => {
                Some((rest, max))
            }
            _ => None,
        }
    }
}

/// Summary of a completed activity, the input of the adaptation optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    /// Activity identifier
    pub id: String,

    /// Calendar date the activity belongs to
    pub date: NaiveDate,

    /// Moving duration in seconds
    pub duration_sec: f64,

    /// Normalized power in watts
    #[serde(default)]
    pub normalized_power: Option<f64>,

    /// Average power in watts
    #[serde(default)]
    pub average_power: Option<f64>,

    /// Mechanical work in kilojoules, if recorded directly
    #[serde(default)]
    pub kilojoules: Option<f64>,
}

/// Document consumed by the durability and frontier analyses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityBatch {
    #[serde(default)]
    pub profile: AthleteProfile,

    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// Document consumed by the adaptation analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryBatch {
    #[serde(default)]
    pub profile: AthleteProfile,

    #[serde(default)]
    pub summaries: Vec<ActivitySummary>,
}

/// Reject blank or repeated ids; results refer back to activities by id
fn validate_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(AnalyticsError::Validation("activity id must not be blank".to_string()));
        }
        if !seen.insert(id) {
            return Err(AnalyticsError::Validation(format!("duplicate activity id '{}'", id)));
        }
    }
    Ok(())
}

impl ActivityBatch {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.activities.iter().map(|a| a.meta.id.as_str()))
    }
}

impl SummaryBatch {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.summaries.iter().map(|s| s.id.as_str()))
    }
}
