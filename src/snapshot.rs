//! Snapshot summaries and the per-user analytics record
//!
//! Each analysis response condenses into a small snapshot. Snapshots of
//! different kinds are merged into one [`AnalyticsRecord`] per user through a
//! [`RecordStore`] that only accepts a write when the version it was based on
//! is still current; [`merge_snapshot`] re-reads and retries on conflict.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::adaptation::AdaptationBlock;
use crate::analysis::{
    AdaptationEdgesResponse, DurabilityAnalysisResponse, TrainingFrontiersResponse,
};
use crate::error::{AnalyticsError, Result, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurabilitySnapshot {
    pub rides_analyzed: usize,
    pub mean_score: Option<f64>,
    pub best_score: Option<u8>,
    /// Highest heart-rate drift seen in any ride
    pub max_hr_drift_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierSummaryPoint {
    pub duration_sec: u32,
    pub watts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierSnapshot {
    pub activities_analyzed: usize,
    pub best_power: Vec<FrontierSummaryPoint>,
    pub hull_points: usize,
    pub peak_kj_per_hour: Option<f64>,
    pub repeatability_records: usize,
    pub longest_streak_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub window_days: u32,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationSnapshot {
    pub ftp_watts: Option<f64>,
    pub days_covered: usize,
    pub best_tss: Vec<BlockSummary>,
    pub best_kj: Vec<BlockSummary>,
}

/// A condensed response, tagged by the analysis it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Snapshot {
    Durability(DurabilitySnapshot),
    Frontiers(FrontierSnapshot),
    Adaptation(AdaptationSnapshot),
}

impl From<&DurabilityAnalysisResponse> for Snapshot {
    fn from(response: &DurabilityAnalysisResponse) -> Self {
        let rides = &response.rides;
        Snapshot::Durability(DurabilitySnapshot {
            rides_analyzed: rides.len(),
            mean_score: response.mean_score,
            best_score: rides.iter().map(|r| r.durability.score).max(),
            max_hr_drift_pct: rides
                .iter()
                .filter_map(|r| r.durability.hr_drift_pct)
                .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d)))),
        })
    }
}

impl From<&TrainingFrontiersResponse> for Snapshot {
    fn from(response: &TrainingFrontiersResponse) -> Self {
        let frontier = &response.frontier;
        Snapshot::Frontiers(FrontierSnapshot {
            activities_analyzed: frontier.activities_analyzed,
            best_power: frontier
                .points
                .iter()
                .map(|p| FrontierSummaryPoint {
                    duration_sec: p.duration_sec,
                    watts: p.watts,
                })
                .collect(),
            hull_points: frontier.hull.len(),
            peak_kj_per_hour: frontier.peak_kj_per_hour.as_ref().map(|p| p.kj_per_hour),
            repeatability_records: response.repeatability_records.len(),
            longest_streak_sec: response
                .zone_streaks
                .iter()
                .map(|s| s.duration_sec)
                .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d)))),
        })
    }
}

fn block_summaries(blocks: &[AdaptationBlock]) -> Vec<BlockSummary> {
    blocks
        .iter()
        .map(|b| BlockSummary {
            window_days: b.window_days,
            total: b.total_metric.to_f64().unwrap_or_default(),
        })
        .collect()
}

impl From<&AdaptationEdgesResponse> for Snapshot {
    fn from(response: &AdaptationEdgesResponse) -> Self {
        Snapshot::Adaptation(AdaptationSnapshot {
            ftp_watts: response.ftp_estimate.map(|f| f.watts),
            days_covered: response.daily.len(),
            best_tss: block_summaries(&response.best_tss_blocks),
            best_kj: block_summaries(&response.best_kj_blocks),
        })
    }
}

/// Everything known about one user's analytics, one slot per snapshot kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub user_id: String,
    /// Incremented on every successful write
    pub version: u64,
    pub durability: Option<DurabilitySnapshot>,
    pub frontiers: Option<FrontierSnapshot>,
    pub adaptation: Option<AdaptationSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl AnalyticsRecord {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            version: 0,
            durability: None,
            frontiers: None,
            adaptation: None,
            updated_at: Utc::now(),
        }
    }

    /// Replace the slot matching the snapshot kind, leaving the others untouched
    pub fn apply(mut self, snapshot: Snapshot) -> Self {
        match snapshot {
            Snapshot::Durability(s) => self.durability = Some(s),
            Snapshot::Frontiers(s) => self.frontiers = Some(s),
            Snapshot::Adaptation(s) => self.adaptation = Some(s),
        }
        self
    }
}

/// Versioned storage for analytics records
pub trait RecordStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<AnalyticsRecord>>;

    /// Store `record` only if the stored version still equals `expected`
    /// (`None`: no record yet). Fails with [`StoreError::VersionConflict`] otherwise.
    fn compare_and_swap(&self, expected: Option<u64>, record: AnalyticsRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, AnalyticsRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, AnalyticsRecord>>> {
        self.records.lock().map_err(|_| {
            AnalyticsError::Store(StoreError::Backend {
                reason: "record map lock poisoned".to_string(),
            })
        })
    }
}

impl RecordStore for InMemoryRecordStore {
    fn load(&self, user_id: &str) -> Result<Option<AnalyticsRecord>> {
        Ok(self.lock()?.get(user_id).cloned())
    }

    fn compare_and_swap(&self, expected: Option<u64>, record: AnalyticsRecord) -> Result<()> {
        let mut records = self.lock()?;
        let actual = records.get(&record.user_id).map(|r| r.version);
        if actual != expected {
            return Err(StoreError::VersionConflict {
                user_id: record.user_id,
                expected,
                actual,
            }
            .into());
        }
        records.insert(record.user_id.clone(), record);
        Ok(())
    }
}

/// Merge `snapshot` into the user's record, retrying on concurrent writes.
///
/// Gives up with [`StoreError::RetriesExhausted`] after `max_attempts` conflicts.
pub fn merge_snapshot(
    store: &dyn RecordStore,
    user_id: &str,
    snapshot: Snapshot,
    max_attempts: u32,
) -> Result<AnalyticsRecord> {
    for attempt in 1..=max_attempts {
        let current = store.load(user_id)?;
        let expected = current.as_ref().map(|r| r.version);

        let mut next = current
            .unwrap_or_else(|| AnalyticsRecord::empty(user_id))
            .apply(snapshot.clone());
        next.version = expected.map_or(1, |v| v + 1);
        next.updated_at = Utc::now();

        match store.compare_and_swap(expected, next.clone()) {
            Ok(()) => {
                debug!(user = user_id, version = next.version, attempt, "Snapshot merged");
                return Ok(next);
            }
            Err(err) if err.is_retryable() => {
                debug!(user = user_id, attempt, error = %err, "Snapshot merge conflict, retrying");
            }
            Err(err) => return Err(err),
        }
    }

    warn!(user = user_id, attempts = max_attempts, "Snapshot merge abandoned");
    Err(StoreError::RetriesExhausted {
        user_id: user_id.to_string(),
        attempts: max_attempts,
    }
    .into())
}
