//! Adaptation edges: the hardest contiguous training blocks
//!
//! Activities are rolled up into one load value per calendar day, then for
//! every block length the contiguous run of days with the highest total is
//! found with a sliding sum. Training Stress Score and kilojoules are
//! optimised independently.

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::models::{ActivitySummary, AthleteProfile};
use crate::power::{finite, training_stress_score};

/// Block lengths and FTP estimation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Block lengths in days
    pub window_days: Vec<u32>,

    /// Activities shorter than this never set the FTP estimate
    pub min_estimate_duration_sec: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            window_days: (3..=25).collect(),
            min_estimate_duration_sec: 1200.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FtpSource {
    /// Taken from the athlete profile
    Profile,
    /// Highest normalized power among sufficiently long activities
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEstimate {
    pub watts: f64,
    pub source: FtpSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMetric {
    Tss,
    Kj,
}

/// Training load of one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLoad {
    pub date: NaiveDate,

    /// Total TSS, absent when no FTP estimate exists
    #[serde(with = "rust_decimal::serde::float_option")]
    pub tss: Option<Decimal>,

    /// Total mechanical work in kilojoules
    #[serde(with = "rust_decimal::serde::float")]
    pub kj: Decimal,

    pub activity_ids: Vec<String>,
}

impl DailyLoad {
    fn metric(&self, metric: LoadMetric) -> Option<Decimal> {
        match metric {
            LoadMetric::Tss => self.tss,
            LoadMetric::Kj => Some(self.kj),
        }
    }
}

/// Highest-load contiguous block of a given length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationBlock {
    pub window_days: u32,
    pub metric: LoadMetric,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_metric: Decimal,
    pub day_count: u32,
    pub activity_ids: Vec<String>,
}

/// Result of the adaptation-edges optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationEdges {
    pub ftp_estimate: Option<FtpEstimate>,
    pub daily: Vec<DailyLoad>,
    pub best_tss_blocks: Vec<AdaptationBlock>,
    pub best_kj_blocks: Vec<AdaptationBlock>,
}

/// FTP from the profile when set, otherwise the best normalized power of a
/// long-enough activity
pub fn estimate_ftp(
    summaries: &[ActivitySummary],
    profile: &AthleteProfile,
    config: &AdaptationConfig,
) -> Option<FtpEstimate> {
    if let Some(watts) = profile.ftp() {
        return Some(FtpEstimate {
            watts,
            source: FtpSource::Profile,
        });
    }

    summaries
        .iter()
        .filter(|s| s.duration_sec >= config.min_estimate_duration_sec)
        .filter_map(|s| s.normalized_power.filter(|np| np.is_finite() && *np > 0.0))
        .fold(None, |best: Option<f64>, np| Some(best.map_or(np, |b| b.max(np))))
        .map(|watts| FtpEstimate {
            watts,
            source: FtpSource::Estimated,
        })
}

/// Mechanical work of an activity: recorded kilojoules, else average power x duration
pub fn activity_kj(summary: &ActivitySummary) -> Option<f64> {
    summary
        .kilojoules
        .and_then(finite)
        .or_else(|| {
            summary
                .average_power
                .and_then(|p| finite(p * summary.duration_sec / 1000.0))
        })
        .filter(|kj| *kj >= 0.0)
}

/// Largest per-activity load accepted into the daily totals
const MAX_ACTIVITY_LOAD: f64 = 1.0e9;

/// Decimal form of one activity's load; out-of-range values are dropped
/// so that block sums stay far from `Decimal::MAX`.
fn to_decimal(activity_id: &str, value: f64) -> Option<Decimal> {
    if !(0.0..=MAX_ACTIVITY_LOAD).contains(&value) {
        warn!(activity = %activity_id, value, "Ignoring out-of-range activity load");
        return None;
    }
    Decimal::from_f64(value)
}

/// One load record per calendar day from the first to the last activity.
///
/// Days without activities are present with zero load so that every block
/// covers consecutive calendar days.
pub fn aggregate_daily(summaries: &[ActivitySummary], ftp: Option<f64>) -> Vec<DailyLoad> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&ActivitySummary>> = BTreeMap::new();
    for summary in summaries {
        if !summary.duration_sec.is_finite() || summary.duration_sec < 0.0 {
            warn!(activity = %summary.id, "Skipping activity summary with invalid duration");
            continue;
        }
        by_day.entry(summary.date).or_default().push(summary);
    }

    let (Some(&first), Some(&last)) = (by_day.keys().next(), by_day.keys().next_back()) else {
        return Vec::new();
    };

    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|date| {
            let activities = by_day.get(&date).map(Vec::as_slice).unwrap_or_default();
            let kj: Decimal = activities
                .iter()
                .filter_map(|s| activity_kj(s).and_then(|kj| to_decimal(&s.id, kj)))
                .sum();
            let tss = ftp.map(|_| {
                activities
                    .iter()
                    .filter_map(|s| {
                        s.normalized_power
                            .and_then(|np| training_stress_score(s.duration_sec, np, ftp))
                            .and_then(|tss| to_decimal(&s.id, tss))
                    })
                    .sum::<Decimal>()
            });
            DailyLoad {
                date,
                tss,
                kj,
                activity_ids: activities.iter().map(|s| s.id.clone()).collect(),
            }
        })
        .collect()
}

/// Start index and total of the highest-sum run of `window` values.
///
/// Sliding sum, O(len); ties keep the earliest run.
pub fn best_block(values: &[Decimal], window: usize) -> Option<(usize, Decimal)> {
    if window == 0 || window > values.len() {
        return None;
    }
    let mut sum: Decimal = values[..window].iter().copied().sum();
    let mut best = (0, sum);
    for end in window..values.len() {
        sum += values[end] - values[end - window];
        if sum > best.1 {
            best = (end + 1 - window, sum);
        }
    }
    Some(best)
}

/// Best block of every configured length for one metric.
///
/// Yields nothing when the metric is unavailable for the days.
pub fn best_blocks(
    days: &[DailyLoad],
    window_days: &[u32],
    metric: LoadMetric,
) -> Vec<AdaptationBlock> {
    let values: Option<Vec<Decimal>> = days.iter().map(|d| d.metric(metric)).collect();
    let Some(values) = values else {
        return Vec::new();
    };

    window_days
        .iter()
        .filter_map(|&window| {
            let (start, total) = best_block(&values, window as usize)?;
            let block = &days[start..start + window as usize];
            Some(AdaptationBlock {
                window_days: window,
                metric,
                start: block[0].date,
                end: block[block.len() - 1].date,
                total_metric: total.round_dp(2),
                day_count: window,
                activity_ids: block.iter().flat_map(|d| d.activity_ids.iter().cloned()).collect(),
            })
        })
        .collect()
}

/// Full adaptation-edges optimization over activity summaries
pub fn adaptation_edges(
    summaries: &[ActivitySummary],
    profile: &AthleteProfile,
    config: &AdaptationConfig,
) -> AdaptationEdges {
    let ftp_estimate = estimate_ftp(summaries, profile, config);
    let daily = aggregate_daily(summaries, ftp_estimate.map(|f| f.watts));

    let best_tss_blocks = best_blocks(&daily, &config.window_days, LoadMetric::Tss);
    let best_kj_blocks = best_blocks(&daily, &config.window_days, LoadMetric::Kj);

    debug!(
        days = daily.len(),
        ftp = ?ftp_estimate,
        tss_blocks = best_tss_blocks.len(),
        kj_blocks = best_kj_blocks.len(),
        "Adaptation edges computed"
    );

    AdaptationEdges {
        ftp_estimate,
        daily: daily
            .into_iter()
            .map(|d| DailyLoad {
                tss: d.tss.map(|t| t.round_dp(2)),
                kj: d.kj.round_dp(2),
                ..d
            })
            .collect(),
        best_tss_blocks,
        best_kj_blocks,
    }
}
