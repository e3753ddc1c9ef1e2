//! Response assembly for the three analytics entry points
//!
//! Activities are normalized and analyzed independently, optionally on the
//! rayon pool, then reduced sequentially in input order so that ties between
//! activities always resolve to the earlier one.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adaptation::{adaptation_edges, AdaptationEdges};
use crate::config::{AnalyticsConfig, LimitsConfig};
use crate::durability::{
    analyze_ride, fatigue_efforts, FatigueEffort, FatigueFrontierBuilder, RideDurability,
};
use crate::efficiency::{activity_windows, merge_windows, EfficiencyWindow};
use crate::frontier::{activity_efforts, ActivityEfforts, FrontierBuilder, PowerFrontier};
use crate::models::{Activity, ActivityBatch, ActivityMeta, SummaryBatch};
use crate::power::round_to;
use crate::repeatability::{
    activity_sequences, repeatability_records, RepeatabilityRecord, RepeatabilitySequence,
};
use crate::series::SampleSeries;
use crate::zones::{activity_streaks, longest_streaks, ZoneStreak};

/// One point of a downsampled ride trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    /// Seconds from activity start
    pub t: f64,
    pub power: Option<f64>,
    pub heart_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDurabilityReport {
    #[serde(flatten)]
    pub durability: RideDurability,
    pub series: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurabilityAnalysisResponse {
    pub rides: Vec<RideDurabilityReport>,
    pub mean_score: Option<f64>,
    pub skipped_activities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingFrontiersResponse {
    pub frontier: PowerFrontier,
    pub fatigue_efforts: Vec<FatigueEffort>,
    pub efficiency_windows: Vec<EfficiencyWindow>,
    pub repeatability_sequences: Vec<RepeatabilitySequence>,
    pub repeatability_records: Vec<RepeatabilityRecord>,
    pub zone_streaks: Vec<ZoneStreak>,
    pub skipped_activities: Vec<String>,
}

pub type AdaptationEdgesResponse = AdaptationEdges;

/// An activity whose samples normalized into a usable series
pub struct PreparedActivity<'a> {
    pub meta: &'a ActivityMeta,
    pub series: SampleSeries,
}

/// Map `f` over `items` on the rayon pool or sequentially; output keeps input order
fn fan_out<T, R, F>(items: &[T], parallel: bool, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

fn normalize_activity(activity: &Activity, limits: &LimitsConfig) -> Option<SampleSeries> {
    if activity.samples.len() > limits.max_samples_per_activity {
        warn!(
            activity = %activity.meta.id,
            samples = activity.samples.len(),
            limit = limits.max_samples_per_activity,
            "Skipping activity above the sample limit"
        );
        return None;
    }
    let series = SampleSeries::from_activity(activity);
    if series.is_none() {
        warn!(activity = %activity.meta.id, "Skipping activity without usable samples");
    }
    series
}

/// Normalize every activity, returning the usable ones and the ids of the skipped ones
pub fn prepare<'a>(
    activities: &'a [Activity],
    config: &AnalyticsConfig,
) -> (Vec<PreparedActivity<'a>>, Vec<String>) {
    let normalized = fan_out(activities, config.execution.parallel, |activity| {
        normalize_activity(activity, &config.limits)
    });

    let mut prepared = Vec::with_capacity(activities.len());
    let mut skipped = Vec::new();
    for (activity, series) in activities.iter().zip(normalized) {
        match series {
            Some(series) => prepared.push(PreparedActivity {
                meta: &activity.meta,
                series,
            }),
            None => skipped.push(activity.meta.id.clone()),
        }
    }
    (prepared, skipped)
}

fn bucket_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        return None;
    }
    round_to(sum / count as f64, 1)
}

/// Bucket-average a series down to at most `max_points` points, values rounded to 0.1
pub fn downsample(series: &SampleSeries, max_points: usize) -> Vec<SeriesPoint> {
    if series.is_empty() || max_points == 0 {
        return Vec::new();
    }
    let bucket = series.len().div_ceil(max_points);
    let samples = series.samples();

    (0..series.len())
        .step_by(bucket)
        .map(|start| {
            let end = (start + bucket).min(series.len());
            let chunk = &samples[start..end];
            let t = (start..end).map(|i| series.relative_t(i)).sum::<f64>() / chunk.len() as f64;
            SeriesPoint {
                t: round_to(t, 1).unwrap_or(0.0),
                power: bucket_mean(chunk.iter().filter_map(|s| s.power).filter(|p| p.is_finite())),
                heart_rate: bucket_mean(
                    chunk
                        .iter()
                        .filter_map(|s| s.heart_rate)
                        .filter(|h| h.is_finite() && *h > 0.0),
                ),
            }
        })
        .collect()
}

/// Durability of every ride in the batch
pub fn analyze_durability(
    batch: &ActivityBatch,
    config: &AnalyticsConfig,
) -> DurabilityAnalysisResponse {
    let (prepared, skipped_activities) = prepare(&batch.activities, config);

    let rides: Vec<RideDurabilityReport> =
        fan_out(&prepared, config.execution.parallel, |activity| {
            RideDurabilityReport {
                durability: analyze_ride(
                    activity.meta,
                    &activity.series,
                    &config.durability,
                    &batch.profile,
                ),
                series: downsample(&activity.series, config.output.max_series_points),
            }
        });

    let mean_score = if rides.is_empty() {
        None
    } else {
        let total: f64 = rides.iter().map(|r| f64::from(r.durability.score)).sum();
        round_to(total / rides.len() as f64, 1)
    };

    info!(
        rides = rides.len(),
        skipped = skipped_activities.len(),
        mean_score = ?mean_score,
        "Durability analysis complete"
    );

    DurabilityAnalysisResponse {
        rides,
        mean_score,
        skipped_activities,
    }
}

/// Everything one activity contributes to the training frontiers
struct ActivityFindings {
    efforts: ActivityEfforts,
    fatigue: Vec<FatigueEffort>,
    efficiency: Vec<EfficiencyWindow>,
    sequences: Vec<RepeatabilitySequence>,
    streaks: Vec<ZoneStreak>,
}

/// Duration/power, fatigue, efficiency, repeatability and zone frontiers of the batch
pub fn analyze_frontiers(
    batch: &ActivityBatch,
    config: &AnalyticsConfig,
) -> TrainingFrontiersResponse {
    let (prepared, skipped_activities) = prepare(&batch.activities, config);
    let profile = &batch.profile;
    let ftp = profile.ftp();

    let findings = fan_out(&prepared, config.execution.parallel, |activity| {
        let (meta, series) = (activity.meta, &activity.series);
        debug!(activity = %meta.id, samples = series.len(), "Searching frontiers");
        ActivityFindings {
            efforts: activity_efforts(meta, series, &config.frontier, profile),
            fatigue: fatigue_efforts(meta, series, &config.durability, profile),
            efficiency: activity_windows(meta, series, &config.efficiency, profile),
            sequences: activity_sequences(meta, series, &config.repeatability, ftp),
            streaks: activity_streaks(meta, series, &config.zones, ftp),
        }
    });

    let mut frontier = FrontierBuilder::new();
    let mut fatigue = FatigueFrontierBuilder::new();
    let mut efficiency = Vec::with_capacity(findings.len());
    let mut repeatability_sequences = Vec::new();
    let mut streaks = Vec::with_capacity(findings.len());
    for found in findings {
        frontier.merge(found.efforts);
        fatigue.merge(found.fatigue);
        efficiency.push(found.efficiency);
        repeatability_sequences.extend(found.sequences);
        streaks.push(found.streaks);
    }

    let frontier = frontier.finish();
    let fatigue_efforts = fatigue.finish(&frontier, profile);
    let repeatability_records =
        repeatability_records(&repeatability_sequences, &config.repeatability);

    info!(
        activities = frontier.activities_analyzed,
        skipped = skipped_activities.len(),
        points = frontier.points.len(),
        hull = frontier.hull.len(),
        "Training frontiers complete"
    );

    TrainingFrontiersResponse {
        frontier,
        fatigue_efforts,
        efficiency_windows: merge_windows(efficiency),
        repeatability_sequences,
        repeatability_records,
        zone_streaks: longest_streaks(streaks, &config.zones),
        skipped_activities,
    }
}

/// Hardest multi-day blocks of the summarized training history
pub fn analyze_adaptation(
    batch: &SummaryBatch,
    config: &AnalyticsConfig,
) -> AdaptationEdgesResponse {
    let edges = adaptation_edges(&batch.summaries, &batch.profile, &config.adaptation);
    info!(
        days = edges.daily.len(),
        tss_blocks = edges.best_tss_blocks.len(),
        kj_blocks = edges.best_kj_blocks.len(),
        "Adaptation edges complete"
    );
    edges
}
