//! Steady-state efficiency windows
//!
//! Long windows in which the rider was actually pedalling, moving and wearing
//! a heart-rate strap are ranked by how much power each heartbeat buys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActivityMeta, AthleteProfile};
use crate::power::ratio;
use crate::rolling::prefix_sums;
use crate::series::SampleSeries;

/// Candidate durations and coverage filters for efficiency windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfficiencyConfig {
    /// Window lengths in seconds
    pub durations_sec: Vec<u32>,

    /// Distance between consecutive window starts, in seconds
    pub stride_sec: u32,

    /// Minimum share of samples with cadence above zero
    pub min_cadence_coverage: f64,

    /// Minimum share of samples faster than `moving_speed_mps`
    pub min_moving_coverage: f64,

    /// Minimum share of samples with a heart-rate reading
    pub min_hr_coverage: f64,

    /// Speed above which the rider counts as moving
    pub moving_speed_mps: f64,

    /// Windows kept per duration per activity
    pub top_n: usize,
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            durations_sec: vec![10800, 14400, 18000],
            stride_sec: 1,
            min_cadence_coverage: 0.85,
            min_moving_coverage: 0.98,
            min_hr_coverage: 0.90,
            moving_speed_mps: 2.0,
            top_n: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyWindow {
    pub duration_sec: u32,
    pub average_power: f64,
    pub average_heart_rate: f64,
    pub watts_per_beat: f64,
    /// Watts per percent of heart-rate reserve
    pub watts_per_hrr_pct: Option<f64>,
    pub cadence_coverage: f64,
    pub moving_coverage: f64,
    pub hr_coverage: f64,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub window_start_sec: f64,
}

/// Channel indicators turned into prefix sums once per activity
struct CoverageSums {
    power: Vec<f64>,
    pedalling: Vec<f64>,
    moving: Vec<f64>,
    hr_present: Vec<f64>,
    hr: Vec<f64>,
}

impl CoverageSums {
    fn build(series: &SampleSeries, moving_speed_mps: f64) -> Self {
        let samples = series.samples();
        let indicator = |ok: bool| if ok { 1.0 } else { 0.0 };
        let hr_of = |hr: Option<f64>| hr.filter(|h| h.is_finite() && *h > 0.0);

        Self {
            power: prefix_sums(&series.power_filled()),
            pedalling: prefix_sums(
                &samples
                    .iter()
                    .map(|s| indicator(s.cadence.map_or(false, |c| c > 0.0)))
                    .collect::<Vec<_>>(),
            ),
            moving: prefix_sums(
                &samples
                    .iter()
                    .map(|s| indicator(s.speed.map_or(false, |v| v > moving_speed_mps)))
                    .collect::<Vec<_>>(),
            ),
            hr_present: prefix_sums(
                &samples
                    .iter()
                    .map(|s| indicator(hr_of(s.heart_rate).is_some()))
                    .collect::<Vec<_>>(),
            ),
            hr: prefix_sums(
                &samples
                    .iter()
                    .map(|s| hr_of(s.heart_rate).unwrap_or(0.0))
                    .collect::<Vec<_>>(),
            ),
        }
    }

    fn sum(prefix: &[f64], start: usize, end: usize) -> f64 {
        prefix[end] - prefix[start]
    }
}

/// Top qualifying windows of one activity, per configured duration
pub fn activity_windows(
    meta: &ActivityMeta,
    series: &SampleSeries,
    config: &EfficiencyConfig,
    profile: &AthleteProfile,
) -> Vec<EfficiencyWindow> {
    let n = series.len();
    let sums = CoverageSums::build(series, config.moving_speed_mps);
    let stride = series.window_samples(config.stride_sec as f64);
    let reserve = profile.heart_rate_reserve();

    let mut kept = Vec::new();
    for &duration in &config.durations_sec {
        let window = series.window_samples(duration as f64);
        if window > n {
            continue;
        }
        let count = window as f64;

        let mut candidates: Vec<EfficiencyWindow> = (0..=n - window)
            .step_by(stride)
            .filter_map(|start| {
                let end = start + window;
                let cadence_coverage = CoverageSums::sum(&sums.pedalling, start, end) / count;
                let moving_coverage = CoverageSums::sum(&sums.moving, start, end) / count;
                let hr_samples = CoverageSums::sum(&sums.hr_present, start, end);
                let hr_coverage = hr_samples / count;

                if cadence_coverage < config.min_cadence_coverage
                    || moving_coverage < config.min_moving_coverage
                    || hr_coverage < config.min_hr_coverage
                {
                    return None;
                }

                let average_power = CoverageSums::sum(&sums.power, start, end) / count;
                let average_heart_rate =
                    ratio(CoverageSums::sum(&sums.hr, start, end), hr_samples)?;
                let watts_per_beat = ratio(average_power, average_heart_rate)?;
                let watts_per_hrr_pct = reserve.and_then(|(rest, max)| {
                    let hrr_pct = (average_heart_rate - rest) / (max - rest) * 100.0;
                    ratio(average_power, hrr_pct)
                });

                Some(EfficiencyWindow {
                    duration_sec: duration,
                    average_power,
                    average_heart_rate,
                    watts_per_beat,
                    watts_per_hrr_pct,
                    cadence_coverage,
                    moving_coverage,
                    hr_coverage,
                    activity_id: meta.id.clone(),
                    start_time: meta.start_time,
                    window_start_sec: series.relative_t(start),
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.watts_per_beat.total_cmp(&a.watts_per_beat));
        candidates.truncate(config.top_n);
        kept.extend(candidates);
    }
    kept
}

/// Merge per-activity windows: duration ascending, then watts per beat descending.
///
/// The sort is stable, so equal windows stay in activity order.
pub fn merge_windows(per_activity: Vec<Vec<EfficiencyWindow>>) -> Vec<EfficiencyWindow> {
    let mut merged: Vec<EfficiencyWindow> = per_activity.into_iter().flatten().collect();
    merged.sort_by(|a, b| {
        a.duration_sec
            .cmp(&b.duration_sec)
            .then(b.watts_per_beat.total_cmp(&a.watts_per_beat))
    });
    merged
}
