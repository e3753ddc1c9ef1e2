//! Durability: how well a rider holds power and heart-rate coupling as a ride wears on
//!
//! A ride is split into early/middle/late segments at fixed fractions of its
//! duration. Comparing the segments gives heart-rate drift (aerobic
//! decoupling); searching only the part of a ride that follows a given
//! amount of work gives fatigue-threshold best efforts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::frontier::PowerFrontier;
use crate::models::{ActivityMeta, AthleteProfile};
use crate::power::{
    finite, mean, normalized_power, pct_of_ftp, ratio, training_stress_score, valid_heart_rate_in,
    valid_power_in, NP_WINDOW_SEC,
};
use crate::rolling::{best_window_in_prefix, cumulative_energy_before, prefix_sums};
use crate::series::SampleSeries;

/// Segment boundaries, fatigue grid and thresholds for durability analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurabilityConfig {
    /// End of the early segment as a fraction of ride duration
    pub early_fraction: f64,

    /// Start of the late segment as a fraction of ride duration
    pub late_fraction: f64,

    /// Effort length searched inside the late segment
    pub late_effort_sec: u32,

    /// Prior work levels of the fatigue grid, in kilojoules
    pub fatigue_kj: Vec<u32>,

    /// Effort durations of the fatigue grid, in seconds
    pub fatigue_durations_sec: Vec<u32>,

    /// Work after which durable TSS starts counting, in kilojoules
    pub durable_tss_threshold_kj: f64,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            early_fraction: 0.3,
            late_fraction: 0.7,
            late_effort_sec: 1200,
            fatigue_kj: vec![500, 1000, 1500, 2000, 2500, 3000],
            fatigue_durations_sec: vec![300, 1200, 3600],
            durable_tss_threshold_kj: 1500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentLabel {
    Early,
    Middle,
    Late,
}

/// One third-ish of a ride
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurabilitySegment {
    pub label: SegmentLabel,
    pub start_sec: f64,
    pub end_sec: f64,
    pub normalized_power: Option<f64>,
    pub average_power: Option<f64>,
    pub average_heart_rate: Option<f64>,
    /// Heart rate per watt of average power
    pub hr_power_ratio: Option<f64>,
}

/// Best power available only after a given amount of prior work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatigueEffort {
    pub fatigue_kj: u32,
    pub duration_sec: u32,
    pub watts: f64,
    pub pct_ftp: Option<f64>,
    /// Unrestricted best for the same duration
    pub fresh_watts: Option<f64>,
    pub delta_watts: Option<f64>,
    pub delta_pct: Option<f64>,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub window_start_sec: f64,
}

/// Best effort found inside the late segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateEffort {
    pub duration_sec: u32,
    pub watts: f64,
    pub pct_ftp: Option<f64>,
    pub window_start_sec: f64,
}

/// Durability analysis of a single ride
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDurability {
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_sec: f64,
    pub segments: Vec<DurabilitySegment>,
    pub hr_drift_pct: Option<f64>,
    pub best_late_effort: Option<LateEffort>,
    pub fatigue_efforts: Vec<FatigueEffort>,
    pub durable_tss: Option<f64>,
    pub score: u8,
}

impl RideDurability {
    pub fn segment(&self, label: SegmentLabel) -> Option<&DurabilitySegment> {
        self.segments.iter().find(|s| s.label == label)
    }
}

/// Inputs of the durability score; every field is optional
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub early_np_pct_ftp: Option<f64>,
    pub late_np_pct_ftp: Option<f64>,
    pub hr_drift_pct: Option<f64>,
    pub best_late_pct_ftp: Option<f64>,
}

/// Single 0-100 durability score.
///
/// Starts at 100: a late/early normalized power drop costs half a point per
/// %FTP, holding or rising earns up to 5 points, positive heart-rate drift
/// costs 0.75 per percent, and a late 20-minute effort above FTP earns half
/// a point per %FTP above 100. Missing or non-finite inputs are ignored.
pub fn durability_score(inputs: &ScoreInputs) -> u8 {
    let usable = |x: Option<f64>| x.filter(|v| v.is_finite());
    let mut score = 100.0;

    if let (Some(early), Some(late)) = (
        usable(inputs.early_np_pct_ftp),
        usable(inputs.late_np_pct_ftp),
    ) {
        if late < early {
            score -= 0.5 * (early - late);
        } else {
            score += (0.2 * (late - early)).min(5.0);
        }
    }

    if let Some(drift) = usable(inputs.hr_drift_pct) {
        if drift > 0.0 {
            score -= 0.75 * drift;
        }
    }

    if let Some(late_best) = usable(inputs.best_late_pct_ftp) {
        if late_best > 100.0 {
            score += 0.5 * (late_best - 100.0);
        }
    }

    score.clamp(0.0, 100.0).round() as u8
}

/// Heart-rate drift between the early and late segments, in percent
pub fn heart_rate_drift(early_ratio: Option<f64>, late_ratio: Option<f64>) -> Option<f64> {
    let early = early_ratio.filter(|e| *e > 0.0)?;
    let late = late_ratio?;
    finite((late - early) / early * 100.0)
}

/// Ride duration used for segmentation: stated duration, else the series span
fn effective_duration(meta: &ActivityMeta, series: &SampleSeries) -> f64 {
    if meta.duration_sec.is_finite() && meta.duration_sec > 0.0 {
        meta.duration_sec
    } else {
        series.span_sec()
    }
}

/// Split a ride into early, middle and late segments
pub fn segments(
    series: &SampleSeries,
    duration_sec: f64,
    config: &DurabilityConfig,
) -> Vec<DurabilitySegment> {
    let np_window = series.window_samples(NP_WINDOW_SEC);
    let bounds = [
        (SegmentLabel::Early, 0.0, config.early_fraction),
        (SegmentLabel::Middle, config.early_fraction, config.late_fraction),
        (SegmentLabel::Late, config.late_fraction, 1.0),
    ];

    bounds
        .iter()
        .map(|&(label, from, to)| {
            let start_sec = duration_sec * from;
            let end_sec = duration_sec * to;
            let (start, end) = series.index_range(start_sec, end_sec);
            let power = valid_power_in(series, start, end);
            let heart_rate = valid_heart_rate_in(series, start, end);

            let average_power = mean(&power);
            let average_heart_rate = mean(&heart_rate);
            let hr_power_ratio = match (average_heart_rate, average_power) {
                (Some(hr), Some(p)) => ratio(hr, p),
                _ => None,
            };

            DurabilitySegment {
                label,
                start_sec,
                end_sec,
                normalized_power: normalized_power(&power, np_window),
                average_power,
                average_heart_rate,
                hr_power_ratio,
            }
        })
        .collect()
}

/// Best effort of every `(fatigueKj, duration)` pair of the grid.
///
/// Only windows whose start follows at least `fatigueKj` of work qualify.
/// Deltas compare against the unrestricted best of the same ride.
pub fn fatigue_efforts(
    meta: &ActivityMeta,
    series: &SampleSeries,
    config: &DurabilityConfig,
    profile: &AthleteProfile,
) -> Vec<FatigueEffort> {
    let power = series.power_filled();
    let sums = prefix_sums(&power);
    let energy = cumulative_energy_before(&power, series.sample_period());
    let len = power.len();

    let mut efforts = Vec::new();
    for &duration in &config.fatigue_durations_sec {
        let window = series.window_samples(duration as f64);
        let fresh = best_window_in_prefix(&sums, window, 0, len, |_| true).map(|b| b.average);

        for &kj in &config.fatigue_kj {
            let threshold_j = kj as f64 * 1000.0;
            let Some(best) =
                best_window_in_prefix(&sums, window, 0, len, |start| energy[start] >= threshold_j)
            else {
                continue;
            };
            efforts.push(build_fatigue_effort(
                kj,
                duration,
                best.average,
                fresh,
                profile,
                meta,
                series.relative_t(best.start),
            ));
        }
    }
    efforts
}

fn build_fatigue_effort(
    fatigue_kj: u32,
    duration_sec: u32,
    watts: f64,
    fresh_watts: Option<f64>,
    profile: &AthleteProfile,
    meta: &ActivityMeta,
    window_start_sec: f64,
) -> FatigueEffort {
    let delta_watts = fresh_watts.and_then(|fresh| finite(watts - fresh));
    let delta_pct = match (delta_watts, fresh_watts) {
        (Some(delta), Some(fresh)) => ratio(delta * 100.0, fresh),
        _ => None,
    };
    FatigueEffort {
        fatigue_kj,
        duration_sec,
        watts,
        pct_ftp: pct_of_ftp(watts, profile.ftp()),
        fresh_watts,
        delta_watts,
        delta_pct,
        activity_id: meta.id.clone(),
        start_time: meta.start_time,
        window_start_sec,
    }
}

/// Best `late_effort_sec` window lying entirely inside the late segment
pub fn best_late_effort(
    series: &SampleSeries,
    duration_sec: f64,
    config: &DurabilityConfig,
    profile: &AthleteProfile,
) -> Option<LateEffort> {
    let power = series.power_filled();
    let sums = prefix_sums(&power);
    let (start, end) = series.index_range(duration_sec * config.late_fraction, duration_sec);
    let window = series.window_samples(config.late_effort_sec as f64);
    let best = best_window_in_prefix(&sums, window, start, end, |_| true)?;
    Some(LateEffort {
        duration_sec: config.late_effort_sec,
        watts: best.average,
        pct_ftp: pct_of_ftp(best.average, profile.ftp()),
        window_start_sec: series.relative_t(best.start),
    })
}

/// TSS accumulated only after `threshold_kj` of work has been done
pub fn durable_tss(series: &SampleSeries, threshold_kj: f64, ftp: Option<f64>) -> Option<f64> {
    ftp?;
    let power = series.power_filled();
    let energy = cumulative_energy_before(&power, series.sample_period());
    let threshold_j = threshold_kj * 1000.0;
    let crossing = energy[..power.len()].iter().position(|e| *e >= threshold_j)?;

    let after = valid_power_in(series, crossing, power.len());
    let np = normalized_power(&after, series.window_samples(NP_WINDOW_SEC))?;
    let duration_after = (power.len() - crossing) as f64 * series.sample_period();
    training_stress_score(duration_after, np, ftp)
}

/// Full durability analysis of one ride
pub fn analyze_ride(
    meta: &ActivityMeta,
    series: &SampleSeries,
    config: &DurabilityConfig,
    profile: &AthleteProfile,
) -> RideDurability {
    let duration_sec = effective_duration(meta, series);
    let segments = segments(series, duration_sec, config);
    let ratio_of = |label: SegmentLabel| {
        segments
            .iter()
            .find(|s| s.label == label)
            .and_then(|s| s.hr_power_ratio)
    };
    let np_pct_of = |label: SegmentLabel| {
        segments
            .iter()
            .find(|s| s.label == label)
            .and_then(|s| s.normalized_power)
            .and_then(|np| pct_of_ftp(np, profile.ftp()))
    };

    let hr_drift_pct =
        heart_rate_drift(ratio_of(SegmentLabel::Early), ratio_of(SegmentLabel::Late));
    let best_late_effort = best_late_effort(series, duration_sec, config, profile);

    let score = durability_score(&ScoreInputs {
        early_np_pct_ftp: np_pct_of(SegmentLabel::Early),
        late_np_pct_ftp: np_pct_of(SegmentLabel::Late),
        hr_drift_pct,
        best_late_pct_ftp: best_late_effort.as_ref().and_then(|e| e.pct_ftp),
    });

    debug!(
        activity = %meta.id,
        score,
        drift = ?hr_drift_pct,
        "Ride durability analysed"
    );

    RideDurability {
        activity_id: meta.id.clone(),
        start_time: meta.start_time,
        duration_sec,
        segments,
        hr_drift_pct,
        best_late_effort,
        fatigue_efforts: fatigue_efforts(meta, series, config, profile),
        durable_tss: durable_tss(series, config.durable_tss_threshold_kj, profile.ftp()),
        score,
    }
}

/// Order-sensitive reduction of fatigue efforts across rides.
///
/// Keeps the strictly best effort per `(fatigueKj, duration)`; deltas are
/// recomputed against the global duration/power frontier when finishing.
#[derive(Debug, Default)]
pub struct FatigueFrontierBuilder {
    best: BTreeMap<(u32, u32), FatigueEffort>,
}

impl FatigueFrontierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, efforts: Vec<FatigueEffort>) {
        for effort in efforts {
            let key = (effort.fatigue_kj, effort.duration_sec);
            let replace = self
                .best
                .get(&key)
                .map_or(true, |current| effort.watts > current.watts);
            if replace {
                self.best.insert(key, effort);
            }
        }
    }

    /// Efforts ordered by fatigue level, then duration
    pub fn finish(self, fresh: &PowerFrontier, profile: &AthleteProfile) -> Vec<FatigueEffort> {
        self.best
            .into_values()
            .map(|effort| {
                let fresh_watts = fresh.best_for(effort.duration_sec).map(|p| p.watts);
                let delta_watts = fresh_watts.and_then(|f| finite(effort.watts - f));
                let delta_pct = match (delta_watts, fresh_watts) {
                    (Some(delta), Some(f)) => ratio(delta * 100.0, f),
                    _ => None,
                };
                FatigueEffort {
                    pct_ftp: pct_of_ftp(effort.watts, profile.ftp()),
                    fresh_watts,
                    delta_watts,
                    delta_pct,
                    ..effort
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;
    use chrono::TimeZone;

    fn meta(id: &str, duration_sec: f64) -> ActivityMeta {
        ActivityMeta {
            id: id.to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 6, 2, 7, 30, 0).unwrap(),
            duration_sec,
            source: None,
            sample_rate_hz: Some(1.0),
        }
    }

    fn series_from(power: &[f64], heart_rate: &[f64]) -> SampleSeries {
        let samples = power
            .iter()
            .zip(heart_rate)
            .enumerate()
            .map(|(i, (&p, &hr))| Sample {
                heart_rate: Some(hr),
                ..Sample::with_power(i as f64, p)
            })
            .collect();
        SampleSeries::from_ordered(samples, 1.0).unwrap()
    }

    fn profile() -> AthleteProfile {
        AthleteProfile {
            ftp_watts: Some(250.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_score_bounds_and_components() {
        assert_eq!(durability_score(&ScoreInputs::default()), 100);

        let fading = ScoreInputs {
            early_np_pct_ftp: Some(80.0),
            late_np_pct_ftp: Some(60.0),
            hr_drift_pct: Some(8.0),
            best_late_pct_ftp: None,
        };
        // 100 - 10 - 6
        assert_eq!(durability_score(&fading), 84);

        let strong = ScoreInputs {
            early_np_pct_ftp: Some(70.0),
            late_np_pct_ftp: Some(75.0),
            hr_drift_pct: Some(-2.0),
            best_late_pct_ftp: Some(104.0),
        };
        // 100 + 1 + 2, clamped
        assert_eq!(durability_score(&strong), 100);

        let collapsed = ScoreInputs {
            early_np_pct_ftp: Some(200.0),
            late_np_pct_ftp: Some(10.0),
            hr_drift_pct: Some(90.0),
            best_late_pct_ftp: Some(f64::NAN),
        };
        assert_eq!(durability_score(&collapsed), 0);
    }

    #[test]
    fn test_rise_bonus_is_capped() {
        let inputs = ScoreInputs {
            early_np_pct_ftp: Some(50.0),
            late_np_pct_ftp: Some(100.0),
            hr_drift_pct: Some(20.0),
            best_late_pct_ftp: None,
        };
        // 100 + min(10, 5) - 15
        assert_eq!(durability_score(&inputs), 90);
    }

    #[test]
    fn test_heart_rate_drift_guard() {
        assert_eq!(heart_rate_drift(Some(0.0), Some(0.7)), None);
        assert_eq!(heart_rate_drift(None, Some(0.7)), None);
        let drift = heart_rate_drift(Some(0.6), Some(0.66)).unwrap();
        assert!((drift - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_segments_split_at_thirty_and_seventy_percent() {
        let power = vec![200.0; 100];
        let hr: Vec<f64> = (0..100).map(|i| if i < 70 { 120.0 } else { 132.0 }).collect();
        let series = series_from(&power, &hr);
        let segs = segments(&series, 100.0, &DurabilityConfig::default());

        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].label, SegmentLabel::Early);
        assert_eq!(segs[0].end_sec, 30.0);
        assert_eq!(segs[2].start_sec, 70.0);
        assert_eq!(segs[0].average_power, Some(200.0));
        assert!((segs[0].hr_power_ratio.unwrap() - 0.6).abs() < 1e-9);
        assert!((segs[2].hr_power_ratio.unwrap() - 0.66).abs() < 1e-9);
        // 30 valid samples fill exactly one NP window
        assert!((segs[0].normalized_power.unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_power_segment_has_no_ratio() {
        let series = series_from(&[0.0; 60], &[100.0; 60]);
        let segs = segments(&series, 60.0, &DurabilityConfig::default());
        assert_eq!(segs[0].average_power, Some(0.0));
        assert_eq!(segs[0].hr_power_ratio, None);
    }

    #[test]
    fn test_fatigue_effort_never_exceeds_fresh() {
        // 1 Hz, decreasing from 400W to 200W over an hour
        let power: Vec<f64> = (0..3600).map(|i| 400.0 - i as f64 / 18.0).collect();
        let series = series_from(&power, &vec![140.0; 3600]);
        let config = DurabilityConfig {
            fatigue_kj: vec![100, 500],
            fatigue_durations_sec: vec![60, 300],
            ..Default::default()
        };
        let efforts = fatigue_efforts(&meta("ride", 3600.0), &series, &config, &profile());
        assert_eq!(efforts.len(), 4);
        for effort in &efforts {
            let fresh = effort.fresh_watts.unwrap();
            assert!(effort.watts <= fresh);
            assert!(effort.delta_watts.unwrap() <= 0.0);
            assert!(effort.window_start_sec > 0.0);
        }
    }

    #[test]
    fn test_fatigue_threshold_never_reached() {
        let series = series_from(&[100.0; 600], &[120.0; 600]);
        let config = DurabilityConfig {
            fatigue_kj: vec![1000],
            fatigue_durations_sec: vec![60],
            ..Default::default()
        };
        assert!(fatigue_efforts(&meta("short", 600.0), &series, &config, &profile()).is_empty());
    }

    #[test]
    fn test_best_late_effort_stays_in_late_segment() {
        let mut power = vec![150.0; 4000];
        for p in power.iter_mut().take(1300) {
            *p = 400.0;
        }
        for p in power.iter_mut().skip(3000) {
            *p = 260.0;
        }
        let series = series_from(&power, &vec![140.0; 4000]);
        let late =
            best_late_effort(&series, 4000.0, &DurabilityConfig::default(), &profile()).unwrap();
        assert!(late.window_start_sec >= 2800.0);
        assert!(late.watts <= 260.0);
        assert!((late.pct_ftp.unwrap() - late.watts / 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_durable_tss() {
        // 250W for two hours: 1800 kJ total, 1500 kJ reached after 6000 s
        let series = series_from(&vec![250.0; 7200], &vec![140.0; 7200]);
        let tss = durable_tss(&series, 1500.0, Some(250.0)).unwrap();
        // 1200 s at IF 1.0
        assert!((tss - 1200.0 / 36.0).abs() < 1e-6);
        assert_eq!(durable_tss(&series, 5000.0, Some(250.0)), None);
        assert_eq!(durable_tss(&series, 1500.0, None), None);
    }

    #[test]
    fn test_analyze_ride_without_ftp() {
        let series = series_from(&vec![200.0; 1800], &vec![130.0; 1800]);
        let ride = analyze_ride(
            &meta("no-ftp", 1800.0),
            &series,
            &DurabilityConfig::default(),
            &AthleteProfile::default(),
        );
        assert_eq!(ride.segments.len(), 3);
        assert_eq!(ride.durable_tss, None);
        assert!(ride.fatigue_efforts.iter().all(|e| e.pct_ftp.is_none()));
        assert_eq!(ride.hr_drift_pct, Some(0.0));
        assert_eq!(ride.score, 100);
        assert!(ride.segment(SegmentLabel::Late).is_some());
    }

    #[test]
    fn test_fatigue_builder_recomputes_deltas_against_frontier() {
        use crate::frontier::{activity_efforts, FrontierBuilder, FrontierConfig};

        let fresh_ride = series_from(&vec![300.0; 600], &vec![150.0; 600]);
        let long_ride = series_from(&vec![200.0; 3600], &vec![140.0; 3600]);
        let frontier_config = FrontierConfig {
            durations_sec: vec![300],
            throughput_windows_sec: vec![],
        };
        let config = DurabilityConfig {
            fatigue_kj: vec![200],
            fatigue_durations_sec: vec![300],
            ..Default::default()
        };

        let mut frontier = FrontierBuilder::new();
        for (id, len, ride) in [("fresh", 600.0, &fresh_ride), ("long", 3600.0, &long_ride)] {
            frontier.merge(activity_efforts(&meta(id, len), ride, &frontier_config, &profile()));
        }
        let frontier = frontier.finish();

        let mut builder = FatigueFrontierBuilder::new();
        builder.merge(fatigue_efforts(&meta("fresh", 600.0), &fresh_ride, &config, &profile()));
        builder.merge(fatigue_efforts(&meta("long", 3600.0), &long_ride, &config, &profile()));
        let efforts = builder.finish(&frontier, &profile());

        // 200 kJ is never reached before a 300 s window in the short ride
        assert_eq!(efforts.len(), 1);
        assert_eq!(efforts[0].activity_id, "long");
        assert_eq!(efforts[0].fresh_watts, Some(300.0));
        assert!((efforts[0].delta_watts.unwrap() + 100.0).abs() < 1e-9);
        assert!((efforts[0].delta_pct.unwrap() + 100.0 / 3.0).abs() < 1e-9);
    }
}
