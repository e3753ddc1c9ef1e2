//! Duration/power frontier, critical power hull and kilojoule throughput
//!
//! Every activity is searched independently ([`activity_efforts`]); the
//! results are folded into a [`FrontierBuilder`] which keeps, per duration,
//! the first effort that no later activity strictly beats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{ActivityMeta, AthleteProfile};
use crate::power::{finite, pct_of_ftp, watts_per_kg};
use crate::rolling::{best_window_in_prefix, prefix_sums};
use crate::series::SampleSeries;

/// Joules per second to kilojoules per hour
const KJ_PER_HOUR_PER_WATT: f64 = 3.6;

/// Durations searched by the duration/power frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Standard durations in seconds
    pub durations_sec: Vec<u32>,

    /// Multi-hour windows used for the kilojoule throughput frontier
    pub throughput_windows_sec: Vec<u32>,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            durations_sec: vec![
                5, 10, 15, 30, 60, 120, 300, 600, 1200, 1800, 3600, 5400, 7200, 10800, 14400,
            ],
            throughput_windows_sec: vec![7200, 10800, 14400, 18000],
        }
    }
}

/// Best sustained power for one duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerFrontierPoint {
    pub duration_sec: u32,
    pub watts: f64,
    pub pct_ftp: Option<f64>,
    pub watts_per_kg: Option<f64>,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    /// Window start, seconds from activity start
    pub window_start_sec: f64,
}

/// Best mechanical throughput for one multi-hour window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputPoint {
    pub window_sec: u32,
    pub average_watts: f64,
    pub kj_per_hour: f64,
    pub total_kj: f64,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub window_start_sec: f64,
}

/// Best efforts of a single activity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityEfforts {
    pub power: Vec<PowerFrontierPoint>,
    pub throughput: Vec<ThroughputPoint>,
}

/// Duration/power frontier across all analysed activities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerFrontier {
    /// Best point per duration, ascending duration
    pub points: Vec<PowerFrontierPoint>,
    /// Critical power curve: the log-log upper hull of `points`
    pub hull: Vec<PowerFrontierPoint>,
    /// Best throughput per multi-hour window, ascending window
    pub throughput: Vec<ThroughputPoint>,
    /// Highest kJ/hour across every throughput window
    pub peak_kj_per_hour: Option<ThroughputPoint>,
    pub activities_analyzed: usize,
}

impl PowerFrontier {
    /// Best point for an exact duration
    pub fn best_for(&self, duration_sec: u32) -> Option<&PowerFrontierPoint> {
        self.points.iter().find(|p| p.duration_sec == duration_sec)
    }
}

/// Search one activity for its best power at every configured duration
pub fn activity_efforts(
    meta: &ActivityMeta,
    series: &SampleSeries,
    config: &FrontierConfig,
    profile: &AthleteProfile,
) -> ActivityEfforts {
    let power = series.power_filled();
    let sums = prefix_sums(&power);
    let len = power.len();

    let power_points = config
        .durations_sec
        .iter()
        .filter_map(|&duration| {
            let window = series.window_samples(duration as f64);
            let best = best_window_in_prefix(&sums, window, 0, len, |_| true)?;
            Some(PowerFrontierPoint {
                duration_sec: duration,
                watts: best.average,
                pct_ftp: pct_of_ftp(best.average, profile.ftp()),
                watts_per_kg: watts_per_kg(best.average, profile.weight()),
                activity_id: meta.id.clone(),
                start_time: meta.start_time,
                window_start_sec: series.relative_t(best.start),
            })
        })
        .collect();

    let throughput = config
        .throughput_windows_sec
        .iter()
        .filter_map(|&window_sec| {
            let window = series.window_samples(window_sec as f64);
            let best = best_window_in_prefix(&sums, window, 0, len, |_| true)?;
            let kj_per_hour = finite(best.average * KJ_PER_HOUR_PER_WATT)?;
            Some(ThroughputPoint {
                window_sec,
                average_watts: best.average,
                kj_per_hour,
                total_kj: best.average * window_sec as f64 / 1000.0,
                activity_id: meta.id.clone(),
                start_time: meta.start_time,
                window_start_sec: series.relative_t(best.start),
            })
        })
        .collect();

    ActivityEfforts {
        power: power_points,
        throughput,
    }
}

/// Order-sensitive reduction of per-activity efforts.
///
/// Efforts must be merged in activity order; a later effort replaces the
/// incumbent only when strictly better, so ties keep the earlier activity.
#[derive(Debug, Default)]
pub struct FrontierBuilder {
    power: BTreeMap<u32, PowerFrontierPoint>,
    throughput: BTreeMap<u32, ThroughputPoint>,
    activities: usize,
}

impl FrontierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, efforts: ActivityEfforts) {
        self.activities += 1;
        for point in efforts.power {
            let replace = self
                .power
                .get(&point.duration_sec)
                .map_or(true, |current| point.watts > current.watts);
            if replace {
                self.power.insert(point.duration_sec, point);
            }
        }
        for point in efforts.throughput {
            let replace = self
                .throughput
                .get(&point.window_sec)
                .map_or(true, |current| point.average_watts > current.average_watts);
            if replace {
                self.throughput.insert(point.window_sec, point);
            }
        }
    }

    pub fn finish(self) -> PowerFrontier {
        let points: Vec<PowerFrontierPoint> = self.power.into_values().collect();
        let hull = critical_power_hull(&points);
        let throughput: Vec<ThroughputPoint> = self.throughput.into_values().collect();

        let mut peak_kj_per_hour: Option<ThroughputPoint> = None;
        for point in &throughput {
            if peak_kj_per_hour
                .as_ref()
                .map_or(true, |best| point.kj_per_hour > best.kj_per_hour)
            {
                peak_kj_per_hour = Some(point.clone());
            }
        }

        debug!(
            durations = points.len(),
            hull_points = hull.len(),
            activities = self.activities,
            "Duration/power frontier complete"
        );

        PowerFrontier {
            points,
            hull,
            throughput,
            peak_kj_per_hour,
            activities_analyzed: self.activities,
        }
    }
}

/// Indices of the upper convex hull of `(x, y)` points sorted by ascending `x`.
///
/// A point is dropped when the slope into it is not greater than the slope
/// out of it, leaving a chain of strictly decreasing slopes.
pub fn upper_hull(points: &[(f64, f64)]) -> Vec<usize> {
    let slope = |a: (f64, f64), b: (f64, f64)| (b.1 - a.1) / (b.0 - a.0);

    let mut stack: Vec<usize> = Vec::with_capacity(points.len());
    for (i, &point) in points.iter().enumerate() {
        while stack.len() >= 2 {
            let last = points[stack[stack.len() - 1]];
            let second = points[stack[stack.len() - 2]];
            if slope(second, last) <= slope(last, point) {
                stack.pop();
            } else {
                break;
            }
        }
        stack.push(i);
    }
    stack
}

/// Critical power curve: frontier points on the hull of `(ln duration, ln watts)`
pub fn critical_power_hull(points: &[PowerFrontierPoint]) -> Vec<PowerFrontierPoint> {
    let mut candidates: Vec<&PowerFrontierPoint> = points
        .iter()
        .filter(|p| p.duration_sec > 0 && p.watts > 0.0 && p.watts.is_finite())
        .collect();
    candidates.sort_by_key(|p| p.duration_sec);
    candidates.dedup_by_key(|p| p.duration_sec);

    let log_points: Vec<(f64, f64)> = candidates
        .iter()
        .map(|p| ((p.duration_sec as f64).ln(), p.watts.ln()))
        .collect();

    upper_hull(&log_points)
        .into_iter()
        .map(|i| candidates[i].clone())
        .collect()
}
