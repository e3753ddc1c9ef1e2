//! Interval repeatability
//!
//! Efforts held inside a target %FTP band are cut out of a ride, chained
//! into sequences when the rest between them is proportionate to the work,
//! and each sequence is summarised by how fast its power decays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::trace;

use crate::models::ActivityMeta;
use crate::power::{finite, pct_of_ftp};
use crate::series::SampleSeries;

/// A band of %FTP and a duration range defining one kind of interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatabilityTarget {
    pub key: String,
    pub min_pct: f64,
    pub max_pct: f64,
    pub min_duration_sec: f64,
    pub max_duration_sec: f64,
}

impl RepeatabilityTarget {
    pub fn new(
        key: &str,
        min_pct: f64,
        max_pct: f64,
        min_duration_sec: f64,
        max_duration_sec: f64,
    ) -> Self {
        Self {
            key: key.to_string(),
            min_pct,
            max_pct,
            min_duration_sec,
            max_duration_sec,
        }
    }

    fn contains_pct(&self, pct: f64) -> bool {
        pct >= self.min_pct && pct <= self.max_pct
    }

    fn accepts_duration(&self, duration_sec: f64) -> bool {
        duration_sec >= self.min_duration_sec && duration_sec <= self.max_duration_sec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatabilityConfig {
    pub targets: Vec<RepeatabilityTarget>,

    /// Shortest rest, as a multiple of the previous rep, that continues a sequence
    pub min_rest_ratio: f64,

    /// Longest rest, as a multiple of the previous rep, that continues a sequence
    pub max_rest_ratio: f64,

    /// Sequences with fewer reps are discarded
    pub min_reps: usize,

    /// Band around the first rep, in %FTP points, for the repeatability record
    pub consistency_band_pct: f64,
}

impl Default for RepeatabilityConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                RepeatabilityTarget::new("anaerobic", 121.0, 250.0, 30.0, 120.0),
                RepeatabilityTarget::new("vo2max", 106.0, 150.0, 120.0, 480.0),
                RepeatabilityTarget::new("threshold", 91.0, 105.0, 480.0, 1500.0),
            ],
            min_rest_ratio: 1.0,
            max_rest_ratio: 1.5,
            min_reps: 3,
            consistency_band_pct: 10.0,
        }
    }
}

/// A single qualifying effort inside a target band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatabilityInterval {
    pub start_sec: f64,
    pub end_sec: f64,
    pub avg_watts: f64,
    pub avg_pct_ftp: f64,
}

impl RepeatabilityInterval {
    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatabilitySequence {
    pub target_key: String,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub start_sec: f64,
    pub reps: usize,
    pub avg_pct_by_rep: Vec<f64>,
    pub avg_watts_by_rep: Vec<f64>,
    /// Least-squares slope of %FTP against rep index
    pub decay_slope: Option<f64>,
    pub drop_first_to_last: f64,
}

/// Longest run of leading reps that stayed close to the first rep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatabilityRecord {
    pub target_key: String,
    pub reps: usize,
    pub first_rep_pct_ftp: f64,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub sequence_start_sec: f64,
}

/// Scan a ride for intervals held inside `target`.
///
/// An interval opens on the first in-band sample and closes on the first
/// sample outside the band (or after the last sample). Missing power counts
/// as outside. Without FTP no sample can be in band.
pub fn detect_intervals(
    series: &SampleSeries,
    target: &RepeatabilityTarget,
    ftp: Option<f64>,
) -> Vec<RepeatabilityInterval> {
    let Some(ftp_watts) = ftp else {
        return Vec::new();
    };

    let mut intervals = Vec::new();
    // (start time, power sum, sample count)
    let mut open: Option<(f64, f64, usize)> = None;

    let close = |open: (f64, f64, usize),
                 end_sec: f64,
                 intervals: &mut Vec<RepeatabilityInterval>| {
        let (start_sec, sum, count) = open;
        let duration = end_sec - start_sec;
        if count == 0 || !target.accepts_duration(duration) {
            return;
        }
        let avg_watts = sum / count as f64;
        if let Some(avg_pct_ftp) = pct_of_ftp(avg_watts, Some(ftp_watts)) {
            intervals.push(RepeatabilityInterval {
                start_sec,
                end_sec,
                avg_watts,
                avg_pct_ftp,
            });
        }
    };

    for (i, sample) in series.samples().iter().enumerate() {
        let t = series.relative_t(i);
        let watts = sample.power.filter(|p| p.is_finite());
        let in_band = watts
            .and_then(|p| pct_of_ftp(p, Some(ftp_watts)))
            .map_or(false, |pct| target.contains_pct(pct));

        if in_band {
            let w = watts.unwrap_or(0.0);
            match open.as_mut() {
                Some(state) => {
                    state.1 += w;
                    state.2 += 1;
                }
                None => open = Some((t, w, 1)),
            }
        } else if let Some(state) = open.take() {
            close(state, t, &mut intervals);
        }
    }

    if let Some(state) = open.take() {
        let end = series.relative_t(series.len() - 1) + series.sample_period();
        close(state, end, &mut intervals);
    }

    trace!(target_key = %target.key, intervals = intervals.len(), "Intervals detected");
    intervals
}

/// Chain time-ordered intervals into sequences with proportionate rest
pub fn group_sequences(
    intervals: &[RepeatabilityInterval],
    config: &RepeatabilityConfig,
) -> Vec<Vec<RepeatabilityInterval>> {
    let mut groups: Vec<Vec<RepeatabilityInterval>> = Vec::new();
    for interval in intervals {
        let continues = groups.last().and_then(|g| g.last()).map_or(false, |prev| {
            let rest = interval.start_sec - prev.end_sec;
            let work = prev.duration_sec();
            rest >= config.min_rest_ratio * work && rest <= config.max_rest_ratio * work
        });
        if continues {
            if let Some(group) = groups.last_mut() {
                group.push(interval.clone());
            }
        } else {
            groups.push(vec![interval.clone()]);
        }
    }
    groups.retain(|g| g.len() >= config.min_reps.max(1));
    groups
}

/// Least-squares slope of `values` against their index
pub fn decay_slope(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let x_mean = xs.iter().mean();
    let y_mean = values.iter().mean();

    let (covariance, variance) = xs
        .iter()
        .zip(values)
        .fold((0.0, 0.0), |(cov, var), (x, y)| {
            (cov + (x - x_mean) * (y - y_mean), var + (x - x_mean).powi(2))
        });
    if variance <= 0.0 {
        return None;
    }
    finite(covariance / variance)
}

/// Sequences of every target found in one ride
pub fn activity_sequences(
    meta: &ActivityMeta,
    series: &SampleSeries,
    config: &RepeatabilityConfig,
    ftp: Option<f64>,
) -> Vec<RepeatabilitySequence> {
    let mut sequences = Vec::new();
    for target in &config.targets {
        let intervals = detect_intervals(series, target, ftp);
        for group in group_sequences(&intervals, config) {
            let avg_pct_by_rep: Vec<f64> = group.iter().map(|i| i.avg_pct_ftp).collect();
            let avg_watts_by_rep: Vec<f64> = group.iter().map(|i| i.avg_watts).collect();
            let first = avg_pct_by_rep[0];
            let last = avg_pct_by_rep[avg_pct_by_rep.len() - 1];
            sequences.push(RepeatabilitySequence {
                target_key: target.key.clone(),
                activity_id: meta.id.clone(),
                start_time: meta.start_time,
                start_sec: group[0].start_sec,
                reps: group.len(),
                decay_slope: decay_slope(&avg_pct_by_rep),
                drop_first_to_last: last - first,
                avg_pct_by_rep,
                avg_watts_by_rep,
            });
        }
    }
    sequences
}

/// Leading reps within `band` %FTP points of the first rep
fn consistent_leading_reps(sequence: &RepeatabilitySequence, band: f64) -> usize {
    let Some(&first) = sequence.avg_pct_by_rep.first() else {
        return 0;
    };
    sequence
        .avg_pct_by_rep
        .iter()
        .take_while(|pct| (**pct - first).abs() <= band)
        .count()
}

/// Best repeatability record per target, in target order.
///
/// Ties keep the earlier sequence.
pub fn repeatability_records(
    sequences: &[RepeatabilitySequence],
    config: &RepeatabilityConfig,
) -> Vec<RepeatabilityRecord> {
    config
        .targets
        .iter()
        .filter_map(|target| {
            let mut best: Option<RepeatabilityRecord> = None;
            for sequence in sequences.iter().filter(|s| s.target_key == target.key) {
                let reps = consistent_leading_reps(sequence, config.consistency_band_pct);
                if best.as_ref().map_or(true, |b| reps > b.reps) {
                    best = Some(RepeatabilityRecord {
                        target_key: target.key.clone(),
                        reps,
                        first_rep_pct_ftp: sequence.avg_pct_by_rep[0],
                        activity_id: sequence.activity_id.clone(),
                        start_time: sequence.start_time,
                        sequence_start_sec: sequence.start_sec,
                    });
                }
            }
            best
        })
        .collect()
}
