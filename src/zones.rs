//! Zone-dwell streaks
//!
//! For each power zone, finds the longest stretch of a ride spent in that
//! zone, tolerating brief excursions, on a smoothed power trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use crate::models::ActivityMeta;
use crate::power::{mean, pct_of_ftp, valid_heart_rate_in, valid_power_in};
use crate::rolling::trailing_means;
use crate::series::SampleSeries;

/// A power zone as a `[min_pct, max_pct)` band of FTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneBand {
    pub key: String,
    pub min_pct: f64,
    pub max_pct: f64,
}

impl ZoneBand {
    pub fn new(key: &str, min_pct: f64, max_pct: f64) -> Self {
        Self {
            key: key.to_string(),
            min_pct,
            max_pct,
        }
    }

    fn contains(&self, pct: f64) -> bool {
        pct >= self.min_pct && pct < self.max_pct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneStreakConfig {
    /// Zone bands, searched independently
    pub zones: Vec<ZoneBand>,

    /// Rolling average length applied before zone classification
    pub smoothing_sec: f64,

    /// Largest share of out-of-zone samples a streak may contain
    pub tolerance: f64,

    /// Streaks shorter than this are not reported; zero keeps every streak
    pub min_streak_sec: f64,
}

impl Default for ZoneStreakConfig {
    /// Zone bounds based on FTP:
    /// - Z1: < 55% FTP (Active Recovery)
    /// - Z2: 55-75% FTP (Endurance)
    /// - Z3: 75-90% FTP (Tempo)
    /// - Z4: 90-105% FTP (Lactate Threshold)
    /// - Z5: 105-120% FTP (VO2 Max)
    /// - Z6: 120-150% FTP (Anaerobic Capacity)
    fn default() -> Self {
        Self {
            zones: vec![
                ZoneBand::new("z1", 0.0, 55.0),
                ZoneBand::new("z2", 55.0, 75.0),
                ZoneBand::new("z3", 75.0, 90.0),
                ZoneBand::new("z4", 90.0, 105.0),
                ZoneBand::new("z5", 105.0, 120.0),
                ZoneBand::new("z6", 120.0, 150.0),
            ],
            smoothing_sec: 30.0,
            tolerance: 0.05,
            min_streak_sec: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStreak {
    pub zone_key: String,
    pub min_pct: f64,
    pub max_pct: f64,
    pub duration_sec: f64,
    pub average_watts: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub activity_id: String,
    pub start_time: DateTime<Utc>,
    pub start_sec: f64,
}

/// Greedy tolerant streaks over an in-zone mask, as `[start, end)` index ranges.
///
/// A streak grows while its out-of-zone share stays within `tolerance`; the
/// sample that would break the tolerance is left out and the streak closed.
/// Trailing out-of-zone samples are trimmed. The search resumes after the
/// closed streak, or one sample later when none formed.
pub fn tolerant_streaks(in_zone: &[bool], tolerance: f64) -> Vec<(usize, usize)> {
    let n = in_zone.len();
    let mut streaks = Vec::new();
    let mut start = 0;

    while start < n {
        let mut end = start;
        let mut misses = 0usize;
        while end < n {
            let miss = usize::from(!in_zone[end]);
            let len = end - start + 1;
            if (misses + miss) as f64 > tolerance * len as f64 {
                break;
            }
            misses += miss;
            end += 1;
        }

        let mut trimmed = end;
        while trimmed > start && !in_zone[trimmed - 1] {
            trimmed -= 1;
        }

        if trimmed > start {
            streaks.push((start, trimmed));
            start = end;
        } else {
            start += 1;
        }
    }
    streaks
}

/// Longest streak per zone in one ride, in zone order
pub fn activity_streaks(
    meta: &ActivityMeta,
    series: &SampleSeries,
    config: &ZoneStreakConfig,
    ftp: Option<f64>,
) -> Vec<ZoneStreak> {
    if ftp.is_none() {
        return Vec::new();
    }
    let window = series.window_samples(config.smoothing_sec);
    let smoothed = trailing_means(&series.power_filled(), window);
    let pct: Vec<Option<f64>> = smoothed.iter().map(|w| pct_of_ftp(*w, ftp)).collect();

    config
        .zones
        .iter()
        .filter_map(|zone| {
            let mask: Vec<bool> = pct
                .iter()
                .map(|p| p.map_or(false, |v| zone.contains(v)))
                .collect();

            let mut longest: Option<(f64, usize, usize)> = None;
            for (start, end) in tolerant_streaks(&mask, config.tolerance) {
                let duration = series.relative_t(end - 1) - series.relative_t(start)
                    + series.sample_period();
                if duration < config.min_streak_sec {
                    continue;
                }
                if longest.map_or(true, |(best, _, _)| duration > best) {
                    longest = Some((duration, start, end));
                }
            }

            let (duration_sec, start, end) = longest?;
            trace!(zone = %zone.key, duration_sec, "Zone streak");
            Some(ZoneStreak {
                zone_key: zone.key.clone(),
                min_pct: zone.min_pct,
                max_pct: zone.max_pct,
                duration_sec,
                average_watts: mean(&valid_power_in(series, start, end)),
                average_heart_rate: mean(&valid_heart_rate_in(series, start, end)),
                activity_id: meta.id.clone(),
                start_time: meta.start_time,
                start_sec: series.relative_t(start),
            })
        })
        .collect()
}

/// Longest streak per zone across rides, merged in ride order.
///
/// A later ride replaces the incumbent only with a strictly longer streak.
pub fn longest_streaks(
    per_activity: Vec<Vec<ZoneStreak>>,
    config: &ZoneStreakConfig,
) -> Vec<ZoneStreak> {
    let mut best: HashMap<String, ZoneStreak> = HashMap::new();
    for streak in per_activity.into_iter().flatten() {
        let replace = best
            .get(&streak.zone_key)
            .map_or(true, |current| streak.duration_sec > current.duration_sec);
        if replace {
            best.insert(streak.zone_key.clone(), streak);
        }
    }
    config
        .zones
        .iter()
        .filter_map(|zone| best.remove(&zone.key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;
    use chrono::TimeZone;

    fn meta(id: &str) -> ActivityMeta {
        ActivityMeta {
            id: id.to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 8, 20, 18, 0, 0).unwrap(),
            duration_sec: 0.0,
            source: None,
            sample_rate_hz: Some(1.0),
        }
    }

    fn series_from(power: &[f64]) -> SampleSeries {
        let samples = power
            .iter()
            .enumerate()
            .map(|(i, &p)| Sample {
                heart_rate: Some(145.0),
                ..Sample::with_power(i as f64, p)
            })
            .collect();
        SampleSeries::from_ordered(samples, 1.0).unwrap()
    }

    /// Streaks with the default zones at FTP 250
    fn default_streaks(id: &str, series: &SampleSeries) -> Vec<ZoneStreak> {
        activity_streaks(&meta(id), series, &ZoneStreakConfig::default(), Some(250.0))
    }

    #[test]
    fn test_tolerant_streaks_absorb_brief_excursions() {
        let mut mask = vec![true; 100];
        mask[50] = false;
        mask[51] = false;
        assert_eq!(tolerant_streaks(&mask, 0.05), vec![(0, 100)]);
    }

    #[test]
    fn test_tolerant_streaks_break_on_long_excursions() {
        let mut mask = vec![true; 40];
        mask.extend(vec![false; 10]);
        mask.extend(vec![true; 20]);
        let streaks = tolerant_streaks(&mask, 0.05);
        assert_eq!(streaks[0], (0, 40));
        assert_eq!(*streaks.last().unwrap(), (50, 70));
    }

    #[test]
    fn test_tolerant_streaks_zero_tolerance() {
        let mask = vec![true, true, false, true];
        assert_eq!(tolerant_streaks(&mask, 0.0), vec![(0, 2), (3, 4)]);
        assert!(tolerant_streaks(&[false, false], 0.05).is_empty());
    }

    #[test]
    fn test_constant_trace_at_zone_midpoint() {
        // 200 W at FTP 250 is 80%, the middle of the tempo band
        let series = series_from(&vec![200.0; 3600]);
        let streaks = default_streaks("tempo", &series);

        assert_eq!(streaks.len(), 1);
        let tempo = &streaks[0];
        assert_eq!(tempo.zone_key, "z3");
        assert!((tempo.duration_sec - 3600.0).abs() <= 30.0);
        assert_eq!(tempo.average_watts, Some(200.0));
        assert_eq!(tempo.average_heart_rate, Some(145.0));
    }

    #[test]
    fn test_zone_change_edges() {
        let mut power = vec![150.0; 1200];
        power.extend(vec![240.0; 1200]);
        let series = series_from(&power);
        let streaks = default_streaks("steps", &series);

        let z2 = streaks.iter().find(|s| s.zone_key == "z2").unwrap();
        let z4 = streaks.iter().find(|s| s.zone_key == "z4").unwrap();
        assert!((z2.duration_sec - 1200.0).abs() <= 30.0);
        assert!((z4.duration_sec - 1200.0).abs() <= 30.0);
        assert!(z4.start_sec >= 1200.0);
    }

    #[test]
    fn test_short_streak_is_reported_by_default() {
        // 50 s at 80% FTP
        let series = series_from(&vec![200.0; 50]);
        let streaks = default_streaks("short", &series);

        assert_eq!(streaks.len(), 1);
        assert_eq!(streaks[0].zone_key, "z3");
        assert_eq!(streaks[0].duration_sec, 50.0);
    }

    #[test]
    fn test_min_streak_filter_is_opt_in() {
        let series = series_from(&vec![200.0; 50]);
        let config = ZoneStreakConfig {
            min_streak_sec: 60.0,
            ..Default::default()
        };
        assert!(activity_streaks(&meta("short"), &series, &config, Some(250.0)).is_empty());
    }

    #[test]
    fn test_no_ftp_no_streaks() {
        let series = series_from(&vec![200.0; 600]);
        let config = ZoneStreakConfig::default();
        assert!(activity_streaks(&meta("raw"), &series, &config, None).is_empty());
    }

    #[test]
    fn test_longest_streaks_keep_earlier_on_tie() {
        let config = ZoneStreakConfig::default();
        let a = activity_streaks(&meta("a"), &series_from(&vec![200.0; 600]), &config, Some(250.0));
        let b = activity_streaks(&meta("b"), &series_from(&vec![200.0; 600]), &config, Some(250.0));
        let c = activity_streaks(&meta("c"), &series_from(&vec![100.0; 900]), &config, Some(250.0));
        let merged = longest_streaks(vec![a, b, c], &config);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].zone_key, "z1");
        assert_eq!(merged[0].activity_id, "c");
        assert_eq!(merged[1].zone_key, "z3");
        assert_eq!(merged[1].activity_id, "a");
    }
}
