use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use ridelab::durability::{durability_score, fatigue_efforts, DurabilityConfig, ScoreInputs};
use ridelab::frontier::upper_hull;
use ridelab::models::{ActivityMeta, AthleteProfile, Sample};
use ridelab::rolling::{best_window, best_window_where};
use ridelab::series::SampleSeries;
use ridelab::zones::tolerant_streaks;

fn brute_force_best(values: &[f64], window: usize) -> Option<(f64, usize)> {
    if window == 0 || window > values.len() {
        return None;
    }
    let mut best: Option<(f64, usize)> = None;
    for start in 0..=values.len() - window {
        let average = values[start..start + window].iter().sum::<f64>() / window as f64;
        if best.map_or(true, |(b, _)| average > b + 1e-9) {
            best = Some((average, start));
        }
    }
    best
}

fn slope(a: (f64, f64), b: (f64, f64)) -> f64 {
    (b.1 - a.1) / (b.0 - a.0)
}

/// `(ln duration, ln watts)` with strictly increasing durations
fn frontier_points() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((1u32..600, 50.0f64..1500.0), 0..20).prop_map(|raw| {
        let mut duration = 0.0;
        raw.into_iter()
            .map(|(step, watts)| {
                duration += f64::from(step);
                (f64::ln(duration), f64::ln(watts))
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn test_rolling_best_matches_brute_force(
        values in prop::collection::vec(0u16..1500u16, 1..200),
        window in 1usize..60,
    ) {
        // Integer watts keep every window sum exact
        let values: Vec<f64> = values.into_iter().map(f64::from).collect();
        let fast = best_window(&values, window).map(|b| (b.average, b.start));
        let slow = brute_force_best(&values, window);

        match (fast, slow) {
            (None, None) => {}
            (Some((fa, fs)), Some((sa, ss))) => {
                prop_assert!((fa - sa).abs() < 1e-9);
                prop_assert_eq!(fs, ss);
            }
            _ => prop_assert!(false, "one search found a window, the other did not"),
        }
    }

    #[test]
    fn test_restricted_search_never_beats_unrestricted(
        values in prop::collection::vec(0u16..1500u16, 1..200),
        window in 1usize..60,
        min_start in 0usize..200,
    ) {
        let values: Vec<f64> = values.into_iter().map(f64::from).collect();
        if let Some(restricted) = best_window_where(&values, window, |start| start >= min_start) {
            let unrestricted = best_window(&values, window).unwrap();
            prop_assert!(restricted.start >= min_start);
            prop_assert!(restricted.average <= unrestricted.average + 1e-9);
        }
    }

    #[test]
    fn test_hull_is_ordered_concave_subset(points in frontier_points()) {
        let hull = upper_hull(&points);

        prop_assert!(hull.windows(2).all(|w| w[0] < w[1]));
        if !points.is_empty() {
            prop_assert_eq!(hull[0], 0);
            prop_assert_eq!(*hull.last().unwrap(), points.len() - 1);
        }

        let kept: Vec<(f64, f64)> = hull.iter().map(|&i| points[i]).collect();
        for w in kept.windows(3) {
            prop_assert!(slope(w[0], w[1]) > slope(w[1], w[2]));
        }

        // Hull of the hull is the hull
        let again = upper_hull(&kept);
        prop_assert_eq!(again, (0..kept.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_score_is_bounded(
        early in prop::option::of(-50.0f64..400.0),
        late in prop::option::of(-50.0f64..400.0),
        drift in prop::option::of(-100.0f64..300.0),
        late_best in prop::option::of(0.0f64..1000.0),
    ) {
        let score = durability_score(&ScoreInputs {
            early_np_pct_ftp: early,
            late_np_pct_ftp: late,
            hr_drift_pct: drift,
            best_late_pct_ftp: late_best,
        });
        prop_assert!(score <= 100);
    }

    #[test]
    fn test_fatigue_best_never_exceeds_fresh_best(
        power in prop::collection::vec(0u16..900u16, 400..1500),
    ) {
        let samples: Vec<Sample> = power
            .iter()
            .enumerate()
            .map(|(i, &p)| Sample::with_power(i as f64, f64::from(p)))
            .collect();
        let series = SampleSeries::from_ordered(samples, 1.0).unwrap();
        let meta = ActivityMeta {
            id: "prop".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            duration_sec: power.len() as f64,
            source: None,
            sample_rate_hz: Some(1.0),
        };
        let config = DurabilityConfig {
            fatigue_kj: vec![10, 50, 100],
            fatigue_durations_sec: vec![30, 120],
            ..Default::default()
        };

        for effort in fatigue_efforts(&meta, &series, &config, &AthleteProfile::default()) {
            let fresh = effort.fresh_watts.unwrap();
            prop_assert!(effort.watts <= fresh + 1e-9);
            prop_assert!(effort.delta_watts.unwrap() <= 1e-9);
        }
    }

    #[test]
    fn test_streaks_respect_tolerance(
        mask in prop::collection::vec(any::<bool>(), 0..300),
        tolerance in 0.0f64..0.3,
    ) {
        let streaks = tolerant_streaks(&mask, tolerance);
        let mut previous_end = 0;
        for (start, end) in streaks {
            prop_assert!(start >= previous_end && start < end);
            prop_assert!(mask[start] && mask[end - 1]);
            let misses = mask[start..end].iter().filter(|m| !**m).count();
            prop_assert!(misses as f64 <= tolerance * (end - start) as f64 + 1e-9);
            previous_end = end;
        }
    }
}
