use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;

use ridelab::adaptation::FtpSource;
use ridelab::durability::SegmentLabel;
use ridelab::models::{
    Activity, ActivityBatch, ActivityMeta, ActivitySummary, AthleteProfile, Sample, SummaryBatch,
};
use ridelab::snapshot::{merge_snapshot, InMemoryRecordStore, RecordStore, Snapshot};
use ridelab::{analyze_adaptation, analyze_durability, analyze_frontiers, AnalyticsConfig};

/// Integration tests that exercise the complete analysis workflows

fn profile() -> AthleteProfile {
    AthleteProfile {
        ftp_watts: Some(250.0),
        weight_kg: Some(72.0),
        hr_max_bpm: Some(188.0),
        hr_rest_bpm: Some(48.0),
    }
}

fn ride(id: &str, power: &[f64], heart_rate: impl Fn(usize) -> f64) -> Activity {
    Activity {
        meta: ActivityMeta {
            id: id.to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 6, 1, 7, 30, 0).unwrap(),
            duration_sec: power.len() as f64,
            source: Some("integration".to_string()),
            sample_rate_hz: None,
        },
        samples: power
            .iter()
            .enumerate()
            .map(|(i, &p)| Sample {
                t: i as f64,
                power: Some(p),
                heart_rate: Some(heart_rate(i)),
                cadence: Some(90.0),
                speed: Some(9.0),
            })
            .collect(),
    }
}

/// Warm-up, five 5-minute efforts at 300 W with 6 minutes easy between, cool-down
fn interval_ride() -> Vec<f64> {
    let mut power = vec![150.0; 600];
    for _ in 0..5 {
        power.extend(vec![300.0; 300]);
        power.extend(vec![150.0; 360]);
    }
    power.extend(vec![150.0; 600]);
    power
}

fn summary(id: &str, day: u32, hours: f64, np: f64, avg: f64) -> ActivitySummary {
    ActivitySummary {
        id: id.to_string(),
        date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        duration_sec: hours * 3600.0,
        normalized_power: Some(np),
        average_power: Some(avg),
        kilojoules: None,
    }
}

fn adaptation_fixture() -> SummaryBatch {
    SummaryBatch {
        profile: AthleteProfile::default(),
        summaries: vec![
            summary("d1", 1, 1.0, 190.0, 180.0),
            summary("d2", 2, 1.5, 210.0, 200.0),
            summary("d3", 3, 2.0, 230.0, 220.0),
            summary("d4", 4, 1.0, 160.0, 150.0),
        ],
    }
}

#[test]
fn test_durability_workflow_on_drifting_ride() {
    // Three hours at 200 W while heart rate creeps from 130 to 150 bpm
    let len = 10_800;
    let activity = ride("long", &vec![200.0; len], |i| 130.0 + 20.0 * i as f64 / len as f64);
    let batch = ActivityBatch {
        profile: profile(),
        activities: vec![activity],
    };
    let response = analyze_durability(&batch, &AnalyticsConfig::default());

    assert_eq!(response.rides.len(), 1);
    let ride = &response.rides[0].durability;
    assert_eq!(ride.segments.len(), 3);

    let early = ride.segment(SegmentLabel::Early).unwrap();
    let late = ride.segment(SegmentLabel::Late).unwrap();
    assert_eq!(early.end_sec, 3240.0);
    assert!((late.start_sec - 7560.0).abs() < 1e-6);
    assert!(late.average_heart_rate.unwrap() > early.average_heart_rate.unwrap());

    let drift = ride.hr_drift_pct.unwrap();
    assert!(drift > 8.0 && drift < 12.0, "drift was {drift}");
    assert!(ride.score < 100 && ride.score > 80, "score was {}", ride.score);

    // Constant power: every fatigue effort equals the fresh effort
    assert!(!ride.fatigue_efforts.is_empty());
    for effort in &ride.fatigue_efforts {
        assert!((effort.watts - 200.0).abs() < 1e-9);
        assert!(effort.delta_watts.unwrap().abs() < 1e-9);
    }

    // 1500 kJ are reached after 7500 s, leaving 3300 s at IF 0.8
    let expected_durable = 3300.0 / 3600.0 * 0.64 * 100.0;
    assert!((ride.durable_tss.unwrap() - expected_durable).abs() < 0.1);

    assert!(response.rides[0].series.len() <= 600);
    assert_eq!(response.mean_score, Some(f64::from(ride.score)));
}

#[test]
fn test_frontier_workflow_on_interval_session() {
    let power = interval_ride();
    let batch = ActivityBatch {
        profile: profile(),
        activities: vec![ride("vo2", &power, |_| 140.0), ride("blank", &[], |_| 0.0)],
    };
    let response = analyze_frontiers(&batch, &AnalyticsConfig::default());

    assert_eq!(response.skipped_activities, vec!["blank".to_string()]);
    assert_eq!(response.frontier.activities_analyzed, 1);

    let five_min = response.frontier.best_for(300).unwrap();
    assert!((five_min.watts - 300.0).abs() < 1e-9);
    assert_eq!(five_min.window_start_sec, 600.0);
    assert!((five_min.watts_per_kg.unwrap() - 300.0 / 72.0).abs() < 1e-9);

    // Hull is an ordered subset of the frontier
    let durations: Vec<u32> = response.frontier.hull.iter().map(|p| p.duration_sec).collect();
    assert!(durations.windows(2).all(|w| w[0] < w[1]));
    assert!(durations.iter().all(|d| response.frontier.best_for(*d).is_some()));

    let vo2: Vec<_> = response
        .repeatability_sequences
        .iter()
        .filter(|s| s.target_key == "vo2max")
        .collect();
    assert_eq!(vo2.len(), 1);
    assert_eq!(vo2[0].reps, 5);
    assert!(vo2[0].decay_slope.unwrap().abs() < 1e-6);

    let record = response
        .repeatability_records
        .iter()
        .find(|r| r.target_key == "vo2max")
        .unwrap();
    assert_eq!(record.reps, 5);
    assert_eq!(record.activity_id, "vo2");

    assert!(response.zone_streaks.iter().any(|s| s.zone_key == "z2"));
    // Session is shorter than every efficiency and throughput window
    assert!(response.efficiency_windows.is_empty());
    assert!(response.frontier.peak_kj_per_hour.is_none());
}

#[test]
fn test_json_document_with_unordered_samples() {
    let document = r#"{
        "profile": {"ftpWatts": 200},
        "activities": [{
            "meta": {"id": "json-ride", "startTime": "2024-02-03T09:00:00Z", "durationSec": 12},
            "samples": [
                {"t": 5, "power": 400}, {"t": 0, "power": 100}, {"t": 1, "power": 100},
                {"t": 2, "power": 100}, {"t": 3, "power": 400}, {"t": 4, "power": 400},
                {"t": 6, "power": 400}, {"t": 7, "power": 400}, {"t": 8, "power": null},
                {"t": 9, "power": 100}, {"t": 10, "power": 100}, {"t": 11, "power": 100}
            ]
        }]
    }"#;
    let batch: ActivityBatch = serde_json::from_str(document).unwrap();
    let response = analyze_frontiers(&batch, &AnalyticsConfig::default());

    let five = response.frontier.best_for(5).unwrap();
    assert_eq!(five.watts, 400.0);
    assert_eq!(five.window_start_sec, 3.0);
    assert_eq!(five.pct_ftp, Some(200.0));
    // Longer than the ride: no point
    assert!(response.frontier.best_for(15).is_none());
}

#[test]
fn test_adaptation_fixture() {
    let response = analyze_adaptation(&adaptation_fixture(), &AnalyticsConfig::default());

    let ftp = response.ftp_estimate.unwrap();
    assert_eq!(ftp.source, FtpSource::Estimated);
    assert_eq!(ftp.watts, 230.0);

    assert_eq!(response.daily.len(), 4);
    // Only 3- and 4-day blocks fit into four days of history
    assert_eq!(response.best_tss_blocks.len(), 2);
    assert_eq!(response.best_kj_blocks.len(), 2);

    let tss = &response.best_tss_blocks[0];
    assert_eq!(tss.window_days, 3);
    assert_eq!(tss.start, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    assert_eq!(tss.end, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
    assert!((tss.total_metric.to_f64().unwrap() - 393.29).abs() < 0.1);
    assert_eq!(tss.activity_ids, vec!["d1", "d2", "d3"]);

    let kj = &response.best_kj_blocks[0];
    assert_eq!(kj.start, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    assert_eq!(kj.total_metric.to_f64().unwrap(), 3312.0);

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["bestKjBlocks"][0]["totalMetric"].as_f64(), Some(3312.0));
    assert_eq!(json["ftpEstimate"]["source"], "estimated");
}

#[test]
fn test_adaptation_with_rest_days_and_profile_ftp() {
    let batch = SummaryBatch {
        profile: AthleteProfile {
            ftp_watts: Some(250.0),
            ..Default::default()
        },
        summaries: vec![
            summary("a", 1, 1.0, 250.0, 240.0),
            summary("b", 9, 1.0, 250.0, 240.0),
            summary("c", 10, 1.0, 250.0, 240.0),
        ],
    };
    let response = analyze_adaptation(&batch, &AnalyticsConfig::default());

    assert_eq!(response.ftp_estimate.unwrap().source, FtpSource::Profile);
    assert_eq!(response.daily.len(), 10);
    assert!(response.daily[4].activity_ids.is_empty());

    let three_day = &response.best_tss_blocks[0];
    assert_eq!(three_day.start, NaiveDate::from_ymd_opt(2024, 5, 8).unwrap());
    assert_eq!(three_day.activity_ids, vec!["b", "c"]);
    assert!((three_day.total_metric.to_f64().unwrap() - 200.0).abs() < 1e-6);
}

#[test]
fn test_snapshots_merge_into_one_record() {
    let config = AnalyticsConfig::default();
    let batch = ActivityBatch {
        profile: profile(),
        activities: vec![ride("vo2", &interval_ride(), |_| 140.0)],
    };
    let store = InMemoryRecordStore::new();
    let retries = config.execution.max_merge_retries;

    let durability = analyze_durability(&batch, &config);
    merge_snapshot(&store, "rider-7", Snapshot::from(&durability), retries).unwrap();
    let frontiers = analyze_frontiers(&batch, &config);
    merge_snapshot(&store, "rider-7", Snapshot::from(&frontiers), retries).unwrap();
    let adaptation = analyze_adaptation(&adaptation_fixture(), &config);
    let record = merge_snapshot(&store, "rider-7", Snapshot::from(&adaptation), retries).unwrap();

    assert_eq!(record.version, 3);
    assert_eq!(record.durability.as_ref().unwrap().rides_analyzed, 1);
    assert_eq!(record.frontiers.as_ref().unwrap().hull_points, frontiers.frontier.hull.len());
    assert_eq!(record.adaptation.as_ref().unwrap().ftp_watts, Some(230.0));
    assert_eq!(store.load("rider-7").unwrap(), Some(record));
}
