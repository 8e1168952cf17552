use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use secado_core::matcher::{IntervalMatcher, MatchMode};
use secado_core::types::{LabBatchRecord, Plant, SensorReading, SourceInfo};

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("valid test timestamp")
}

fn reading(sensor: Option<u32>, timestamp: Option<NaiveDateTime>) -> SensorReading {
    SensorReading {
        timestamp,
        plant: Plant::Jpv,
        year: Some(2024),
        sensor_id: sensor,
        variable: "VOLT_HUME".to_string(),
        value: Some(45.2),
        source: Arc::new(SourceInfo::default()),
        extras: Vec::new(),
    }
}

fn batch(sensor: Option<u32>, id: &str, start: NaiveDateTime, end: NaiveDateTime) -> LabBatchRecord {
    LabBatchRecord {
        plant: Plant::Jpv,
        year: 2024,
        sensor_id: sensor,
        variety: Some("Merin".to_string()),
        batch_id: Some(id.to_string()),
        start,
        end,
        initial_humidity: Some(21.5),
        final_humidity: Some(13.0),
        discard: None,
    }
}

fn batch_ids(outcome: &secado_core::matcher::MatchOutcome) -> Vec<Option<String>> {
    outcome
        .matched
        .iter()
        .map(|item| item.lab.as_ref().and_then(|lab| lab.batch_id.clone()))
        .collect()
}

#[test]
fn interval_bounds_are_inclusive() {
    let lab = vec![batch(Some(2), "B1", at(9, 0), at(14, 0))];
    let readings = vec![
        reading(Some(2), Some(at(9, 0))),
        reading(Some(2), Some(at(14, 0))),
        reading(Some(2), Some(at(14, 0) + Duration::seconds(1))),
        reading(Some(2), Some(at(8, 59))),
    ];

    let outcome = IntervalMatcher::new(MatchMode::SensorAware).match_readings(&readings, &lab);

    assert_eq!(
        batch_ids(&outcome),
        vec![Some("B1".to_string()), Some("B1".to_string()), None, None]
    );
    assert_eq!(outcome.report.matched, 2);
    assert_eq!(outcome.report.unmatched, 2);
}

#[test]
fn sub_second_readings_are_floored_before_comparison() {
    let lab = vec![batch(Some(2), "B1", at(9, 0), at(14, 0))];
    let readings = vec![reading(Some(2), Some(at(14, 0) + Duration::milliseconds(500)))];

    let outcome = IntervalMatcher::default().match_readings(&readings, &lab);

    assert_eq!(batch_ids(&outcome), vec![Some("B1".to_string())]);
}

#[test]
fn overlapping_intervals_go_to_latest_start() {
    let lab = vec![
        batch(Some(2), "EARLY", at(9, 0), at(14, 0)),
        batch(Some(2), "LATE", at(11, 0), at(16, 0)),
    ];
    let readings = vec![
        reading(Some(2), Some(at(10, 0))),
        reading(Some(2), Some(at(12, 0))),
        reading(Some(2), Some(at(15, 0))),
    ];

    let outcome = IntervalMatcher::new(MatchMode::SensorAware).match_readings(&readings, &lab);

    assert_eq!(
        batch_ids(&outcome),
        vec![
            Some("EARLY".to_string()),
            Some("LATE".to_string()),
            Some("LATE".to_string())
        ]
    );
    assert_eq!(outcome.report.overlapping_intervals, 1);
}

#[test]
fn equal_starts_prefer_the_later_record() {
    let lab = vec![
        batch(Some(2), "FIRST", at(9, 0), at(14, 0)),
        batch(Some(2), "SECOND", at(9, 0), at(12, 0)),
    ];

    let inside = IntervalMatcher::default().match_readings(&[reading(Some(2), Some(at(10, 0)))], &lab);
    assert_eq!(batch_ids(&inside), vec![Some("SECOND".to_string())]);

    // The winning interval has ended; the earlier record is not consulted.
    let after = IntervalMatcher::default().match_readings(&[reading(Some(2), Some(at(13, 0)))], &lab);
    assert_eq!(batch_ids(&after), vec![None]);
}

#[test]
fn readings_between_batches_stay_unmatched() {
    let lab = vec![
        batch(Some(2), "B1", at(9, 0), at(10, 0)),
        batch(Some(2), "B2", at(12, 0), at(13, 0)),
    ];
    let outcome =
        IntervalMatcher::default().match_readings(&[reading(Some(2), Some(at(11, 0)))], &lab);

    assert_eq!(batch_ids(&outcome), vec![None]);
    assert_eq!(outcome.report.overlapping_intervals, 0);
}

#[test]
fn sensor_aware_matching_keeps_sensors_apart() {
    let lab = vec![
        batch(Some(3), "S3", at(9, 0), at(14, 0)),
        batch(None, "ANY", at(9, 0), at(14, 0)),
    ];
    let outcome =
        IntervalMatcher::new(MatchMode::SensorAware).match_readings(&[reading(Some(2), Some(at(10, 0)))], &lab);

    assert_eq!(batch_ids(&outcome), vec![None]);
}

#[test]
fn time_only_matching_ignores_sensor_ids() {
    let lab = vec![batch(None, "ALL", at(9, 0), at(14, 0))];
    let readings = vec![
        reading(Some(2), Some(at(10, 0))),
        reading(Some(5), Some(at(11, 0))),
    ];

    let outcome = IntervalMatcher::new(MatchMode::TimeOnly).match_readings(&readings, &lab);

    assert_eq!(
        batch_ids(&outcome),
        vec![Some("ALL".to_string()), Some("ALL".to_string())]
    );
}

#[test]
fn null_sensor_or_timestamp_is_never_matched() {
    let lab = vec![batch(None, "ALL", at(0, 0), at(23, 0))];
    let readings = vec![reading(None, Some(at(10, 0))), reading(Some(2), None)];

    for mode in [MatchMode::SensorAware, MatchMode::TimeOnly] {
        let outcome = IntervalMatcher::new(mode).match_readings(&readings, &lab);
        assert_eq!(batch_ids(&outcome), vec![None, None], "{mode:?}");
        assert_eq!(outcome.report.null_sensor, 1);
        assert_eq!(outcome.report.null_timestamp, 1);
        assert_eq!(outcome.report.unmatched, 2);
    }
}

#[test]
fn empty_lab_leaves_everything_unmatched() {
    let readings = vec![reading(Some(2), Some(at(10, 0))), reading(Some(3), Some(at(11, 0)))];
    let outcome = IntervalMatcher::default().match_readings(&readings, &[]);

    assert_eq!(outcome.matched.len(), 2);
    assert!(outcome.matched.iter().all(|item| item.lab.is_none()));
    assert_eq!(outcome.report.readings, 2);
    assert_eq!(outcome.report.unmatched, 2);
}

#[test]
fn matching_is_deterministic_and_preserves_reading_order() {
    let lab = vec![
        batch(Some(2), "B2", at(12, 0), at(16, 0)),
        batch(Some(2), "B1", at(9, 0), at(13, 0)),
        batch(Some(4), "B4", at(9, 0), at(18, 0)),
    ];
    let readings: Vec<SensorReading> = (0..24)
        .map(|idx| {
            let sensor = if idx % 3 == 0 { 4 } else { 2 };
            reading(Some(sensor), Some(at(8 + idx / 3, (idx % 3) * 20)))
        })
        .collect();

    let matcher = IntervalMatcher::new(MatchMode::SensorAware);
    let first = matcher.match_readings(&readings, &lab);
    let second = matcher.match_readings(&readings, &lab);

    assert_eq!(first.matched, second.matched);
    assert_eq!(first.report, second.report);
    let timestamps: Vec<_> = first.matched.iter().map(|item| item.reading.timestamp).collect();
    let expected: Vec<_> = readings.iter().map(|item| item.timestamp).collect();
    assert_eq!(timestamps, expected);
}
