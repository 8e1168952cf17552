use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::timestamps::floor_to_second;
use crate::types::{LabAttribution, LabBatchRecord, MatchedReading, SensorReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Intervals only apply to readings of the same sensor.
    SensorAware,
    /// Sensor ids are ignored; used when the lab workbook does not identify sensors.
    TimeOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub readings: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub null_sensor: usize,
    pub null_timestamp: usize,
    /// Lab intervals that start before the previous interval of the same group ended.
    pub overlapping_intervals: usize,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedReading>,
    pub report: MatchReport,
}

struct Interval<'a> {
    start: NaiveDateTime,
    end: NaiveDateTime,
    record: &'a LabBatchRecord,
}

/// Interval join between sensor readings and lab batch records.
#[derive(Debug, Clone, Copy)]
pub struct IntervalMatcher {
    mode: MatchMode,
}

impl Default for IntervalMatcher {
    fn default() -> Self {
        Self::new(MatchMode::SensorAware)
    }
}

impl IntervalMatcher {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Attributes at most one lab record to each reading: among the intervals whose start is
    /// at or before the reading (floored to the second), the one sorting last by start wins,
    /// and only if the reading is not past its end. Equal starts keep input order, so the
    /// later record wins those ties.
    pub fn match_readings(
        &self,
        readings: &[SensorReading],
        lab: &[LabBatchRecord],
    ) -> MatchOutcome {
        let groups = self.build_groups(lab);
        let overlapping_intervals = count_overlaps(&groups);

        let mut report = MatchReport {
            readings: readings.len(),
            overlapping_intervals,
            ..MatchReport::default()
        };

        let matched = readings
            .iter()
            .map(|reading| {
                let lab = self.lookup(&groups, reading, &mut report);
                match lab {
                    Some(_) => report.matched += 1,
                    None => report.unmatched += 1,
                }
                MatchedReading {
                    reading: reading.clone(),
                    lab,
                }
            })
            .collect();

        if report.unmatched > 0 {
            info!(
                mode = ?self.mode,
                unmatched = report.unmatched,
                null_sensor = report.null_sensor,
                null_timestamp = report.null_timestamp,
                "sensor rows without a lab interval"
            );
        }

        MatchOutcome { matched, report }
    }

    fn build_groups<'a>(
        &self,
        lab: &'a [LabBatchRecord],
    ) -> HashMap<Option<u32>, Vec<Interval<'a>>> {
        let mut groups: HashMap<Option<u32>, Vec<Interval<'a>>> = HashMap::new();
        for record in lab {
            let key = match self.mode {
                MatchMode::SensorAware => match record.sensor_id {
                    Some(sensor) => Some(sensor),
                    None => continue,
                },
                MatchMode::TimeOnly => None,
            };
            groups.entry(key).or_default().push(Interval {
                start: record.start,
                end: record.end,
                record,
            });
        }
        for intervals in groups.values_mut() {
            intervals.sort_by_key(|interval| interval.start);
        }
        groups
    }

    fn lookup(
        &self,
        groups: &HashMap<Option<u32>, Vec<Interval<'_>>>,
        reading: &SensorReading,
        report: &mut MatchReport,
    ) -> Option<LabAttribution> {
        let Some(sensor) = reading.sensor_id else {
            report.null_sensor += 1;
            return None;
        };
        let Some(timestamp) = reading.timestamp else {
            report.null_timestamp += 1;
            return None;
        };

        let key = match self.mode {
            MatchMode::SensorAware => Some(sensor),
            MatchMode::TimeOnly => None,
        };
        let intervals = groups.get(&key)?;
        let at = floor_to_second(timestamp);
        let pos = intervals.partition_point(|interval| interval.start <= at);
        let candidate = intervals.get(pos.checked_sub(1)?)?;
        (at <= candidate.end).then(|| LabAttribution::from(candidate.record))
    }
}

fn count_overlaps(groups: &HashMap<Option<u32>, Vec<Interval<'_>>>) -> usize {
    let mut total = 0;
    for (sensor, intervals) in groups {
        let mut latest_end: Option<NaiveDateTime> = None;
        let mut overlaps = 0;
        for interval in intervals {
            if latest_end.is_some_and(|end| interval.start <= end) {
                overlaps += 1;
            }
            latest_end = Some(latest_end.map_or(interval.end, |end| end.max(interval.end)));
        }
        if overlaps > 0 {
            warn!(
                sensor = ?sensor,
                overlaps,
                "overlapping lab intervals; readings in the overlap go to the latest-starting batch"
            );
        }
        total += overlaps;
    }
    total
}
