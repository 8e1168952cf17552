use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime};
use secado_parser::ParsedSensorFile;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::timestamps::{RawTimestamp, TimestampNormalizer};
use crate::types::{Plant, SensorReading, SourceInfo};
use crate::variables::{canonical_variable, parse_decimal};

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Missing,
}

impl RawValue {
    fn parse(&self) -> Option<f64> {
        match self {
            RawValue::Number(value) if value.is_finite() => Some(*value),
            RawValue::Number(_) | RawValue::Missing => None,
            RawValue::Text(text) => parse_decimal(text),
        }
    }

    fn is_missing(&self) -> bool {
        match self {
            RawValue::Missing => true,
            RawValue::Text(text) => text.trim().is_empty(),
            RawValue::Number(_) => false,
        }
    }
}

/// One long-format input row: `(timestamp, sensor_id, variable, value, plant)` plus
/// provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub plant: Plant,
    /// Sensor label as the plant writes it (`20`, `SENSOR20`, ...).
    pub sensor_label: Option<String>,
    pub timestamp: RawTimestamp,
    pub variable: String,
    pub value: RawValue,
    pub source: Arc<SourceInfo>,
    pub extras: Vec<(String, String)>,
}

/// Lifts every row of a parsed sensor export into [`RawReading`]s for one sensor.
pub fn raw_readings_from_file(
    plant: Plant,
    sensor_label: Option<String>,
    parsed: &ParsedSensorFile,
    source: Arc<SourceInfo>,
) -> Vec<RawReading> {
    parsed
        .rows
        .iter()
        .map(|row| RawReading {
            plant,
            sensor_label: sensor_label.clone(),
            timestamp: row
                .timestamp_text
                .as_deref()
                .map_or(RawTimestamp::Missing, RawTimestamp::from),
            variable: row.variable.clone(),
            value: RawValue::Text(row.value_text.clone()),
            source: Arc::clone(&source),
            extras: row.raw_fields.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub input_rows: usize,
    pub readings: usize,
    pub unparseable_timestamps: usize,
    pub unparseable_values: usize,
    pub unknown_sensors: usize,
    /// Rows whose sensor label names no dryer under the plant's numbering.
    pub unknown_dryer_labels: usize,
    pub duplicate_rows: usize,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub readings: Vec<SensorReading>,
    pub report: IngestReport,
}

/// Turns raw rows into [`SensorReading`]s: local timestamps, numeric values, dryer numbers.
pub struct Ingestor<'a> {
    normalizer: &'a TimestampNormalizer,
    config: &'a EngineConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(normalizer: &'a TimestampNormalizer, config: &'a EngineConfig) -> Self {
        Self { normalizer, config }
    }

    /// `year` pins every reading to a campaign year. Otherwise the year found in the export's
    /// path wins, then the timestamp's own year.
    pub fn ingest(&self, raw: Vec<RawReading>, year: Option<i32>) -> IngestOutcome {
        let mut report = IngestReport {
            input_rows: raw.len(),
            ..IngestReport::default()
        };
        let mut seen: HashSet<(Plant, Option<u32>, Option<NaiveDateTime>, String)> =
            HashSet::new();
        let mut readings = Vec::with_capacity(raw.len());

        for row in raw {
            let timestamp = self.normalizer.normalize(&row.timestamp, true);
            if timestamp.is_none() && !matches!(row.timestamp, RawTimestamp::Missing) {
                report.unparseable_timestamps += 1;
            }

            let value = row.value.parse();
            if value.is_none() && !row.value.is_missing() {
                report.unparseable_values += 1;
            }

            let label = row.sensor_label.as_deref().and_then(sensor_number);
            let sensor_id = label.and_then(|label| {
                self.config
                    .plant(row.plant)
                    .sensor_numbering
                    .dryer_number(label)
            });
            match (label, sensor_id) {
                (None, _) => report.unknown_sensors += 1,
                (Some(_), None) => report.unknown_dryer_labels += 1,
                (Some(_), Some(_)) => {}
            }

            let key = (
                row.plant,
                sensor_id,
                timestamp,
                canonical_variable(&row.variable),
            );
            if !seen.insert(key) {
                report.duplicate_rows += 1;
                continue;
            }

            readings.push(SensorReading {
                timestamp,
                plant: row.plant,
                year: year
                    .or(row.source.year)
                    .or_else(|| timestamp.map(|ts| ts.year())),
                sensor_id,
                variable: row.variable,
                value,
                source: row.source,
                extras: row.extras,
            });
        }

        report.readings = readings.len();
        if report.unparseable_timestamps > 0 {
            warn!(
                count = report.unparseable_timestamps,
                "sensor rows with unparseable timestamps"
            );
        }
        if report.unparseable_values > 0 {
            warn!(count = report.unparseable_values, "sensor rows with unparseable values");
        }
        if report.unknown_sensors > 0 {
            warn!(count = report.unknown_sensors, "sensor rows without a sensor number");
        }
        if report.unknown_dryer_labels > 0 {
            warn!(
                count = report.unknown_dryer_labels,
                "sensor rows whose label maps to no dryer"
            );
        }
        if report.duplicate_rows > 0 {
            info!(count = report.duplicate_rows, "dropped duplicate long-format rows");
        }

        IngestOutcome { readings, report }
    }
}

/// First run of digits in a sensor label, e.g. `SENSOR20` → 20.
pub fn sensor_number(label: &str) -> Option<u32> {
    let digits: String = label
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
