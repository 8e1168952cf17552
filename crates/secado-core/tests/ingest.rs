use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use secado_core::config::EngineConfig;
use secado_core::ingest::{sensor_number, Ingestor, RawReading, RawValue};
use secado_core::inventory::{build_inventory, classify_sensor_path, SkipReason};
use secado_core::storage::MemoryStore;
use secado_core::timestamps::{RawTimestamp, TimestampNormalizer};
use secado_core::types::{Plant, SourceInfo};

fn at(year: i32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, 3, 1)
        .and_then(|date| date.and_hms_opt(hour, 0, 0))
        .expect("valid test timestamp")
}

fn raw(plant: Plant, label: Option<&str>, timestamp: RawTimestamp, variable: &str, value: RawValue) -> RawReading {
    RawReading {
        plant,
        sensor_label: label.map(str::to_string),
        timestamp,
        variable: variable.to_string(),
        value,
        source: Arc::new(SourceInfo::default()),
        extras: Vec::new(),
    }
}

#[test]
fn extracts_sensor_numbers_from_labels() {
    assert_eq!(sensor_number("20"), Some(20));
    assert_eq!(sensor_number("SENSOR 30"), Some(30));
    assert_eq!(sensor_number("S4-bis7"), Some(4));
    assert_eq!(sensor_number("sin numero"), None);
}

#[test]
fn maps_labels_through_plant_numbering() {
    let config = EngineConfig::default();
    let normalizer = TimestampNormalizer::new(config.timezone().expect("default timezone"));
    let rows = vec![
        raw(Plant::Jpv, Some("SENSOR20"), at(2024, 10).into(), "VOLT_HUME", RawValue::Text("45,2".into())),
        raw(Plant::Rb, Some("20"), at(2024, 10).into(), "V_HUM", RawValue::Number(4520.0)),
        raw(Plant::Rb, Some("3"), at(2024, 10).into(), "V_HUM", RawValue::Number(4400.0)),
    ];

    let outcome = Ingestor::new(&normalizer, &config).ingest(rows, None);

    let sensors: Vec<Option<u32>> = outcome.readings.iter().map(|r| r.sensor_id).collect();
    assert_eq!(sensors, vec![Some(2), Some(20), Some(3)]);
    assert_eq!(outcome.readings[0].value, Some(45.2));
    assert_eq!(outcome.readings[1].value, Some(4520.0));
}

#[test]
fn infers_year_and_counts_unusable_fields() {
    let config = EngineConfig::default();
    let normalizer = TimestampNormalizer::new(config.timezone().expect("default timezone"));
    let rows = vec![
        raw(Plant::Jpv, Some("20"), RawTimestamp::from("01/03/2023 10:00"), "VOLT_HUME", RawValue::Text("abc".into())),
        raw(Plant::Jpv, Some("20"), RawTimestamp::from("garbage"), "VOLT_TEMP", RawValue::Missing),
        raw(Plant::Jpv, None, at(2024, 11).into(), "VOLT_HUME", RawValue::Number(40.0)),
        raw(Plant::Jpv, Some("20"), RawTimestamp::from("01/03/2023 10:00"), "volt hume", RawValue::Number(41.0)),
    ];

    let outcome = Ingestor::new(&normalizer, &config).ingest(rows, None);

    let report = &outcome.report;
    assert_eq!(report.input_rows, 4);
    assert_eq!(report.unparseable_values, 1);
    assert_eq!(report.unparseable_timestamps, 1);
    assert_eq!(report.unknown_sensors, 1);
    assert_eq!(report.duplicate_rows, 1);
    assert_eq!(report.readings, 3);

    let years: Vec<Option<i32>> = outcome.readings.iter().map(|r| r.year).collect();
    assert_eq!(years, vec![Some(2023), None, Some(2024)]);

    let pinned = Ingestor::new(&normalizer, &config).ingest(
        vec![raw(Plant::Jpv, Some("20"), at(2023, 10).into(), "VOLT_HUME", RawValue::Missing)],
        Some(2024),
    );
    assert_eq!(pinned.readings[0].year, Some(2024));
}

#[test]
fn jpv_labels_outside_the_tens_scheme_are_counted() {
    let config = EngineConfig::default();
    let normalizer = TimestampNormalizer::new(config.timezone().expect("default timezone"));
    let rows = vec![
        raw(Plant::Jpv, Some("SENSOR25"), at(2024, 10).into(), "VOLT_HUME", RawValue::Number(40.0)),
        raw(Plant::Jpv, Some("SENSOR30"), at(2024, 10).into(), "VOLT_HUME", RawValue::Number(41.0)),
        raw(Plant::Rb, Some("25"), at(2024, 10).into(), "V_HUM", RawValue::Number(4100.0)),
    ];

    let outcome = Ingestor::new(&normalizer, &config).ingest(rows, None);

    let sensors: Vec<Option<u32>> = outcome.readings.iter().map(|r| r.sensor_id).collect();
    assert_eq!(sensors, vec![None, Some(3), Some(25)]);
    assert_eq!(outcome.report.unknown_dryer_labels, 1);
    assert_eq!(outcome.report.unknown_sensors, 0);
}

#[test]
fn path_year_wins_over_timestamp_year() {
    let config = EngineConfig::default();
    let normalizer = TimestampNormalizer::new(config.timezone().expect("default timezone"));
    let mut row = raw(Plant::Jpv, Some("20"), at(2023, 10).into(), "VOLT_HUME", RawValue::Number(40.0));
    row.source = Arc::new(SourceInfo {
        year: Some(2024),
        ..SourceInfo::default()
    });

    let outcome = Ingestor::new(&normalizer, &config).ingest(vec![row], None);
    assert_eq!(outcome.readings[0].year, Some(2024));
}

#[test]
fn classifies_sensor_exports_by_extension_and_folder() {
    let root = "raw";
    let jpv = classify_sensor_path(root, "raw/2024 Datos Sensores JPV/SENSOR2/log_2023.txt")
        .expect("JPV log in a sensor folder");
    assert_eq!(jpv.plant, Plant::Jpv);
    assert_eq!(jpv.year, Some(2024));
    assert_eq!(jpv.sensor_label, Some(2));

    let rb = classify_sensor_path(root, "raw/RB/SENSOR4_2023.csv").expect("RB table");
    assert_eq!(rb.plant, Plant::Rb);
    assert_eq!(rb.year, Some(2023));
    assert_eq!(rb.sensor_label, Some(4));

    let named = classify_sensor_path(root, "raw/SENSOR1/export JPV.csv").expect("named plant");
    assert_eq!(named.plant, Plant::Jpv);
    assert_eq!(named.year, None);

    assert_eq!(
        classify_sensor_path(root, "raw/SENSOR2b/log.txt").map(|e| e.plant),
        Ok(Plant::Jpv)
    );
    assert_eq!(
        classify_sensor_path(root, "raw/backup/log.txt"),
        Err(SkipReason::OutsideSensorFolder)
    );
    assert_eq!(
        classify_sensor_path(root, "raw/SENSOR2/curvas.xlsx"),
        Err(SkipReason::NotSensorExport)
    );
    assert_eq!(
        classify_sensor_path(root, "raw/Laboratorio/SENSOR2/copia.csv"),
        Err(SkipReason::LabFolder)
    );
}

#[test]
fn inventory_keeps_one_plant_and_year() -> anyhow::Result<()> {
    let store = MemoryStore::new()
        .with_file("raw/2024 Datos Sensores JPV/SENSOR2/a.txt", Vec::new())
        .with_file("raw/2024 Datos Sensores JPV/SENSOR2/notas.docx", Vec::new())
        .with_file("raw/2023 Datos Sensores JPV/SENSOR2/b.txt", Vec::new())
        .with_file("raw/SENSOR5/c.txt", Vec::new())
        .with_file("raw/sueltos/d.txt", Vec::new())
        .with_file("raw/SENSOR3/rb_export.csv", Vec::new())
        .with_file("raw/laboratorio/SENSOR1/e.txt", Vec::new());

    let inventory = build_inventory(&store, "raw", Plant::Jpv, Some(2024))?;

    let paths: Vec<&str> = inventory.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["raw/2024 Datos Sensores JPV/SENSOR2/a.txt", "raw/SENSOR5/c.txt"]
    );
    let report = inventory.report();
    assert_eq!(report.files_seen, 6);
    assert_eq!(report.accepted, 2);
    assert_eq!(report.not_sensor_exports, 1);
    assert_eq!(report.other_year, 1);
    assert_eq!(report.outside_sensor_folder, 1);
    assert_eq!(report.other_plant, 1);
    assert_eq!(report.lab_folder, 0);

    let source = inventory.entries()[0].source_info();
    assert_eq!(source.year, Some(2024));
    assert_eq!(source.source_file.as_deref(), Some("a.txt"));
    Ok(())
}
