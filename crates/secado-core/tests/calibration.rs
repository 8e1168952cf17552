use chrono::{NaiveDate, NaiveDateTime};
use secado_core::calibrator::VoltageCalibrator;
use secado_core::config::VarietyConfig;
use secado_core::curves::{CurveStore, VarietyAliases};
use secado_core::timestamps::TimestampNormalizer;
use secado_core::types::Plant;
use secado_core::wide::{WideKey, WideRow};
use secado_core::workbook::{Cell, MemoryWorkbook};

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|date| date.and_hms_opt(hour, 0, 0))
        .expect("valid test timestamp")
}

fn numbers(values: &[f64]) -> Vec<Cell> {
    values.iter().copied().map(Cell::Number).collect()
}

fn curve_sheet(coefficients: &[f64], offsets: &[f64; 6]) -> Vec<Vec<Cell>> {
    let mut offset_row = vec![Cell::Empty];
    offset_row.extend(numbers(offsets));
    vec![numbers(coefficients), vec![Cell::from("Fecha")], offset_row]
}

fn curve_store(humidity_sheets: &[(&str, [f64; 3])]) -> CurveStore {
    let mut workbook = MemoryWorkbook::new().with_sheet(
        "Temperatura",
        curve_sheet(&[0.5, 1.0], &[0.0, 0.2, 0.0, 0.0, 0.0, 0.0]),
    );
    for (name, coefficients) in humidity_sheets {
        workbook = workbook.with_sheet(*name, curve_sheet(coefficients, &[0.0; 6]));
    }
    CurveStore::new(
        Box::new(workbook),
        VarietyAliases::from_config(&VarietyConfig::default()),
        TimestampNormalizer::new(chrono_tz::America::Montevideo),
    )
}

fn row(sensor: u32, hour: u32, volt_hum: Option<f64>, volt_tem: Option<f64>, variety: &str) -> WideRow {
    let mut row = WideRow::new(WideKey {
        plant: Plant::Jpv,
        year: 2024,
        sensor_id: sensor,
        timestamp: at(hour),
    });
    row.volt_hum = volt_hum;
    row.volt_tem = volt_tem;
    row.variety = Some(variety.to_string());
    row
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("value should be present");
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[test]
fn applies_temperature_and_humidity_curves() {
    let mut store = curve_store(&[("Merin", [0.0, 0.5, 2.0]), ("Guri", [0.0, 1.0, 0.0])]);
    let mut rows = vec![
        row(2, 10, Some(45.2), Some(30.0), "Merin"),
        row(2, 11, None, Some(0.0), "Merin"),
        row(7, 10, Some(45.2), Some(30.0), "Merin"),
        row(1, 10, Some(10.0), None, "Desconocida"),
    ];
    rows[1].temperatura = Some(99.0);

    let report = VoltageCalibrator::new().calibrate(&mut rows, Some(&mut store));

    assert_close(rows[0].temperatura, 30.0 * 0.5 + 1.2);
    assert_close(rows[0].humedad, 24.6);
    assert_eq!((rows[1].temperatura, rows[1].humedad), (None, None));
    assert_eq!((rows[2].temperatura, rows[2].humedad), (None, None));
    assert_eq!(rows[3].temperatura, None);
    assert_close(rows[3].humedad, 10.0);

    assert!(report.temperature_curve);
    assert!(!report.no_usable_voltage);
    assert_eq!(report.rows, 4);
    assert_eq!(report.temperatura_rows, 1);
    assert_eq!(report.humedad_rows, 2);
    assert_eq!(report.unknown_dryer_rows, 1);
    assert!(report.unresolved_varieties.is_empty());
}

#[test]
fn varieties_without_any_sheet_leave_humidity_null() {
    let mut store = curve_store(&[("Tacuari", [0.0, 1.0, 0.0])]);
    let mut rows = vec![row(2, 10, Some(45.2), Some(30.0), "Merin")];

    let report = VoltageCalibrator::new().calibrate(&mut rows, Some(&mut store));

    assert_eq!(rows[0].humedad, None);
    assert_close(rows[0].temperatura, 16.2);
    assert!(report.unresolved_varieties.contains("Merin"));
}

#[test]
fn zero_or_missing_voltages_are_never_calibrated() {
    let mut store = curve_store(&[("Merin", [0.0, 0.5, 2.0])]);
    let mut rows = vec![
        row(2, 10, Some(0.0), Some(0.0), "Merin"),
        row(3, 10, None, None, "Merin"),
    ];
    rows[0].humedad = Some(14.0);

    let report = VoltageCalibrator::new().calibrate(&mut rows, Some(&mut store));

    assert!(report.no_usable_voltage);
    assert!(rows
        .iter()
        .all(|row| row.temperatura.is_none() && row.humedad.is_none()));
    assert_eq!(store.parsed_sheets(), 0);
}

#[test]
fn without_curves_outputs_stay_null() {
    let mut rows = vec![row(2, 10, Some(45.2), Some(30.0), "Merin")];

    let report = VoltageCalibrator::new().calibrate(&mut rows, None);

    assert!(!report.temperature_curve);
    assert!(!report.no_usable_voltage);
    assert_eq!((rows[0].temperatura, rows[0].humedad), (None, None));
    assert_eq!(report.humedad_rows, 0);
}

fn on(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid test timestamp")
}

fn correction_row(day: u32, values: &[f64; 6]) -> Vec<Cell> {
    let mut row = vec![Cell::DateTime(on(day))];
    row.extend(numbers(values));
    row
}

#[test]
fn dated_corrections_follow_the_row_timestamp() {
    let mut temperature = curve_sheet(&[0.5, 1.0], &[0.0, 0.2, 0.0, 0.0, 0.0, 0.0]);
    temperature.push(correction_row(5, &[0.0, 0.5, 0.0, 0.0, 0.0, 0.0]));
    temperature.push(correction_row(10, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    temperature.push(correction_row(15, &[0.0, 1.5, 0.0, 0.0, 0.0, 0.0]));
    let mut humidity = curve_sheet(&[0.0, 0.5, 2.0], &[0.0; 6]);
    humidity.push(correction_row(5, &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0]));

    let workbook = MemoryWorkbook::new()
        .with_sheet("Temperatura", temperature)
        .with_sheet("Merin", humidity);
    let mut store = CurveStore::new(
        Box::new(workbook),
        VarietyAliases::from_config(&VarietyConfig::default()),
        TimestampNormalizer::new(chrono_tz::America::Montevideo),
    );

    let dated = |timestamp: NaiveDateTime, sensor: u32| {
        let mut row = row(sensor, 0, Some(45.2), Some(30.0), "Merin");
        row.key.timestamp = timestamp;
        row
    };
    let mut rows = vec![
        dated(on(1), 2),
        dated(on(7), 2),
        dated(on(12), 2),
        dated(on(15), 2),
        dated(on(20), 2),
        dated(on(20), 3),
    ];

    VoltageCalibrator::new().calibrate(&mut rows, Some(&mut store));

    // Before the first dated row no correction applies.
    assert_close(rows[0].temperatura, 16.2);
    assert_close(rows[0].humedad, 24.6);
    assert_close(rows[1].temperatura, 15.7);
    assert_close(rows[1].humedad, 23.6);
    // A zero correction keeps the previous one.
    assert_close(rows[2].temperatura, 15.7);
    assert_close(rows[3].temperatura, 14.7);
    assert_close(rows[4].temperatura, 14.7);
    assert_close(rows[4].humedad, 23.6);
    assert_close(rows[5].temperatura, 16.0);
    assert_close(rows[5].humedad, 24.6);
}
