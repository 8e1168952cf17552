use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use secado_core::config::VarietyConfig;
use secado_core::curves::{
    curve_file_year, find_calibration_files, normalize_variety, parse_humidity_sheet,
    parse_temperature_sheet, select_calibration_file, CorrectionSeries, CurveError, CurveStore,
    VarietyAliases, VarietyResolver, YearFallback,
};
use secado_core::storage::MemoryStore;
use secado_core::timestamps::TimestampNormalizer;
use secado_core::types::Plant;
use secado_core::workbook::{Cell, MemoryWorkbook, SheetGrid, WorkbookSource, XlsxWorkbook};

fn day(month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid test date")
}

fn normalizer() -> TimestampNormalizer {
    TimestampNormalizer::new(chrono_tz::America::Montevideo)
}

fn numbers(values: &[f64]) -> Vec<Cell> {
    values.iter().copied().map(Cell::Number).collect()
}

/// Humidity sheet with the correction block anchored one column to the right.
fn humidity_rows() -> Vec<Vec<Cell>> {
    let mut offsets = vec![Cell::Empty, Cell::Empty];
    offsets.extend(numbers(&[0.5, 0.0, 0.0, 0.0, 0.0, 1.0]));

    let dated = |date: Cell, values: Vec<Cell>| {
        let mut row = vec![Cell::Empty, date];
        row.extend(values);
        row
    };

    vec![
        numbers(&[0.001, 0.2, 5.0]),
        vec![],
        vec![Cell::Empty, Cell::from("Fecha"), Cell::from("S1"), Cell::from("S2")],
        offsets,
        dated(Cell::DateTime(day(3, 1)), numbers(&[0.1, 0.0, 0.0, 0.0, 0.0, 0.0])),
        dated(Cell::from("10/03/2024"), vec![Cell::Empty; 6]),
        dated(Cell::DateTime(day(3, 20)), numbers(&[0.3])),
        vec![],
        dated(Cell::from("sin fecha"), numbers(&[9.0])),
    ]
}

fn temperature_rows() -> Vec<Vec<Cell>> {
    vec![
        numbers(&[0.5, 1.0]),
        vec![Cell::from("Fecha")],
        {
            let mut row = vec![Cell::Empty];
            row.extend(numbers(&[0.0, 0.2, 0.0, 0.0, 0.0, 0.0]));
            row
        },
    ]
}

#[test]
fn correction_series_forward_fills_and_defaults_to_zero() {
    let series = CorrectionSeries::from_raw(vec![
        (day(3, 20), Some(0.3)),
        (day(3, 1), Some(0.1)),
        (day(3, 10), Some(0.0)),
        (day(3, 15), None),
    ]);

    assert_eq!(series.len(), 4);
    assert_eq!(series.as_of(day(2, 28)), 0.0);
    assert_eq!(series.as_of(day(3, 1)), 0.1);
    assert_eq!(series.as_of(day(3, 12)), 0.1);
    assert_eq!(series.as_of(day(3, 16)), 0.1);
    assert_eq!(series.as_of(day(4, 1)), 0.3);
    assert!(CorrectionSeries::from_raw(Vec::new()).is_empty());
}

#[test]
fn parses_humidity_sheet_block() {
    let sheet = SheetGrid::new(humidity_rows());
    let curve = parse_humidity_sheet("Merin", &sheet, &normalizer()).expect("sheet parses");

    assert_eq!((curve.ah, curve.bh, curve.ch), (0.001, 0.2, 5.0));
    assert_eq!(curve.corrections.fixed, [0.5, 0.0, 0.0, 0.0, 0.0, 1.0]);
    // Three dated rows; the undated one is skipped.
    assert_eq!(curve.corrections.series[0].len(), 3);

    let offset = |dryer, at| curve.corrections.net_offset(dryer, at);
    assert_eq!(offset(1, day(2, 1)), Some(0.5));
    assert_eq!(offset(1, day(3, 12)), Some(0.4));
    assert_eq!(offset(6, day(3, 25)), Some(1.0));
    assert_eq!(offset(0, day(3, 25)), None);
    assert_eq!(offset(7, day(3, 25)), None);

    let humidity = curve.apply(10.0, 6, day(3, 25)).expect("known dryer");
    assert!((humidity - (0.1 + 2.0 + 5.0 + 1.0)).abs() < 1e-9);
}

#[test]
fn temperature_curve_uses_fixed_dryer_offset() {
    let sheet = SheetGrid::new(temperature_rows());
    let curve =
        parse_temperature_sheet("Temperatura", &sheet, &normalizer()).expect("sheet parses");

    let value = curve.apply(30.0, 2, day(3, 1)).expect("known dryer");
    assert!((value - (30.0 * 0.5 + 1.2)).abs() < 1e-9);
    assert_eq!(curve.apply(30.0, 9, day(3, 1)), None);
}

#[test]
fn malformed_sheets_report_what_is_missing() {
    let normalizer = normalizer();

    let empty = SheetGrid::new(vec![vec![Cell::Empty]]);
    assert!(matches!(
        parse_temperature_sheet("T", &empty, &normalizer),
        Err(CurveError::EmptySheet(_))
    ));

    let no_coefficients = SheetGrid::new(vec![vec![Cell::from("AT"), Cell::from("BT")]]);
    assert!(matches!(
        parse_temperature_sheet("T", &no_coefficients, &normalizer),
        Err(CurveError::MissingCoefficients { expected: 2, .. })
    ));

    let no_marker = SheetGrid::new(vec![numbers(&[1.0, 2.0, 3.0])]);
    assert!(matches!(
        parse_humidity_sheet("H", &no_marker, &normalizer),
        Err(CurveError::MissingMarker(_))
    ));

    let no_offsets = SheetGrid::new(vec![numbers(&[1.0, 2.0, 3.0]), vec![Cell::from("Fecha")]]);
    assert!(matches!(
        parse_humidity_sheet("H", &no_offsets, &normalizer),
        Err(CurveError::MissingOffsetRow(_))
    ));
}

#[test]
fn resolves_varieties_through_aliases_and_defaults() {
    let sheets: Vec<String> = ["Temperatura", "Guri", "El Paso", "Merin", "INOV"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    let resolver =
        VarietyResolver::new(&sheets, VarietyAliases::from_config(&VarietyConfig::default()));

    let sheet_for = |variety: &str| resolver.resolve(variety).map(|found| (found.sheet, found.fallback));

    assert_eq!(sheet_for("merin"), Some(("Merin".to_string(), false)));
    assert_eq!(sheet_for("L5903"), Some(("Merin".to_string(), false)));
    assert_eq!(sheet_for(" el  paso"), Some(("El Paso".to_string(), false)));
    assert_eq!(sheet_for("Inovación"), Some(("INOV".to_string(), false)));
    assert_eq!(sheet_for("Desconocida"), Some(("Guri".to_string(), true)));
    assert_eq!(resolver.default_sheet(), Some("Guri"));

    assert_eq!(normalize_variety("Inovación "), "inovacion");
    assert_eq!(normalize_variety("Ŝlïo 9193"), "slio9193");
    assert_eq!(normalize_variety("Merin Ł"), "merin");
}

#[test]
fn no_default_sheet_means_no_resolution() {
    let sheets = vec!["Temperatura".to_string(), "Tacuari".to_string()];
    let resolver =
        VarietyResolver::new(&sheets, VarietyAliases::from_config(&VarietyConfig::default()));

    assert_eq!(resolver.resolve("Desconocida"), None);
    assert_eq!(resolver.resolve("Temperatura"), None);
    assert_eq!(resolver.resolve("tacuari").map(|found| found.sheet), Some("Tacuari".to_string()));
}

#[test]
fn curve_store_parses_each_sheet_once() {
    let workbook = MemoryWorkbook::new()
        .with_sheet("Temperatura", temperature_rows())
        .with_sheet("Merin", humidity_rows())
        .with_sheet("Rota", vec![vec![Cell::from("sin coeficientes")]]);
    let mut store = CurveStore::new(
        Box::new(workbook),
        VarietyAliases::from_config(&VarietyConfig::default()),
        normalizer(),
    );

    assert!(store.temperature().is_some());
    assert!(store.humidity_for_variety("Merin").is_some());
    assert!(store.humidity_for_variety("L5903").is_some());
    assert!(store.humidity_sheet("Rota").is_none());
    assert!(store.humidity_sheet("Rota").is_none());
    assert!(store.humidity_sheet("Missing").is_none());
    assert_eq!(store.parsed_sheets(), 4);
}

#[test]
fn missing_temperature_sheet_leaves_no_curve() {
    let workbook = MemoryWorkbook::new().with_sheet("Merin", humidity_rows());
    let mut store = CurveStore::new(Box::new(workbook), VarietyAliases::default(), normalizer());

    assert!(store.temperature().is_none());
    assert!(store.humidity_sheet("Merin").is_some());
}

#[test]
fn selects_curve_year_with_fallbacks() {
    let candidates: BTreeMap<i32, String> = BTreeMap::from([
        (2022, "curvas/2022 Curvas JPV.xlsx".to_string()),
        (2024, "curvas/2024 Curvas JPV.xlsx".to_string()),
    ]);
    let pick = |target| {
        select_calibration_file(&candidates, target, Plant::Jpv)
            .map(|selection| (selection.year, selection.fallback))
    };

    assert_eq!(pick(2024), Some((2024, YearFallback::Exact)));
    assert_eq!(pick(2023), Some((2022, YearFallback::PriorYear)));
    assert_eq!(pick(2025), Some((2024, YearFallback::PriorYear)));
    assert_eq!(pick(2021), Some((2024, YearFallback::MostRecent)));
    assert_eq!(select_calibration_file(&BTreeMap::new(), 2024, Plant::Jpv), None);
}

#[test]
fn recognizes_curve_workbook_names() {
    assert_eq!(curve_file_year("2024 Curvas JPV.xlsx", Plant::Jpv), Some(2024));
    assert_eq!(curve_file_year("2023 - curvas calibracion jpv.XLSX", Plant::Jpv), Some(2023));
    assert_eq!(curve_file_year("Copia 2022 Curvas RB final.xlsx", Plant::Rb), Some(2022));
    assert_eq!(curve_file_year("2024 Curvas RB.xlsx", Plant::Jpv), None);
    assert_eq!(curve_file_year("2024 Curvas JPV.xls", Plant::Jpv), None);
    assert_eq!(curve_file_year("Curvas 2024 JPV.xlsx", Plant::Jpv), None);
}

#[test]
fn discovers_curve_files_recursively() {
    let store = MemoryStore::new()
        .with_file("curvas/2022 Curvas JPV.xlsx", Vec::new())
        .with_file("curvas/2024 Curvas JPV v2.xlsx", Vec::new())
        .with_file("curvas/2024 Curvas RB.xlsx", Vec::new())
        .with_file("curvas/notas.txt", Vec::new())
        .with_file("curvas/Laboratorio/2023 Curvas JPV.xlsx", Vec::new())
        .with_file("curvas/viejas/2024 Curvas JPV.xlsx", Vec::new())
        .with_file("curvas/viejas/2020 Curvas JPV.xlsx", Vec::new());

    let jpv = find_calibration_files(&store, "curvas", Plant::Jpv);
    assert_eq!(
        jpv.into_iter().collect::<Vec<_>>(),
        vec![
            (2020, "curvas/viejas/2020 Curvas JPV.xlsx".to_string()),
            (2022, "curvas/2022 Curvas JPV.xlsx".to_string()),
            (2024, "curvas/2024 Curvas JPV v2.xlsx".to_string()),
        ]
    );

    let rb = find_calibration_files(&store, "curvas", Plant::Rb);
    assert_eq!(rb.get(&2024).map(String::as_str), Some("curvas/2024 Curvas RB.xlsx"));
    assert!(find_calibration_files(&store, "nowhere", Plant::Rb).is_empty());
}

#[test]
fn reads_curves_from_an_xlsx_workbook() -> anyhow::Result<()> {
    let bytes = include_bytes!("fixtures/curves_2024.xlsx").to_vec();
    let workbook = XlsxWorkbook::from_bytes(bytes)?;
    assert_eq!(workbook.sheet_names(), vec!["Temperatura", "Merin"]);

    // The sheet's used range starts on the second row; cells keep absolute positions.
    let sheet = workbook.sheet("Temperatura")?;
    assert!(sheet.row(0).iter().all(Cell::is_empty));
    assert_eq!(sheet.find_text("Fecha"), Some((3, 0)));
    assert_eq!(sheet.cell(5, 0), &Cell::DateTime(day(3, 5)));
    assert_eq!(sheet.cell(6, 0), &Cell::Text("2024-03-15T00:00:00".to_string()));

    let curve = parse_temperature_sheet("Temperatura", &sheet, &normalizer())?;
    assert_eq!((curve.at, curve.bt), (0.5, 1.0));
    assert_eq!(curve.corrections.fixed[1], 0.2);
    assert_eq!(curve.corrections.series[1].len(), 2);

    let offset = |at| curve.corrections.net_offset(2, at).expect("dryer 2");
    assert!((offset(day(3, 1)) - 0.2).abs() < 1e-9);
    assert!((offset(day(3, 10)) - (0.2 - 0.5)).abs() < 1e-9);
    assert!((offset(day(3, 20)) - (0.2 - 1.5)).abs() < 1e-9);

    let mut store = CurveStore::new(
        Box::new(workbook),
        VarietyAliases::from_config(&VarietyConfig::default()),
        normalizer(),
    );
    let merin = store.humidity_for_variety("L5903").expect("Merin sheet");
    assert_eq!((merin.ah, merin.bh, merin.ch), (0.0, 0.5, 2.0));
    Ok(())
}
