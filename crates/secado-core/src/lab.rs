use thiserror::Error;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::config::SensorNumbering;
use crate::ingest::sensor_number;
use crate::storage::{ResourceStore, StoreEntry, StoreError};
use crate::timestamps::{RawTimestamp, TimestampNormalizer};
use crate::types::{LabBatchRecord, Plant};
use crate::workbook::{Cell, SheetGrid, WorkbookError, WorkbookSource};

#[derive(Debug, Error)]
pub enum LabError {
    #[error("lab workbook has no '{0}' column")]
    MissingColumn(&'static str),
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

const HEADER_TOKENS: &[&str] = &[
    "variedad",
    "identificador",
    "inicio",
    "fin",
    "sensor",
    "humedad",
];
const HEADER_SEARCH_ROWS: usize = 20;

/// Result of reading a lab control workbook.
#[derive(Debug, Clone)]
pub struct LabLoad {
    pub records: Vec<LabBatchRecord>,
    /// Rows discarded for missing or inverted start/end bounds.
    pub dropped_rows: usize,
    /// Whether the workbook identifies sensors at all; without it only time-only matching
    /// is possible.
    pub has_sensor_column: bool,
    pub header_row: usize,
}

#[derive(Debug, Default)]
struct LabColumns {
    variety: Option<usize>,
    batch_id: Option<usize>,
    start: Option<usize>,
    end: Option<usize>,
    sensor: Option<usize>,
    initial_humidity: Option<usize>,
    final_humidity: Option<usize>,
    discard: Option<usize>,
}

impl LabColumns {
    fn resolve(headers: &[String]) -> Self {
        let lower: Vec<String> = headers.iter().map(|header| header.to_lowercase()).collect();
        let pick = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lower.iter().position(|header| header.as_str() == *name))
        };

        let mut columns = LabColumns {
            variety: pick(&["variedad"]),
            batch_id: pick(&["identificador", "id", "id_tachada"]),
            start: pick(&["inicio"]),
            end: pick(&["fin"]),
            sensor: pick(&["sensor", "sensor_id"]),
            ..LabColumns::default()
        };

        for (idx, header) in headers.iter().enumerate() {
            let folded = fold_header(header);
            if folded.contains("humedad") {
                if columns.initial_humidity.is_none()
                    && (folded.contains("inicio") || folded.contains("inicial"))
                {
                    columns.initial_humidity = Some(idx);
                }
                if columns.final_humidity.is_none() && folded.contains("final") {
                    columns.final_humidity = Some(idx);
                }
            }
            if columns.discard.is_none() && folded.contains("descart") {
                columns.discard = Some(idx);
            }
        }

        columns
    }
}

/// Reads lab batch records ("tachadas") from the first sheet of a control workbook.
pub struct LabLoader<'a> {
    normalizer: &'a TimestampNormalizer,
    numbering: SensorNumbering,
}

impl<'a> LabLoader<'a> {
    pub fn new(normalizer: &'a TimestampNormalizer, numbering: SensorNumbering) -> Self {
        Self {
            normalizer,
            numbering,
        }
    }

    pub fn load(
        &self,
        workbook: &dyn WorkbookSource,
        plant: Plant,
        year: i32,
    ) -> Result<LabLoad, LabError> {
        let sheet = workbook.first_sheet()?;
        self.load_sheet(&sheet, plant, year)
    }

    pub fn load_sheet(
        &self,
        sheet: &SheetGrid,
        plant: Plant,
        year: i32,
    ) -> Result<LabLoad, LabError> {
        let header_row = detect_header_row(sheet);
        let headers: Vec<String> = sheet
            .row(header_row)
            .iter()
            .map(|cell| cell.as_text().unwrap_or_default())
            .collect();
        let columns = LabColumns::resolve(&headers);
        let start_col = columns.start.ok_or(LabError::MissingColumn("Inicio"))?;
        let end_col = columns.end.ok_or(LabError::MissingColumn("Fin"))?;

        debug!(
            %plant,
            year,
            header_row,
            ?columns,
            "resolved lab workbook columns"
        );

        let mut records = Vec::new();
        let mut dropped_rows = 0;

        for row in (header_row + 1)..sheet.height() {
            let cells = sheet.row(row);
            if cells.iter().all(Cell::is_empty) {
                continue;
            }

            let start = self.bound(sheet.cell(row, start_col));
            let end = self.bound(sheet.cell(row, end_col));
            let (start, end) = match (start, end) {
                (Some(start), Some(end)) if start <= end => (start, end),
                _ => {
                    dropped_rows += 1;
                    continue;
                }
            };

            let cell_at = |col: Option<usize>| col.map(|col| sheet.cell(row, col));
            records.push(LabBatchRecord {
                plant,
                year,
                sensor_id: cell_at(columns.sensor).and_then(|cell| self.sensor(cell)),
                variety: cell_at(columns.variety).and_then(non_null_text),
                batch_id: cell_at(columns.batch_id).and_then(normalize_id),
                start,
                end,
                initial_humidity: cell_at(columns.initial_humidity).and_then(Cell::as_f64),
                final_humidity: cell_at(columns.final_humidity).and_then(Cell::as_f64),
                discard: cell_at(columns.discard).and_then(non_null_text),
            });
        }

        if dropped_rows > 0 {
            warn!(
                %plant,
                year,
                dropped_rows,
                "lab rows without valid start/end bounds were dropped"
            );
        }
        info!(%plant, year, records = records.len(), "loaded lab batch records");

        Ok(LabLoad {
            records,
            dropped_rows,
            has_sensor_column: columns.sensor.is_some(),
            header_row,
        })
    }

    fn bound(&self, cell: &Cell) -> Option<chrono::NaiveDateTime> {
        let raw = match cell {
            Cell::Text(text) => RawTimestamp::Text(text.clone()),
            other => RawTimestamp::from(other.as_datetime()),
        };
        self.normalizer.normalize(&raw, true)
    }

    fn sensor(&self, cell: &Cell) -> Option<u32> {
        let label = match cell {
            Cell::Number(value) if value.fract() == 0.0 && *value >= 0.0 => *value as u32,
            other => sensor_number(&other.as_text()?)?,
        };
        self.numbering.dryer_number(label)
    }
}

fn detect_header_row(sheet: &SheetGrid) -> usize {
    (0..sheet.height().min(HEADER_SEARCH_ROWS))
        .find(|row| {
            sheet.row(*row).iter().any(|cell| match cell.as_text() {
                Some(text) => HEADER_TOKENS.contains(&text.to_lowercase().as_str()),
                None => false,
            })
        })
        .unwrap_or(0)
}

/// Lowercase, accent-free, without `%` and with single spaces.
fn fold_header(header: &str) -> String {
    let folded: String = ascii_fold(header)
        .chars()
        .filter(|ch| *ch != '%')
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// NFKD-decomposes `text` and keeps only ASCII: accents fall away (`"Humedad Inicial (%)"`
/// and `"Humédad Inicial (%)"` agree) and other non-ASCII symbols are dropped.
pub(crate) fn ascii_fold(text: &str) -> String {
    text.nfkd().filter(char::is_ascii).collect()
}

fn non_null_text(cell: &Cell) -> Option<String> {
    cell.as_text()
        .filter(|text| !matches!(text.to_lowercase().as_str(), "nan" | "none"))
}

/// Lab identifiers as stable strings: integral numbers lose their decimals (`12.0` → `"12"`),
/// text is trimmed, blanks and `nan`/`none` are null.
pub fn normalize_id(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Number(value) if !value.is_finite() => None,
        Cell::Number(value) if value.fract() == 0.0 => Some(format!("{}", *value as i64)),
        other => non_null_text(other),
    }
}

/// Picks the lab workbook for `year` from a folder listing: the first `.xlsx` whose name
/// mentions the year, otherwise the first `.xlsx` in the folder.
pub fn select_lab_file(entries: &[StoreEntry], year: i32) -> Option<&StoreEntry> {
    let workbooks: Vec<&StoreEntry> = entries
        .iter()
        .filter(|entry| !entry.is_dir && entry.name.to_lowercase().ends_with(".xlsx"))
        .collect();
    let year_text = year.to_string();
    match workbooks
        .iter()
        .find(|entry| entry.name.contains(&year_text))
    {
        Some(entry) => Some(*entry),
        None => {
            let fallback = workbooks.first().copied();
            if let Some(entry) = fallback {
                warn!(year, file = %entry.name, "no lab workbook named for year, using first one");
            }
            fallback
        }
    }
}

/// Resolves a lab path that may name either a workbook or a folder of workbooks.
pub fn resolve_lab_path(
    store: &dyn ResourceStore,
    path: &str,
    year: i32,
) -> Result<Option<String>, LabError> {
    if path.to_lowercase().ends_with(".xlsx") {
        return Ok(Some(path.to_string()));
    }
    let entries = store.list(path)?;
    Ok(select_lab_file(&entries, year).map(|entry| entry.path.clone()))
}
