use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::warn;

use crate::timestamps::from_excel_serial;
use crate::variables::parse_decimal;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to open workbook: {0}")]
    Open(#[from] calamine::Error),
    #[error("workbook has no sheet named '{0}'")]
    MissingSheet(String),
    #[error("sheet '{sheet}' could not be read: {reason}")]
    UnreadableSheet { sheet: String, reason: String },
    #[error("workbook contains no sheets")]
    NoSheets,
}

/// A single spreadsheet cell reduced to the shapes the engine cares about.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Bool(bool),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(value) if value.is_finite() => Some(*value),
            Cell::Text(text) => parse_decimal(text),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Number(value) => Some(value.to_string()),
            Cell::DateTime(value) => Some(value.to_string()),
            Cell::Bool(value) => Some(value.to_string()),
        }
    }

    /// Dates stored as cells or as spreadsheet serial numbers; text is left to the caller.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::DateTime(value) => Some(*value),
            Cell::Number(value) => from_excel_serial(*value),
            _ => None,
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::DateTime(value)
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Int(value) => Cell::Number(*value as f64),
            Data::Float(value) => Cell::Number(*value),
            Data::String(value) => Cell::Text(value.clone()),
            Data::Bool(value) => Cell::Bool(*value),
            Data::DateTime(value) => from_excel_serial(value.as_f64())
                .map(Cell::DateTime)
                .unwrap_or(Cell::Empty),
            Data::DateTimeIso(value) | Data::DurationIso(value) => Cell::Text(value.clone()),
        }
    }
}

static EMPTY: Cell = Cell::Empty;

/// Cell grid of one sheet, addressed by absolute zero-based (row, column).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    rows: Vec<Vec<Cell>>,
}

impl SheetGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(Cell::is_empty))
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First cell (row-major) whose trimmed text equals `text` exactly.
    pub fn find_text(&self, text: &str) -> Option<(usize, usize)> {
        self.rows.iter().enumerate().find_map(|(r, cells)| {
            cells.iter().position(|cell| match cell {
                Cell::Text(value) => value.trim() == text,
                _ => false,
            })
            .map(|c| (r, c))
        })
    }
}

/// Read access to a spreadsheet workbook.
pub trait WorkbookSource {
    fn sheet_names(&self) -> Vec<String>;
    fn sheet(&self, name: &str) -> Result<SheetGrid, WorkbookError>;

    fn first_sheet(&self) -> Result<SheetGrid, WorkbookError> {
        let names = self.sheet_names();
        let first = names.first().ok_or(WorkbookError::NoSheets)?;
        self.sheet(first)
    }
}

/// `.xlsx`/`.xls`/`.ods` workbook decoded from an in-memory buffer. Every sheet is read up
/// front; a sheet that fails to decode only fails lookups of that sheet.
pub struct XlsxWorkbook {
    names: Vec<String>,
    sheets: BTreeMap<String, Result<SheetGrid, String>>,
}

impl XlsxWorkbook {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, WorkbookError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let names = workbook.sheet_names();
        let mut sheets = BTreeMap::new();

        for name in &names {
            let grid = match workbook.worksheet_range(name) {
                Ok(range) => {
                    let (row_offset, col_offset) = range
                        .start()
                        .map(|(row, col)| (row as usize, col as usize))
                        .unwrap_or((0, 0));
                    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
                    for data_row in range.rows() {
                        let mut cells = vec![Cell::Empty; col_offset];
                        cells.extend(data_row.iter().map(Cell::from));
                        rows.push(cells);
                    }
                    Ok(SheetGrid::new(rows))
                }
                Err(err) => {
                    warn!(sheet = %name, error = %err, "failed to read worksheet");
                    Err(err.to_string())
                }
            };
            sheets.insert(name.clone(), grid);
        }

        Ok(Self { names, sheets })
    }
}

impl WorkbookSource for XlsxWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn sheet(&self, name: &str) -> Result<SheetGrid, WorkbookError> {
        match self.sheets.get(name) {
            Some(Ok(grid)) => Ok(grid.clone()),
            Some(Err(reason)) => Err(WorkbookError::UnreadableSheet {
                sheet: name.to_string(),
                reason: reason.clone(),
            }),
            None => Err(WorkbookError::MissingSheet(name.to_string())),
        }
    }
}

/// Turns downloaded bytes into a workbook. The engine goes through this seam so runs can be
/// driven without real spreadsheet files.
pub trait WorkbookOpener {
    fn open(&self, path: &str, bytes: Vec<u8>) -> Result<Box<dyn WorkbookSource>, WorkbookError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxOpener;

impl WorkbookOpener for XlsxOpener {
    fn open(&self, _path: &str, bytes: Vec<u8>) -> Result<Box<dyn WorkbookSource>, WorkbookError> {
        Ok(Box::new(XlsxWorkbook::from_bytes(bytes)?))
    }
}

/// Workbook assembled in memory, sheet by sheet, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkbook {
    sheets: Vec<(String, SheetGrid)>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        self.sheets.push((name.into(), SheetGrid::new(rows)));
        self
    }
}

impl WorkbookSource for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn sheet(&self, name: &str) -> Result<SheetGrid, WorkbookError> {
        self.sheets
            .iter()
            .find(|(sheet, _)| sheet == name)
            .map(|(_, grid)| grid.clone())
            .ok_or_else(|| WorkbookError::MissingSheet(name.to_string()))
    }
}
