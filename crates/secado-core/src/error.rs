// crates/secado-core/src/error.rs

use thiserror::Error;

use crate::config::ConfigError;
use crate::curves::CurveError;
use crate::lab::LabError;
use crate::storage::StoreError;
use crate::workbook::WorkbookError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The storage collaborator could not deliver a workbook the run depends on.
    #[error("resource unavailable at {path}: {reason}")]
    ResourceUnavailable { path: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("workbook error: {0}")]
    Workbook(#[from] WorkbookError),

    #[error("lab workbook error: {0}")]
    Lab(#[from] LabError),

    #[error("calibration curve error: {0}")]
    Curve(#[from] CurveError),

    #[error("sensor file parsing failed: {0}")]
    Parser(#[from] secado_parser::ParserError),

    #[error("building the wide table failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("reading or writing run files failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("run summary could not be encoded as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
