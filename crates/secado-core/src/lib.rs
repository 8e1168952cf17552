pub mod calibrator;
pub mod config;
pub mod curves;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod inventory;
pub mod lab;
pub mod matcher;
pub mod pivot;
pub mod storage;
pub mod timestamps;
pub mod types;
pub mod variables;
pub mod wide;
pub mod workbook;

pub use config::EngineConfig;
pub use engine::{
    run_consolidation, run_consolidation_with, ConsolidationOutput, ConsolidationRequest, CurveRoot,
    LabSource, RunSummary,
};
pub use error::{EngineError, Result};
pub use types::Plant;
pub use wide::{WideRow, WideTable};
