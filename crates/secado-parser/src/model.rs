use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw export layout a sensor file was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorFileFormat {
    /// Tab-delimited variable log (`VarName`, `TimeString`, `VarValue`, ...), usually UTF-16.
    JpvVariableLog,
    /// Delimited table with a date column, a time column and one column per voltage channel.
    RbChannelTable,
}

impl SensorFileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorFileFormat::JpvVariableLog => "jpv_variable_log",
            SensorFileFormat::RbChannelTable => "rb_channel_table",
        }
    }
}

impl fmt::Display for SensorFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One long-format row as it appeared in the raw export. Nothing is parsed beyond splitting
/// fields; timestamp and value interpretation belong to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub timestamp_text: Option<String>,
    pub variable: String,
    pub value_text: String,
    /// Untouched source fields kept for traceability, in a stable order.
    pub raw_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ParsedSensorFile {
    pub format: SensorFileFormat,
    pub rows: Vec<ParsedRow>,
    pub skipped_rows: usize,
}

impl ParsedSensorFile {
    pub fn variables(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.variable.as_str()) {
                seen.push(row.variable.as_str());
            }
        }
        seen
    }
}
