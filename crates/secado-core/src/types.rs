// crates/secado-core/src/types.rs

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Drying facility. Each plant exports its own sensor-file layout and numbers its sensors
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plant {
    Jpv,
    Rb,
}

impl Plant {
    pub const ALL: [Plant; 2] = [Plant::Jpv, Plant::Rb];

    pub fn code(&self) -> &'static str {
        match self {
            Plant::Jpv => "JPV",
            Plant::Rb => "RB",
        }
    }
}

impl fmt::Display for Plant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlant(pub String);

impl fmt::Display for UnknownPlant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown plant code '{}' (expected JPV or RB)", self.0)
    }
}

impl std::error::Error for UnknownPlant {}

impl FromStr for Plant {
    type Err = UnknownPlant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JPV" => Ok(Plant::Jpv),
            "RB" => Ok(Plant::Rb),
            _ => Err(UnknownPlant(s.to_string())),
        }
    }
}

/// File-level provenance shared by every reading that came from the same export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    pub source_file: Option<String>,
    pub source_path: Option<String>,
    /// Campaign year read from the export's folder layout or name.
    pub year: Option<i32>,
    pub tirada_num: Option<i64>,
    pub tirada_fecha: Option<NaiveDate>,
}

impl SourceInfo {
    pub fn from_path(path: &str) -> Self {
        let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
        Self {
            source_file: Some(file.to_string()),
            source_path: Some(path.to_string()),
            ..Self::default()
        }
    }
}

/// A reading after ingestion: timestamp normalized to plant-local time, sensor label mapped
/// to its dryer number, value parsed. Fields that could not be resolved stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub timestamp: Option<NaiveDateTime>,
    pub plant: Plant,
    pub year: Option<i32>,
    pub sensor_id: Option<u32>,
    pub variable: String,
    pub value: Option<f64>,
    pub source: Arc<SourceInfo>,
    /// Raw provenance fields carried through to the wide table.
    pub extras: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabBatchRecord {
    pub plant: Plant,
    pub year: i32,
    pub sensor_id: Option<u32>,
    pub variety: Option<String>,
    pub batch_id: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub initial_humidity: Option<f64>,
    pub final_humidity: Option<f64>,
    pub discard: Option<String>,
}

/// Lab metadata attributed to a reading by the interval join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabAttribution {
    pub variety: Option<String>,
    pub batch_id: Option<String>,
    pub initial_humidity: Option<f64>,
    pub final_humidity: Option<f64>,
    pub discard: Option<String>,
}

impl From<&LabBatchRecord> for LabAttribution {
    fn from(record: &LabBatchRecord) -> Self {
        Self {
            variety: record.variety.clone(),
            batch_id: record.batch_id.clone(),
            initial_humidity: record.initial_humidity,
            final_humidity: record.final_humidity,
            discard: record.discard.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedReading {
    pub reading: SensorReading,
    /// `None` when no lab interval covers the reading for its sensor.
    pub lab: Option<LabAttribution>,
}

impl MatchedReading {
    pub fn variety(&self) -> Option<&str> {
        self.lab.as_ref().and_then(|lab| lab.variety.as_deref())
    }
}
