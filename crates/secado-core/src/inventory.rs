//! Which files under a raw-data folder are sensor exports, and for which plant, campaign
//! year and sensor.

use once_cell::sync::Lazy;
use regex::Regex;
use secado_parser::sensor_label_from_name;
use serde::Serialize;
use tracing::{debug, info};

use crate::storage::{ResourceStore, StoreError};
use crate::types::{Plant, SourceInfo};

static JPV_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJPV\b").expect("valid regex"));
static RB_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bRB\b").expect("valid regex"));
static SENSOR_FOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)SENSOR[1-6]").expect("valid regex"));
static CAMPAIGN_FOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(20\d{2})\s+Datos\s+Sensores\s+(JPV|RB)\b").expect("valid regex")
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(20\d{2})").expect("valid regex"));

const LAB_FOLDER: &str = "laboratorio";

/// A file accepted as a sensor export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorFileEntry {
    pub path: String,
    pub name: String,
    pub plant: Plant,
    /// Campaign year from the folder layout or file name, if any.
    pub year: Option<i32>,
    /// Raw `SENSOR<n>` label from the file name, else the nearest folder.
    pub sensor_label: Option<u32>,
}

impl SensorFileEntry {
    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            year: self.year,
            ..SourceInfo::from_path(&self.path)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not a `.txt`/`.csv` file.
    NotSensorExport,
    /// Below a lab folder; lab workbooks are located separately.
    LabFolder,
    /// A JPV log outside any `SENSOR1`..`SENSOR6` folder.
    OutsideSensorFolder,
    OtherPlant,
    OtherYear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryReport {
    pub files_seen: usize,
    pub accepted: usize,
    pub not_sensor_exports: usize,
    pub lab_folder: usize,
    pub outside_sensor_folder: usize,
    pub other_plant: usize,
    pub other_year: usize,
}

impl InventoryReport {
    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::NotSensorExport => self.not_sensor_exports += 1,
            SkipReason::LabFolder => self.lab_folder += 1,
            SkipReason::OutsideSensorFolder => self.outside_sensor_folder += 1,
            SkipReason::OtherPlant => self.other_plant += 1,
            SkipReason::OtherYear => self.other_year += 1,
        }
    }
}

/// Classifies `path`, a `/`-separated path inside the scanned `root`.
///
/// The extension decides the plant (`.txt` is JPV, `.csv` is RB) unless the file name carries
/// an explicit `JPV`/`RB` token. JPV logs are only accepted below a `SENSOR1`..`SENSOR6`
/// folder. The year comes from a `<year> Datos Sensores <PLANT>` folder, then from the file
/// name, then from anywhere in the path.
pub fn classify_sensor_path(root: &str, path: &str) -> Result<SensorFileEntry, SkipReason> {
    let root = root.trim_end_matches('/');
    let relative = path
        .strip_prefix(root)
        .filter(|_| !root.is_empty())
        .unwrap_or(path);
    let parts: Vec<&str> = relative.split('/').filter(|part| !part.is_empty()).collect();
    let Some((name, folders)) = parts.split_last() else {
        return Err(SkipReason::NotSensorExport);
    };
    if folders
        .iter()
        .any(|folder| folder.eq_ignore_ascii_case(LAB_FOLDER))
    {
        return Err(SkipReason::LabFolder);
    }

    let lower = name.to_lowercase();
    let mut plant = if lower.ends_with(".txt") {
        Plant::Jpv
    } else if lower.ends_with(".csv") {
        Plant::Rb
    } else {
        return Err(SkipReason::NotSensorExport);
    };
    if JPV_TOKEN.is_match(name) {
        plant = Plant::Jpv;
    } else if RB_TOKEN.is_match(name) {
        plant = Plant::Rb;
    }

    if plant == Plant::Jpv && !SENSOR_FOLDER.is_match(path) {
        return Err(SkipReason::OutsideSensorFolder);
    }

    let year = CAMPAIGN_FOLDER
        .captures_iter(path)
        .find(|caps| caps[2].eq_ignore_ascii_case(plant.code()))
        .and_then(|caps| caps[1].parse().ok())
        .or_else(|| first_year(name))
        .or_else(|| first_year(path));

    let sensor_label = sensor_label_from_name(name).or_else(|| {
        path.split('/')
            .rev()
            .skip(1)
            .find_map(sensor_label_from_name)
    });

    Ok(SensorFileEntry {
        path: path.to_string(),
        name: name.to_string(),
        plant,
        year,
        sensor_label,
    })
}

fn first_year(text: &str) -> Option<i32> {
    YEAR.captures(text).and_then(|caps| caps[1].parse().ok())
}

/// Accumulates accepted sensor exports for one plant and, optionally, one campaign year.
/// Files without a detectable year are kept; the run's year applies to them.
#[derive(Debug, Clone)]
pub struct SensorInventory {
    plant: Plant,
    year: Option<i32>,
    entries: Vec<SensorFileEntry>,
    report: InventoryReport,
}

impl SensorInventory {
    pub fn new(plant: Plant, year: Option<i32>) -> Self {
        Self {
            plant,
            year,
            entries: Vec::new(),
            report: InventoryReport::default(),
        }
    }

    /// Classifies `path` under `root` and keeps it when it belongs to this inventory's plant
    /// and year.
    pub fn consider(&mut self, root: &str, path: &str) -> Option<&SensorFileEntry> {
        self.report.files_seen += 1;
        let verdict = classify_sensor_path(root, path).and_then(|entry| {
            if entry.plant != self.plant {
                Err(SkipReason::OtherPlant)
            } else if matches!((self.year, entry.year), (Some(want), Some(found)) if want != found)
            {
                Err(SkipReason::OtherYear)
            } else {
                Ok(entry)
            }
        });

        match verdict {
            Ok(entry) => {
                self.report.accepted += 1;
                self.entries.push(entry);
                self.entries.last()
            }
            Err(reason) => {
                debug!(path, ?reason, "skipping file in sensor folder");
                self.report.record_skip(reason);
                None
            }
        }
    }

    pub fn entries(&self) -> &[SensorFileEntry] {
        &self.entries
    }

    pub fn report(&self) -> &InventoryReport {
        &self.report
    }

    pub fn into_parts(self) -> (Vec<SensorFileEntry>, InventoryReport) {
        (self.entries, self.report)
    }
}

/// Walks `root` in `store` and classifies every file found. Lab folders are not descended.
pub fn build_inventory(
    store: &dyn ResourceStore,
    root: &str,
    plant: Plant,
    year: Option<i32>,
) -> Result<SensorInventory, StoreError> {
    let mut inventory = SensorInventory::new(plant, year);
    let mut pending = vec![root.trim_end_matches('/').to_string()];

    while let Some(folder) = pending.pop() {
        for entry in store.list(&folder)? {
            if entry.is_dir {
                if !entry.name.eq_ignore_ascii_case(LAB_FOLDER) {
                    pending.push(entry.path);
                }
                continue;
            }
            if let Some(accepted) = inventory.consider(root, &entry.path) {
                debug!(path = %accepted.path, plant = %accepted.plant, year = ?accepted.year, "accepted sensor export");
            }
        }
    }

    inventory.entries.sort_by(|a, b| a.path.cmp(&b.path));
    info!(
        %plant,
        year = ?year,
        accepted = inventory.report.accepted,
        skipped = inventory.report.files_seen - inventory.report.accepted,
        "built sensor inventory"
    );
    Ok(inventory)
}
