use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calibrator::{CalibrationReport, VoltageCalibrator};
use crate::config::EngineConfig;
use crate::curves::{
    find_calibration_files, select_calibration_file, CurveSelection, CurveStore, VarietyAliases,
};
use crate::error::{EngineError, Result};
use crate::ingest::{IngestReport, Ingestor, RawReading};
use crate::lab::{resolve_lab_path, LabError, LabLoader};
use crate::matcher::{IntervalMatcher, MatchMode, MatchReport};
use crate::pivot::{PivotReport, WidePivoter};
use crate::storage::{ResourceStore, StoreError};
use crate::timestamps::TimestampNormalizer;
use crate::types::{LabBatchRecord, Plant, SensorReading};
use crate::variables::ChannelAliases;
use crate::wide::WideTable;
use crate::workbook::{WorkbookOpener, XlsxOpener};

/// Where the lab control workbook for one plant and campaign year lives. `path` may name the
/// workbook itself or a folder holding one workbook per year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabSource {
    pub plant: Plant,
    pub year: i32,
    pub path: String,
}

/// Folder searched recursively for a plant's curve workbooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveRoot {
    pub plant: Plant,
    pub root: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationRequest {
    pub readings: Vec<RawReading>,
    /// Campaign year for every reading; when absent each reading's own year is used.
    pub year: Option<i32>,
    pub lab_sources: Vec<LabSource>,
    pub curve_roots: Vec<CurveRoot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub plant: Plant,
    pub year: i32,
    pub readings: usize,
    pub lab_path: Option<String>,
    pub lab_records: usize,
    pub lab_dropped_rows: usize,
    pub match_mode: MatchMode,
    pub matching: MatchReport,
    pub pivot: PivotReport,
    pub curves: Option<CurveSelection>,
    pub calibration: CalibrationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ingest: IngestReport,
    /// Readings with neither a campaign year nor a timestamp to infer one from.
    pub ungrouped_readings: usize,
    pub groups: Vec<GroupSummary>,
    pub output_rows: usize,
}

impl RunSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-sensor coverage of the consolidated table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaRow {
    pub plant: Plant,
    pub year: i32,
    pub sensor_id: u32,
    pub rows: usize,
    pub first_timestamp: NaiveDateTime,
    pub last_timestamp: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct ConsolidationOutput {
    pub table: WideTable,
    pub summary: RunSummary,
    pub qa: Vec<QaRow>,
}

/// Fetches each distinct resource at most once per run.
struct ResourceCache<'a> {
    store: &'a dyn ResourceStore,
    opener: &'a dyn WorkbookOpener,
    downloads: HashMap<String, Arc<Vec<u8>>>,
    curve_files: HashMap<Plant, BTreeMap<i32, String>>,
}

impl<'a> ResourceCache<'a> {
    fn new(store: &'a dyn ResourceStore, opener: &'a dyn WorkbookOpener) -> Self {
        Self {
            store,
            opener,
            downloads: HashMap::new(),
            curve_files: HashMap::new(),
        }
    }

    fn fetch(&mut self, path: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.downloads.get(path) {
            return Ok(Arc::clone(bytes));
        }
        let bytes = self
            .store
            .download(path)
            .map(Arc::new)
            .map_err(|err| unavailable(path, err))?;
        self.downloads.insert(path.to_string(), Arc::clone(&bytes));
        Ok(bytes)
    }

    fn curve_files(&mut self, plant: Plant, root: &str) -> &BTreeMap<i32, String> {
        let store = self.store;
        self.curve_files
            .entry(plant)
            .or_insert_with(|| find_calibration_files(store, root, plant))
    }
}

fn unavailable(path: &str, err: StoreError) -> EngineError {
    EngineError::ResourceUnavailable {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

/// Runs ingestion, lab matching, pivoting and calibration for a batch of readings, one
/// (plant, year) group at a time.
///
/// Data-quality problems only null the affected outputs and are reported in the summary.
/// A workbook the store cannot deliver fails the run with
/// [`EngineError::ResourceUnavailable`].
pub fn run_consolidation(
    store: &dyn ResourceStore,
    config: &EngineConfig,
    request: ConsolidationRequest,
) -> Result<ConsolidationOutput> {
    run_consolidation_with(store, &XlsxOpener, config, request)
}

/// [`run_consolidation`] with a custom way of decoding downloaded workbooks.
pub fn run_consolidation_with(
    store: &dyn ResourceStore,
    opener: &dyn WorkbookOpener,
    config: &EngineConfig,
    request: ConsolidationRequest,
) -> Result<ConsolidationOutput> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let normalizer = TimestampNormalizer::new(config.timezone()?).with_day_first(config.day_first);
    let channels = ChannelAliases::from_config(&config.channels);
    let varieties = VarietyAliases::from_config(&config.varieties);

    info!(
        %run_id,
        readings = request.readings.len(),
        year = ?request.year,
        "starting consolidation run"
    );

    let ingested = Ingestor::new(&normalizer, config).ingest(request.readings, request.year);

    let mut groups: BTreeMap<(Plant, i32), Vec<SensorReading>> = BTreeMap::new();
    let mut ungrouped_readings = 0;
    for reading in ingested.readings {
        match reading.year {
            Some(year) => groups.entry((reading.plant, year)).or_default().push(reading),
            None => ungrouped_readings += 1,
        }
    }
    if ungrouped_readings > 0 {
        warn!(count = ungrouped_readings, "readings without a year were skipped");
    }

    let mut resources = ResourceCache::new(store, opener);
    let mut curve_stores: HashMap<String, Option<CurveStore>> = HashMap::new();
    let pivoter = WidePivoter::new(&channels, config);
    let calibrator = VoltageCalibrator::new();

    let mut table = WideTable::empty();
    let mut summaries = Vec::with_capacity(groups.len());

    for ((plant, year), readings) in groups {
        let lab_source = request
            .lab_sources
            .iter()
            .find(|source| source.plant == plant && source.year == year);
        let lab = match lab_source {
            Some(source) => load_lab(&mut resources, &normalizer, config, source)?,
            None => {
                warn!(%plant, year, "no lab workbook configured; no reading can be attributed");
                LoadedLab::default()
            }
        };

        let mode = if lab.has_sensor_column {
            MatchMode::SensorAware
        } else {
            MatchMode::TimeOnly
        };
        let matched = IntervalMatcher::new(mode).match_readings(&readings, &lab.records);
        let mut pivoted = pivoter.pivot(&matched.matched);

        let curves = match request.curve_roots.iter().find(|root| root.plant == plant) {
            Some(root) => {
                let candidates = resources.curve_files(plant, &root.root).clone();
                select_calibration_file(&candidates, year, plant)
            }
            None => {
                warn!(%plant, "no curve root configured");
                None
            }
        };

        let curve_store = match &curves {
            Some(selection) => {
                if !curve_stores.contains_key(&selection.path) {
                    let loaded = open_curve_store(
                        &mut resources,
                        &selection.path,
                        &varieties,
                        &normalizer,
                    )?;
                    curve_stores.insert(selection.path.clone(), loaded);
                }
                curve_stores
                    .get_mut(&selection.path)
                    .and_then(Option::as_mut)
            }
            None => None,
        };

        let calibration = calibrator.calibrate(&mut pivoted.table.rows, curve_store);
        pivoted.table.calibrated = true;

        summaries.push(GroupSummary {
            plant,
            year,
            readings: readings.len(),
            lab_path: lab.path,
            lab_records: lab.records.len(),
            lab_dropped_rows: lab.dropped_rows,
            match_mode: mode,
            matching: matched.report,
            pivot: pivoted.report,
            curves,
            calibration,
        });
        table.append(pivoted.table);
    }
    table.calibrated = true;

    let qa = qa_rows(&table);
    let summary = RunSummary {
        run_id,
        started_at,
        ingest: ingested.report,
        ungrouped_readings,
        groups: summaries,
        output_rows: table.len(),
    };
    info!(%run_id, rows = table.len(), groups = summary.groups.len(), "consolidation finished");

    Ok(ConsolidationOutput { table, summary, qa })
}

#[derive(Debug, Default)]
struct LoadedLab {
    path: Option<String>,
    records: Vec<LabBatchRecord>,
    dropped_rows: usize,
    has_sensor_column: bool,
}

fn load_lab(
    resources: &mut ResourceCache<'_>,
    normalizer: &TimestampNormalizer,
    config: &EngineConfig,
    source: &LabSource,
) -> Result<LoadedLab> {
    let path = match resolve_lab_path(resources.store, &source.path, source.year) {
        Ok(Some(path)) => path,
        Ok(None) => {
            warn!(plant = %source.plant, folder = %source.path, "lab folder holds no workbook");
            return Ok(LoadedLab::default());
        }
        Err(LabError::Store(err)) => return Err(unavailable(&source.path, err)),
        Err(err) => return Err(err.into()),
    };

    let bytes = resources.fetch(&path)?;
    let workbook = match resources.opener.open(&path, bytes.to_vec()) {
        Ok(workbook) => workbook,
        Err(err) => {
            warn!(path = %path, error = %err, "lab workbook could not be decoded");
            return Ok(LoadedLab {
                path: Some(path),
                ..LoadedLab::default()
            });
        }
    };

    let loader = LabLoader::new(
        normalizer,
        config.plant(source.plant).sensor_numbering,
    );
    match loader.load(workbook.as_ref(), source.plant, source.year) {
        Ok(load) => Ok(LoadedLab {
            path: Some(path),
            records: load.records,
            dropped_rows: load.dropped_rows,
            has_sensor_column: load.has_sensor_column,
        }),
        Err(err) => {
            warn!(path = %path, error = %err, "lab workbook unusable; no reading can be attributed");
            Ok(LoadedLab {
                path: Some(path),
                ..LoadedLab::default()
            })
        }
    }
}

fn open_curve_store(
    resources: &mut ResourceCache<'_>,
    path: &str,
    varieties: &VarietyAliases,
    normalizer: &TimestampNormalizer,
) -> Result<Option<CurveStore>> {
    let bytes = resources.fetch(path)?;
    match resources.opener.open(path, bytes.to_vec()) {
        Ok(workbook) => Ok(Some(CurveStore::new(
            workbook,
            varieties.clone(),
            normalizer.clone(),
        ))),
        Err(err) => {
            warn!(path, error = %err, "curve workbook could not be decoded; outputs left null");
            Ok(None)
        }
    }
}

/// Row counts and time span per (plant, year, sensor), in key order.
pub fn qa_rows(table: &WideTable) -> Vec<QaRow> {
    let mut qa: Vec<QaRow> = Vec::new();
    for row in &table.rows {
        let key = row.key;
        match qa.last_mut() {
            Some(last)
                if last.plant == key.plant
                    && last.year == key.year
                    && last.sensor_id == key.sensor_id =>
            {
                last.rows += 1;
                last.first_timestamp = last.first_timestamp.min(key.timestamp);
                last.last_timestamp = last.last_timestamp.max(key.timestamp);
            }
            _ => qa.push(QaRow {
                plant: key.plant,
                year: key.year,
                sensor_id: key.sensor_id,
                rows: 1,
                first_timestamp: key.timestamp,
                last_timestamp: key.timestamp,
            }),
        }
    }
    qa
}
