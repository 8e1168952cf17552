use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::VarietyConfig;
use crate::lab::ascii_fold;
use crate::storage::ResourceStore;
use crate::timestamps::{RawTimestamp, TimestampNormalizer};
use crate::types::Plant;
use crate::workbook::{Cell, SheetGrid, WorkbookError, WorkbookSource};

pub const DRYER_COUNT: usize = 6;

const COEFFICIENT_SEARCH_ROWS: usize = 5;
const MARKER: &str = "Fecha";
const MAX_SEARCH_DEPTH: usize = 15;
const EXCLUDED_FOLDERS: &[&str] = &["laboratorio"];
const TEMPERATURE_SHEETS: &[&str] = &["temperature", "temperatura"];

#[derive(Debug, Error)]
pub enum CurveError {
    #[error("sheet '{0}' is empty")]
    EmptySheet(String),
    #[error("sheet '{sheet}' has no row with {expected} numeric coefficients in its first rows")]
    MissingCoefficients { sheet: String, expected: usize },
    #[error("sheet '{0}' has no 'Fecha' marker cell")]
    MissingMarker(String),
    #[error("sheet '{0}' has no offset row below the 'Fecha' marker")]
    MissingOffsetRow(String),
    #[error("workbook has no temperature sheet")]
    MissingTemperatureSheet,
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
}

/// Dated correction series for one dryer, sorted and forward-filled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionSeries {
    points: Vec<(NaiveDateTime, f64)>,
}

impl CorrectionSeries {
    /// Builds the series from raw `(date, value)` entries. Zero and missing values mean "no
    /// correction recorded" and carry the previous value forward; before the first recorded
    /// value the correction is 0.
    pub fn from_raw(mut entries: Vec<(NaiveDateTime, Option<f64>)>) -> Self {
        entries.sort_by_key(|(date, _)| *date);
        let mut last = 0.0;
        let points = entries
            .into_iter()
            .map(|(date, value)| {
                if let Some(value) = value.filter(|value| *value != 0.0 && value.is_finite()) {
                    last = value;
                }
                (date, last)
            })
            .collect();
        Self { points }
    }

    /// Latest correction at or before `at`, or 0 when none exists yet.
    pub fn as_of(&self, at: NaiveDateTime) -> f64 {
        let pos = self.points.partition_point(|(date, _)| *date <= at);
        pos.checked_sub(1)
            .map(|idx| self.points[idx].1)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Per-dryer fixed offsets and time-varying corrections, dryers numbered 1..=6.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DryerCorrections {
    pub fixed: [f64; DRYER_COUNT],
    pub series: [CorrectionSeries; DRYER_COUNT],
}

impl DryerCorrections {
    fn slot(dryer: u32) -> Option<usize> {
        let idx = (dryer as usize).checked_sub(1)?;
        (idx < DRYER_COUNT).then_some(idx)
    }

    /// `fixed_offset[dryer] - correction(dryer, at)`, or `None` for an unknown dryer.
    pub fn net_offset(&self, dryer: u32, at: NaiveDateTime) -> Option<f64> {
        let idx = Self::slot(dryer)?;
        Some(self.fixed[idx] - self.series[idx].as_of(at))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureCurve {
    pub at: f64,
    pub bt: f64,
    pub corrections: DryerCorrections,
}

impl TemperatureCurve {
    pub fn apply(&self, volt_tem: f64, dryer: u32, at: NaiveDateTime) -> Option<f64> {
        let offset = self.corrections.net_offset(dryer, at)?;
        Some(volt_tem * self.at + self.bt + offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HumidityCurve {
    pub ah: f64,
    pub bh: f64,
    pub ch: f64,
    pub corrections: DryerCorrections,
}

impl HumidityCurve {
    pub fn apply(&self, volt_hum: f64, dryer: u32, at: NaiveDateTime) -> Option<f64> {
        let offset = self.corrections.net_offset(dryer, at)?;
        Some(volt_hum * volt_hum * self.ah + volt_hum * self.bh + self.ch + offset)
    }
}

pub fn parse_temperature_sheet(
    name: &str,
    sheet: &SheetGrid,
    normalizer: &TimestampNormalizer,
) -> Result<TemperatureCurve, CurveError> {
    let [at, bt] = coefficients::<2>(name, sheet)?;
    let corrections = dryer_corrections(name, sheet, normalizer)?;
    Ok(TemperatureCurve {
        at,
        bt,
        corrections,
    })
}

pub fn parse_humidity_sheet(
    name: &str,
    sheet: &SheetGrid,
    normalizer: &TimestampNormalizer,
) -> Result<HumidityCurve, CurveError> {
    let [ah, bh, ch] = coefficients::<3>(name, sheet)?;
    let corrections = dryer_corrections(name, sheet, normalizer)?;
    Ok(HumidityCurve {
        ah,
        bh,
        ch,
        corrections,
    })
}

/// First row among the first few whose leading `N` cells are all numeric.
fn coefficients<const N: usize>(name: &str, sheet: &SheetGrid) -> Result<[f64; N], CurveError> {
    if sheet.is_empty() {
        return Err(CurveError::EmptySheet(name.to_string()));
    }
    (0..sheet.height().min(COEFFICIENT_SEARCH_ROWS))
        .find_map(|row| {
            let mut values = [0.0; N];
            for (col, slot) in values.iter_mut().enumerate() {
                *slot = sheet.cell(row, col).as_f64()?;
            }
            Some(values)
        })
        .ok_or(CurveError::MissingCoefficients {
            sheet: name.to_string(),
            expected: N,
        })
}

/// Reads the block anchored at the `Fecha` marker: fixed offsets on the row below it, then
/// one dated correction row per entry.
fn dryer_corrections(
    name: &str,
    sheet: &SheetGrid,
    normalizer: &TimestampNormalizer,
) -> Result<DryerCorrections, CurveError> {
    let (marker_row, marker_col) = sheet
        .find_text(MARKER)
        .ok_or_else(|| CurveError::MissingMarker(name.to_string()))?;
    let offset_row = marker_row + 1;
    if offset_row >= sheet.height() {
        return Err(CurveError::MissingOffsetRow(name.to_string()));
    }

    let mut fixed = [0.0; DRYER_COUNT];
    for (dryer, slot) in fixed.iter_mut().enumerate() {
        *slot = sheet
            .cell(offset_row, marker_col + 1 + dryer)
            .as_f64()
            .unwrap_or(0.0);
    }

    let mut raw: [Vec<(NaiveDateTime, Option<f64>)>; DRYER_COUNT] = Default::default();
    let mut undated_rows = 0;
    for row in (offset_row + 1)..sheet.height() {
        let block_empty =
            (0..=DRYER_COUNT).all(|offset| sheet.cell(row, marker_col + offset).is_empty());
        if block_empty {
            continue;
        }
        let Some(date) = cell_date(sheet.cell(row, marker_col), normalizer) else {
            undated_rows += 1;
            continue;
        };
        for (dryer, entries) in raw.iter_mut().enumerate() {
            entries.push((date, sheet.cell(row, marker_col + 1 + dryer).as_f64()));
        }
    }
    if undated_rows > 0 {
        debug!(sheet = name, undated_rows, "correction rows without a valid date skipped");
    }

    Ok(DryerCorrections {
        fixed,
        series: raw.map(CorrectionSeries::from_raw),
    })
}

fn cell_date(cell: &Cell, normalizer: &TimestampNormalizer) -> Option<NaiveDateTime> {
    match cell {
        Cell::Text(text) => normalizer.normalize(&RawTimestamp::Text(text.clone()), false),
        other => other.as_datetime(),
    }
}

/// Lowercase, accent-free, whitespace removed: `"El Paso"` and `"el paso "` both become
/// `"elpaso"`.
pub fn normalize_variety(name: &str) -> String {
    ascii_fold(name)
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Variety spelling equivalences and fallback sheets, normalized once per run.
#[derive(Debug, Clone, Default)]
pub struct VarietyAliases {
    groups: HashMap<String, Vec<String>>,
    defaults: Vec<String>,
}

impl VarietyAliases {
    pub fn from_config(config: &VarietyConfig) -> Self {
        let mut groups = HashMap::new();
        for group in &config.alias_groups {
            let members: Vec<String> = group.iter().map(|name| normalize_variety(name)).collect();
            for member in &members {
                groups.entry(member.clone()).or_insert_with(|| members.clone());
            }
        }
        let mut defaults: Vec<String> = Vec::new();
        for name in &config.defaults {
            let normalized = normalize_variety(name);
            if !defaults.contains(&normalized) {
                defaults.push(normalized);
            }
        }
        Self { groups, defaults }
    }

    /// Spellings to try for a normalized variety, itself first.
    pub fn candidates(&self, normalized: &str) -> Vec<String> {
        let mut candidates = vec![normalized.to_string()];
        if let Some(group) = self.groups.get(normalized) {
            candidates.extend(group.iter().filter(|name| *name != normalized).cloned());
        }
        candidates
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarietyResolution {
    pub sheet: String,
    pub fallback: bool,
}

/// Maps lab variety names to the humidity sheets of one curve workbook.
#[derive(Debug, Clone)]
pub struct VarietyResolver {
    aliases: VarietyAliases,
    sheets: HashMap<String, String>,
    default_sheet: Option<String>,
}

impl VarietyResolver {
    pub fn new(sheet_names: &[String], aliases: VarietyAliases) -> Self {
        let sheets: HashMap<String, String> = sheet_names
            .iter()
            .map(|name| (normalize_variety(name), name.clone()))
            .filter(|(normalized, _)| !TEMPERATURE_SHEETS.contains(&normalized.as_str()))
            .collect();
        let default_sheet = aliases
            .defaults
            .iter()
            .find_map(|name| sheets.get(name).cloned());
        Self {
            aliases,
            sheets,
            default_sheet,
        }
    }

    pub fn default_sheet(&self) -> Option<&str> {
        self.default_sheet.as_deref()
    }

    pub fn resolve(&self, variety: &str) -> Option<VarietyResolution> {
        let normalized = normalize_variety(variety);
        let direct = self
            .aliases
            .candidates(&normalized)
            .iter()
            .find_map(|candidate| self.sheets.get(candidate).cloned());
        match direct {
            Some(sheet) => Some(VarietyResolution {
                sheet,
                fallback: false,
            }),
            None => self.default_sheet.clone().map(|sheet| VarietyResolution {
                sheet,
                fallback: true,
            }),
        }
    }
}

/// Lazily parsed curves of one workbook, memoized per sheet for the duration of a run.
/// Sheets that fail to parse are remembered as failures and not retried.
pub struct CurveStore {
    workbook: Box<dyn WorkbookSource>,
    normalizer: TimestampNormalizer,
    resolver: VarietyResolver,
    temperature: Option<Option<Arc<TemperatureCurve>>>,
    humidity: HashMap<String, Option<Arc<HumidityCurve>>>,
}

impl CurveStore {
    pub fn new(
        workbook: Box<dyn WorkbookSource>,
        aliases: VarietyAliases,
        normalizer: TimestampNormalizer,
    ) -> Self {
        let resolver = VarietyResolver::new(&workbook.sheet_names(), aliases);
        Self {
            workbook,
            normalizer,
            resolver,
            temperature: None,
            humidity: HashMap::new(),
        }
    }

    pub fn resolver(&self) -> &VarietyResolver {
        &self.resolver
    }

    pub fn temperature(&mut self) -> Option<Arc<TemperatureCurve>> {
        if let Some(cached) = &self.temperature {
            return cached.clone();
        }
        let parsed = self.load_temperature();
        let curve = match parsed {
            Ok(curve) => Some(Arc::new(curve)),
            Err(err) => {
                warn!(error = %err, "temperature curve unavailable; TEMPERATURA will be null");
                None
            }
        };
        self.temperature = Some(curve.clone());
        curve
    }

    fn load_temperature(&self) -> Result<TemperatureCurve, CurveError> {
        let name = self
            .workbook
            .sheet_names()
            .into_iter()
            .find(|name| TEMPERATURE_SHEETS.contains(&normalize_variety(name).as_str()))
            .ok_or(CurveError::MissingTemperatureSheet)?;
        let sheet = self.workbook.sheet(&name)?;
        parse_temperature_sheet(&name, &sheet, &self.normalizer)
    }

    pub fn humidity_sheet(&mut self, sheet: &str) -> Option<Arc<HumidityCurve>> {
        if let Some(cached) = self.humidity.get(sheet) {
            return cached.clone();
        }
        let parsed = self
            .workbook
            .sheet(sheet)
            .map_err(CurveError::from)
            .and_then(|grid| parse_humidity_sheet(sheet, &grid, &self.normalizer));
        let curve = match parsed {
            Ok(curve) => {
                debug!(sheet, "parsed humidity curve");
                Some(Arc::new(curve))
            }
            Err(err) => {
                warn!(sheet, error = %err, "humidity curve unavailable for sheet");
                None
            }
        };
        self.humidity.insert(sheet.to_string(), curve.clone());
        curve
    }

    /// Curve for a lab variety, falling back to the default sheet when the variety has none.
    pub fn humidity_for_variety(&mut self, variety: &str) -> Option<Arc<HumidityCurve>> {
        let resolution = self.resolver.resolve(variety)?;
        if resolution.fallback {
            warn!(
                variety,
                fallback = %resolution.sheet,
                "no humidity sheet for variety, using default"
            );
        }
        self.humidity_sheet(&resolution.sheet)
    }

    pub fn parsed_sheets(&self) -> usize {
        self.humidity.len() + usize::from(self.temperature.is_some())
    }
}

/// Walks the store below `root` collecting curve workbooks named like
/// `<year> ... Curvas ... <PLANT>.xlsx`. The first file seen for a year wins.
pub fn find_calibration_files(
    store: &dyn ResourceStore,
    root: &str,
    plant: Plant,
) -> BTreeMap<i32, String> {
    let mut found = BTreeMap::new();
    search_folder(store, root, plant, 0, &mut found);
    if found.is_empty() {
        warn!(%plant, root, "no calibration curve workbooks found");
    }
    found
}

fn search_folder(
    store: &dyn ResourceStore,
    folder: &str,
    plant: Plant,
    depth: usize,
    found: &mut BTreeMap<i32, String>,
) {
    if depth > MAX_SEARCH_DEPTH {
        return;
    }
    let entries = match store.list(folder) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(folder, error = %err, "skipping unlistable folder");
            return;
        }
    };

    for entry in entries {
        if entry.is_dir {
            if !EXCLUDED_FOLDERS.contains(&entry.name.to_lowercase().as_str()) {
                search_folder(store, &entry.path, plant, depth + 1, found);
            }
            continue;
        }
        if let Some(year) = curve_file_year(&entry.name, plant) {
            if let std::collections::btree_map::Entry::Vacant(slot) = found.entry(year) {
                info!(%plant, year, path = %entry.path, "found calibration curve workbook");
                slot.insert(entry.path);
            }
        }
    }
}

/// Year of a curve workbook name, if it matches `<4 digits> ... Curvas ... <PLANT>` and ends
/// in `.xlsx` (case-insensitive).
pub fn curve_file_year(name: &str, plant: Plant) -> Option<i32> {
    let lower = name.to_lowercase();
    if !lower.ends_with(".xlsx") {
        return None;
    }
    let plant_code = plant.code().to_lowercase();
    let bytes = lower.as_bytes();
    (0..bytes.len().saturating_sub(3)).find_map(|start| {
        let digits = &bytes[start..start + 4];
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let rest = &lower[start + 4..];
        let after_curvas = rest.find("curvas")? + "curvas".len();
        if !rest[after_curvas..].contains(&plant_code) {
            return None;
        }
        lower[start..start + 4].parse().ok()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YearFallback {
    Exact,
    /// Closest earlier year.
    PriorYear,
    /// No earlier year exists; the most recent one available.
    MostRecent,
}

impl fmt::Display for YearFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            YearFallback::Exact => "exact",
            YearFallback::PriorYear => "prior year",
            YearFallback::MostRecent => "most recent",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurveSelection {
    pub year: i32,
    pub path: String,
    pub fallback: YearFallback,
}

/// Chooses the curve workbook for `target_year`: exact year, else the closest earlier year,
/// else the most recent year available.
pub fn select_calibration_file(
    candidates: &BTreeMap<i32, String>,
    target_year: i32,
    plant: Plant,
) -> Option<CurveSelection> {
    if let Some(path) = candidates.get(&target_year) {
        info!(%plant, year = target_year, path = %path, "using calibration curves for exact year");
        return Some(CurveSelection {
            year: target_year,
            path: path.clone(),
            fallback: YearFallback::Exact,
        });
    }

    if let Some((year, path)) = candidates.range(..target_year).next_back() {
        warn!(
            %plant,
            target_year,
            year = *year,
            path = %path,
            "no calibration curves for target year, using closest prior year"
        );
        return Some(CurveSelection {
            year: *year,
            path: path.clone(),
            fallback: YearFallback::PriorYear,
        });
    }

    let (year, path) = candidates.iter().next_back()?;
    warn!(
        %plant,
        target_year,
        year = *year,
        path = %path,
        "no calibration curves at or before target year, using most recent available"
    );
    Some(CurveSelection {
        year: *year,
        path: path.clone(),
        fallback: YearFallback::MostRecent,
    })
}
