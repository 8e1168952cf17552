use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;

use crate::types::Plant;

/// Composite key of the wide table; unique across rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WideKey {
    pub plant: Plant,
    pub year: i32,
    pub sensor_id: u32,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub key: WideKey,
    pub tirada_fecha: Option<NaiveDate>,
    pub tirada_num: Option<i64>,
    pub volt_hum: Option<f64>,
    pub volt_tem: Option<f64>,
    pub temperatura: Option<f64>,
    pub humedad: Option<f64>,
    pub variety: Option<String>,
    pub batch_id: Option<String>,
    pub discard: Option<String>,
    pub initial_humidity: Option<f64>,
    pub final_humidity: Option<f64>,
    pub source_file: Option<String>,
    pub source_path: Option<String>,
    /// Values for [`WideTable::extra_columns`], same order, `None` where absent.
    pub extras: Vec<Option<String>>,
}

impl WideRow {
    pub fn new(key: WideKey) -> Self {
        Self {
            key,
            tirada_fecha: None,
            tirada_num: None,
            volt_hum: None,
            volt_tem: None,
            temperatura: None,
            humedad: None,
            variety: None,
            batch_id: None,
            discard: None,
            initial_humidity: None,
            final_humidity: None,
            source_file: None,
            source_path: None,
            extras: Vec::new(),
        }
    }

    pub fn extra(&self, idx: usize) -> Option<&str> {
        self.extras.get(idx).and_then(|value| value.as_deref())
    }
}

/// Fixed output columns in emission order. Columns after `DESCARTAR` are provenance and are
/// followed by any raw extra columns.
pub const OUTPUT_COLUMNS: &[&str] = &[
    "plant",
    "year",
    "tirada_fecha",
    "sensor_id",
    "timestamp",
    "tirada_num",
    "VOLT_HUM",
    "VOLT_TEM",
    "TEMPERATURA",
    "HUMEDAD",
    "Variedad",
    "ID_tachada",
    "DESCARTAR",
    "HumedadInicial",
    "HumedadFinal",
    "source_file",
    "source_path",
];

// Emitted even when every value is null so an empty table still has the expected schema.
const ALWAYS_EMITTED: &[&str] = &[
    "plant",
    "year",
    "sensor_id",
    "timestamp",
    "VOLT_HUM",
    "VOLT_TEM",
    "Variedad",
    "ID_tachada",
];

/// One row per (plant, year, sensor, timestamp), sorted by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    pub rows: Vec<WideRow>,
    pub extra_columns: Vec<String>,
    /// Set once calibration has run; adds the `TEMPERATURA`/`HUMEDAD` columns.
    pub calibrated: bool,
}

impl WideTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &WideKey) -> Option<&WideRow> {
        self.rows
            .binary_search_by(|row| row.key.cmp(key))
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Appends another table, merging extra columns by name, and restores key order.
    pub fn append(&mut self, other: WideTable) {
        let mapping: Vec<usize> = other
            .extra_columns
            .iter()
            .map(|name| match self.extra_columns.iter().position(|existing| existing == name) {
                Some(idx) => idx,
                None => {
                    self.extra_columns.push(name.clone());
                    self.extra_columns.len() - 1
                }
            })
            .collect();

        for mut row in other.rows {
            let mut extras = vec![None; self.extra_columns.len()];
            for (from, value) in row.extras.drain(..).enumerate() {
                if let Some(to) = mapping.get(from) {
                    extras[*to] = value;
                }
            }
            row.extras = extras;
            self.rows.push(row);
        }
        for row in &mut self.rows {
            row.extras.resize(self.extra_columns.len(), None);
        }
        self.rows.sort_by(|a, b| a.key.cmp(&b.key));
        self.calibrated |= other.calibrated;
    }

    /// Names of the columns [`to_dataframe`](Self::to_dataframe) emits, in order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = OUTPUT_COLUMNS
            .iter()
            .filter(|name| self.has_column(name))
            .map(|name| name.to_string())
            .collect();
        for (idx, name) in self.extra_columns.iter().enumerate() {
            if self.rows.iter().any(|row| row.extra(idx).is_some()) {
                names.push(name.clone());
            }
        }
        names
    }

    fn has_column(&self, name: &str) -> bool {
        if ALWAYS_EMITTED.contains(&name) {
            return true;
        }
        let any = |present: fn(&WideRow) -> bool| self.rows.iter().any(present);
        match name {
            "TEMPERATURA" | "HUMEDAD" => self.calibrated,
            "tirada_fecha" => any(|row| row.tirada_fecha.is_some()),
            "tirada_num" => any(|row| row.tirada_num.is_some()),
            "DESCARTAR" => any(|row| row.discard.is_some()),
            "HumedadInicial" => any(|row| row.initial_humidity.is_some()),
            "HumedadFinal" => any(|row| row.final_humidity.is_some()),
            "source_file" => any(|row| row.source_file.is_some()),
            "source_path" => any(|row| row.source_path.is_some()),
            _ => false,
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let rows = &self.rows;
        let text = |name: &str, get: fn(&WideRow) -> Option<&str>| {
            Series::new(name.into(), rows.iter().map(get).collect::<Vec<_>>())
        };
        let float = |name: &str, get: fn(&WideRow) -> Option<f64>| {
            Series::new(name.into(), rows.iter().map(get).collect::<Vec<_>>())
        };

        let mut columns: Vec<Column> = Vec::new();
        for name in OUTPUT_COLUMNS.iter().filter(|name| self.has_column(name)) {
            let series = match *name {
                "plant" => text(name, |row| Some(row.key.plant.code())),
                "year" => Series::new(
                    (*name).into(),
                    rows.iter().map(|row| row.key.year).collect::<Vec<i32>>(),
                ),
                "sensor_id" => Series::new(
                    (*name).into(),
                    rows.iter().map(|row| row.key.sensor_id).collect::<Vec<u32>>(),
                ),
                "timestamp" => Series::new(
                    (*name).into(),
                    rows.iter()
                        .map(|row| row.key.timestamp.and_utc().timestamp_micros())
                        .collect::<Vec<i64>>(),
                )
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
                "tirada_fecha" => Series::new(
                    (*name).into(),
                    rows.iter()
                        .map(|row| row.tirada_fecha.map(days_since_epoch))
                        .collect::<Vec<Option<i32>>>(),
                )
                .cast(&DataType::Date)?,
                "tirada_num" => Series::new(
                    (*name).into(),
                    rows.iter().map(|row| row.tirada_num).collect::<Vec<_>>(),
                ),
                "VOLT_HUM" => float(name, |row| row.volt_hum),
                "VOLT_TEM" => float(name, |row| row.volt_tem),
                "TEMPERATURA" => float(name, |row| row.temperatura),
                "HUMEDAD" => float(name, |row| row.humedad),
                "Variedad" => text(name, |row| row.variety.as_deref()),
                "ID_tachada" => text(name, |row| row.batch_id.as_deref()),
                "DESCARTAR" => text(name, |row| row.discard.as_deref()),
                "HumedadInicial" => float(name, |row| row.initial_humidity),
                "HumedadFinal" => float(name, |row| row.final_humidity),
                "source_file" => text(name, |row| row.source_file.as_deref()),
                "source_path" => text(name, |row| row.source_path.as_deref()),
                _ => continue,
            };
            columns.push(series.into());
        }

        for (idx, name) in self.extra_columns.iter().enumerate() {
            let values: Vec<Option<&str>> = rows.iter().map(|row| row.extra(idx)).collect();
            if values.iter().any(Option::is_some) {
                columns.push(Series::new(name.as_str().into(), values).into());
            }
        }

        DataFrame::new(columns)
    }

    /// UTF-8 CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> PolarsResult<()> {
        let mut df = self.to_dataframe()?;
        CsvWriter::new(writer)
            .include_header(true)
            .with_datetime_format(Some("%Y-%m-%d %H:%M:%S".to_string()))
            .finish(&mut df)
    }

    pub fn to_parquet_bytes(&self) -> PolarsResult<Vec<u8>> {
        let mut df = self.to_dataframe()?;
        let mut buffer = Vec::new();
        {
            let mut cursor = Cursor::new(&mut buffer);
            ParquetWriter::new(&mut cursor)
                .with_compression(ParquetCompression::Zstd(None))
                .with_statistics(StatisticsOptions::default())
                .finish(&mut df)?;
        }
        Ok(buffer)
    }

    pub fn write_parquet(&self, path: &Path) -> PolarsResult<()> {
        let bytes = self.to_parquet_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days() as i32
}
