use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::types::{MatchedReading, Plant};
use crate::variables::{canonical_variable, ChannelAliases, ChannelClass};
use crate::wide::{WideKey, WideRow, WideTable, OUTPUT_COLUMNS};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PivotReport {
    pub input_rows: usize,
    /// Canonical names of unrecognized variables and how many rows each had.
    pub unknown_variables: BTreeMap<String, usize>,
    pub dropped_known_channels: usize,
    pub dropped_without_variety: usize,
    pub dropped_without_key: usize,
    /// Rows whose value lost to an earlier value for the same key and channel.
    pub collisions: usize,
    pub extra_column_collisions: usize,
    pub output_rows: usize,
}

impl PivotReport {
    pub fn dropped_unknown(&self) -> usize {
        self.unknown_variables.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct PivotOutcome {
    pub table: WideTable,
    pub report: PivotReport,
}

/// Reshapes matched long rows into one row per (plant, year, sensor, timestamp).
pub struct WidePivoter<'a> {
    aliases: &'a ChannelAliases,
    config: &'a EngineConfig,
}

impl<'a> WidePivoter<'a> {
    pub fn new(aliases: &'a ChannelAliases, config: &'a EngineConfig) -> Self {
        Self { aliases, config }
    }

    fn scale(&self, plant: Plant) -> f64 {
        self.config.plant(plant).volt_scale
    }

    pub fn pivot(&self, matched: &[MatchedReading]) -> PivotOutcome {
        let mut report = PivotReport {
            input_rows: matched.len(),
            ..PivotReport::default()
        };

        // Classify channels; unknown names are counted per canonical spelling.
        let mut kept: Vec<(ChannelClass, &MatchedReading)> = Vec::new();
        for item in matched {
            match self.aliases.classify(&item.reading.variable) {
                ChannelClass::Unknown => {
                    *report
                        .unknown_variables
                        .entry(canonical_variable(&item.reading.variable))
                        .or_insert(0) += 1;
                }
                ChannelClass::Drop => report.dropped_known_channels += 1,
                class => kept.push((class, item)),
            }
        }

        if !report.unknown_variables.is_empty() {
            warn!(
                dropped = report.dropped_unknown(),
                variables = ?report.unknown_variables.keys().collect::<Vec<_>>(),
                "unrecognized sensor variables dropped"
            );
        }
        if kept.is_empty() {
            warn!(
                input_rows = report.input_rows,
                "no voltage channels survived classification; returning empty wide table"
            );
            return PivotOutcome {
                table: WideTable::empty(),
                report,
            };
        }

        let mut index: HashMap<WideKey, usize> = HashMap::new();
        let mut rows: Vec<WideRow> = Vec::new();

        for (class, item) in kept {
            if item.variety().is_none() {
                report.dropped_without_variety += 1;
                continue;
            }
            let Some(key) = wide_key(item) else {
                report.dropped_without_key += 1;
                continue;
            };

            let idx = *index.entry(key).or_insert_with(|| {
                rows.push(WideRow::new(key));
                rows.len() - 1
            });
            let value = item
                .reading
                .value
                .map(|value| value * self.scale(item.reading.plant));
            let slot = match class {
                ChannelClass::VoltHum => &mut rows[idx].volt_hum,
                ChannelClass::VoltTem => &mut rows[idx].volt_tem,
                ChannelClass::Drop | ChannelClass::Unknown => continue,
            };
            match (slot.is_some(), value) {
                (false, value) => *slot = value,
                (true, Some(_)) => report.collisions += 1,
                (true, None) => {}
            }
        }

        if report.dropped_without_variety > 0 {
            info!(
                count = report.dropped_without_variety,
                "rows without a lab variety dropped before pivot"
            );
        }
        if report.collisions > 0 {
            debug!(count = report.collisions, "duplicate channel values ignored");
        }

        let extra_columns = self.attach_metadata(matched, &index, &mut rows, &mut report);

        rows.sort_by(|a, b| a.key.cmp(&b.key));
        report.output_rows = rows.len();
        info!(
            rows = report.output_rows,
            input_rows = report.input_rows,
            "pivoted sensor readings"
        );

        PivotOutcome {
            table: WideTable {
                rows,
                extra_columns,
                calibrated: false,
            },
            report,
        }
    }

    /// Spreads lab metadata and provenance over every pivoted row sharing a key, taking the
    /// first non-null value per column. Returns the extra column names in first-seen order.
    fn attach_metadata(
        &self,
        matched: &[MatchedReading],
        index: &HashMap<WideKey, usize>,
        rows: &mut [WideRow],
        report: &mut PivotReport,
    ) -> Vec<String> {
        let mut extra_columns: Vec<String> = Vec::new();
        let mut rejected: Vec<&str> = Vec::new();

        for item in matched {
            let Some(key) = wide_key(item) else { continue };
            let Some(&idx) = index.get(&key) else { continue };
            let Some(lab) = &item.lab else { continue };
            let row = &mut rows[idx];
            let source = &item.reading.source;

            fill(&mut row.variety, || lab.variety.clone());
            fill(&mut row.batch_id, || lab.batch_id.clone());
            fill(&mut row.discard, || lab.discard.clone());
            fill(&mut row.initial_humidity, || lab.initial_humidity);
            fill(&mut row.final_humidity, || lab.final_humidity);
            fill(&mut row.source_file, || source.source_file.clone());
            fill(&mut row.source_path, || source.source_path.clone());
            fill(&mut row.tirada_num, || source.tirada_num);
            fill(&mut row.tirada_fecha, || source.tirada_fecha);

            for (name, value) in &item.reading.extras {
                if OUTPUT_COLUMNS.contains(&name.as_str()) {
                    if !rejected.contains(&name.as_str()) {
                        rejected.push(name.as_str());
                        report.extra_column_collisions += 1;
                    }
                    continue;
                }
                let column = match extra_columns.iter().position(|existing| existing == name) {
                    Some(column) => column,
                    None => {
                        extra_columns.push(name.clone());
                        extra_columns.len() - 1
                    }
                };
                if row.extras.len() <= column {
                    row.extras.resize(column + 1, None);
                }
                if row.extras[column].is_none() && !value.is_empty() {
                    row.extras[column] = Some(value.clone());
                }
            }
        }

        for row in rows.iter_mut() {
            row.extras.resize(extra_columns.len(), None);
        }
        if !rejected.is_empty() {
            warn!(
                columns = ?rejected,
                "raw columns clash with output columns and were dropped"
            );
        }
        extra_columns
    }
}

fn wide_key(item: &MatchedReading) -> Option<WideKey> {
    let reading = &item.reading;
    Some(WideKey {
        plant: reading.plant,
        year: reading.year?,
        sensor_id: reading.sensor_id?,
        timestamp: reading.timestamp?,
    })
}

fn fill<T>(slot: &mut Option<T>, value: impl FnOnce() -> Option<T>) {
    if slot.is_none() {
        *slot = value();
    }
}
