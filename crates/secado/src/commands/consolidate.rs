use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use comfy_table::Table;
use secado_core::engine::{ConsolidationOutput, CurveRoot, LabSource};
use secado_core::ingest::{raw_readings_from_file, RawReading};
use secado_core::inventory::SensorInventory;
use secado_core::storage::LocalStore;
use secado_core::{run_consolidation, ConsolidationRequest, EngineConfig, Plant};
use secado_parser::parse_sensor_file;
use tracing::{info, warn};

use crate::store_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

#[derive(Args, Debug)]
pub struct ConsolidateArgs {
    /// Plant code (JPV or RB)
    #[arg(long)]
    plant: Plant,
    /// Campaign year
    #[arg(long)]
    year: i32,
    /// Folder holding the raw sensor exports (searched recursively; `.txt` is JPV, `.csv` is RB)
    #[arg(long)]
    sensors: PathBuf,
    /// Lab control workbook, or a folder with one workbook per year
    #[arg(long)]
    lab: Option<PathBuf>,
    /// Folder searched for `<year> ... Curvas ... <PLANT>.xlsx` workbooks
    #[arg(long)]
    curves_root: Option<PathBuf>,
    #[arg(short, long)]
    output: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    /// Also write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

pub fn handle_consolidate(config: &EngineConfig, args: ConsolidateArgs) -> Result<()> {
    let readings = read_sensor_dir(args.plant, args.year, &args.sensors)?;
    info!(
        plant = %args.plant,
        year = args.year,
        readings = readings.len(),
        "collected sensor readings"
    );

    let request = ConsolidationRequest {
        readings,
        year: Some(args.year),
        lab_sources: args
            .lab
            .iter()
            .map(|path| LabSource {
                plant: args.plant,
                year: args.year,
                path: store_path(path),
            })
            .collect(),
        curve_roots: args
            .curves_root
            .iter()
            .map(|root| CurveRoot {
                plant: args.plant,
                root: store_path(root),
            })
            .collect(),
    };

    let store = LocalStore::new(".");
    let output = run_consolidation(&store, config, request).context("consolidation failed")?;

    match args.format {
        OutputFormat::Csv => {
            let file = File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?;
            output
                .table
                .write_csv(BufWriter::new(file))
                .context("failed to write CSV output")?;
        }
        OutputFormat::Parquet => output
            .table
            .write_parquet(&args.output)
            .context("failed to write Parquet output")?,
    }

    if let Some(path) = &args.summary_json {
        fs::write(path, output.summary.to_json()?)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    print_summary(&output);
    println!("Wrote {} rows to {}", output.table.len(), args.output.display());
    Ok(())
}

fn read_sensor_dir(plant: Plant, year: i32, dir: &Path) -> Result<Vec<RawReading>> {
    let pattern = dir.join("**/*");
    let pattern_str = pattern
        .to_str()
        .context("sensor folder path is not valid UTF-8")?;
    let root = store_path(dir);

    let mut inventory = SensorInventory::new(plant, Some(year));
    let mut failures = 0;
    for entry in glob::glob(pattern_str)? {
        match entry {
            Ok(path) if path.is_file() => {
                inventory.consider(&root, &store_path(&path));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "could not read path from glob pattern");
                failures += 1;
            }
        }
    }
    let (entries, report) = inventory.into_parts();
    info!(
        accepted = report.accepted,
        not_sensor_exports = report.not_sensor_exports,
        outside_sensor_folder = report.outside_sensor_folder,
        other_plant = report.other_plant,
        other_year = report.other_year,
        "sensor inventory"
    );

    let mut readings = Vec::new();
    for entry in entries {
        let content =
            fs::read(&entry.path).with_context(|| format!("failed to read {}", entry.path))?;
        let parsed = match parse_sensor_file(&content) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %entry.path, error = %err, "skipping unrecognized sensor file");
                failures += 1;
                continue;
            }
        };

        if entry.sensor_label.is_none() {
            warn!(path = %entry.path, "no SENSOR number in file or folder name");
        }
        info!(
            path = %entry.path,
            format = %parsed.format,
            rows = parsed.rows.len(),
            sensor = ?entry.sensor_label,
            year = ?entry.year,
            "parsed sensor file"
        );
        readings.extend(raw_readings_from_file(
            plant,
            entry.sensor_label.map(|label| label.to_string()),
            &parsed,
            Arc::new(entry.source_info()),
        ));
    }

    if failures > 0 {
        warn!(failures, "some sensor files were skipped");
    }
    Ok(readings)
}

fn print_summary(output: &ConsolidationOutput) {
    let mut table = Table::new();
    table.set_header(vec![
        "Plant",
        "Year",
        "Readings",
        "Matched",
        "Unmatched",
        "Rows",
        "Curves",
        "TEMPERATURA",
        "HUMEDAD",
    ]);
    for group in &output.summary.groups {
        let curves = group
            .curves
            .as_ref()
            .map(|selection| format!("{} ({})", selection.year, selection.fallback))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            group.plant.to_string(),
            group.year.to_string(),
            group.readings.to_string(),
            group.matching.matched.to_string(),
            group.matching.unmatched.to_string(),
            group.pivot.output_rows.to_string(),
            curves,
            group.calibration.temperatura_rows.to_string(),
            group.calibration.humedad_rows.to_string(),
        ]);
    }
    println!("{table}");

    if !output.qa.is_empty() {
        let mut qa = Table::new();
        qa.set_header(vec!["Plant", "Year", "Sensor", "Rows", "First", "Last"]);
        for row in &output.qa {
            qa.add_row(vec![
                row.plant.to_string(),
                row.year.to_string(),
                row.sensor_id.to_string(),
                row.rows.to_string(),
                row.first_timestamp.to_string(),
                row.last_timestamp.to_string(),
            ]);
        }
        println!("{qa}");
    }
}
