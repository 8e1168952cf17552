use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::Table;
use secado_core::curves::{find_calibration_files, select_calibration_file};
use secado_core::storage::LocalStore;
use secado_core::Plant;

use crate::store_path;

#[derive(Args, Debug)]
pub struct CurvesArgs {
    /// Plant code (JPV or RB)
    #[arg(long)]
    plant: Plant,
    /// Campaign year to select curves for
    #[arg(long)]
    year: i32,
    /// Folder searched recursively for curve workbooks
    #[arg(long)]
    root: PathBuf,
}

pub fn handle_curves(args: CurvesArgs) -> Result<()> {
    let store = LocalStore::new(".");
    let files = find_calibration_files(&store, &store_path(&args.root), args.plant);

    let mut table = Table::new();
    table.set_header(vec!["Year", "Workbook"]);
    for (year, path) in &files {
        table.add_row(vec![year.to_string(), path.clone()]);
    }
    println!("{table}");

    match select_calibration_file(&files, args.year, args.plant) {
        Some(selection) => println!(
            "{} {}: using {} curves from {} ({})",
            args.plant, args.year, selection.year, selection.path, selection.fallback
        ),
        None => println!(
            "{} {}: no calibration workbooks under {}",
            args.plant,
            args.year,
            args.root.display()
        ),
    }
    Ok(())
}
