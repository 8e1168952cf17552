use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::curves::{CurveStore, HumidityCurve, DRYER_COUNT};
use crate::wide::WideRow;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalibrationReport {
    pub rows: usize,
    pub temperatura_rows: usize,
    pub humedad_rows: usize,
    /// Rows whose dryer number has no calibration slot.
    pub unknown_dryer_rows: usize,
    /// Varieties with neither a sheet of their own nor a default sheet.
    pub unresolved_varieties: BTreeSet<String>,
    pub temperature_curve: bool,
    /// No row carried a non-zero voltage, so nothing could be calibrated.
    pub no_usable_voltage: bool,
}

/// Converts wide-table voltages into `TEMPERATURA` and `HUMEDAD`.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoltageCalibrator;

impl VoltageCalibrator {
    pub fn new() -> Self {
        Self
    }

    /// Calibrates rows in place. Every row gets both outputs written, `None` wherever the
    /// voltage is missing or zero, the variety has no curve, or the curve sheet failed.
    /// Without a curve store both outputs are cleared.
    pub fn calibrate(
        &self,
        rows: &mut [WideRow],
        curves: Option<&mut CurveStore>,
    ) -> CalibrationReport {
        let mut report = CalibrationReport {
            rows: rows.len(),
            ..CalibrationReport::default()
        };

        for row in rows.iter_mut() {
            row.temperatura = None;
            row.humedad = None;
        }

        let usable = |value: Option<f64>| value.filter(|value| *value != 0.0);
        if rows
            .iter()
            .all(|row| usable(row.volt_hum).is_none() && usable(row.volt_tem).is_none())
        {
            if !rows.is_empty() {
                warn!(
                    rows = rows.len(),
                    "every VOLT_HUM and VOLT_TEM value is null or zero; nothing to calibrate"
                );
            }
            report.no_usable_voltage = true;
            return report;
        }

        let Some(curves) = curves else {
            warn!(rows = rows.len(), "no calibration curves available; outputs left null");
            return report;
        };

        let temperature = curves.temperature();
        report.temperature_curve = temperature.is_some();
        let mut by_variety: HashMap<String, Option<Arc<HumidityCurve>>> = HashMap::new();

        for row in rows.iter_mut() {
            let dryer = row.key.sensor_id;
            let at = row.key.timestamp;
            if !(1..=DRYER_COUNT as u32).contains(&dryer) {
                report.unknown_dryer_rows += 1;
                continue;
            }

            if let (Some(curve), Some(volt)) = (&temperature, usable(row.volt_tem)) {
                row.temperatura = curve.apply(volt, dryer, at);
            }

            let (Some(volt), Some(variety)) = (usable(row.volt_hum), row.variety.as_deref()) else {
                continue;
            };
            let curve = by_variety
                .entry(variety.to_string())
                .or_insert_with(|| curves.humidity_for_variety(variety))
                .clone();
            match curve {
                Some(curve) => row.humedad = curve.apply(volt, dryer, at),
                None => {
                    report.unresolved_varieties.insert(variety.to_string());
                }
            }
        }

        report.temperatura_rows = rows.iter().filter(|row| row.temperatura.is_some()).count();
        report.humedad_rows = rows.iter().filter(|row| row.humedad.is_some()).count();

        if !report.unresolved_varieties.is_empty() {
            warn!(
                varieties = ?report.unresolved_varieties,
                "varieties without humidity curves; HUMEDAD left null"
            );
        }
        if report.unknown_dryer_rows > 0 {
            warn!(
                count = report.unknown_dryer_rows,
                "rows with a sensor outside the calibrated dryers"
            );
        }
        info!(
            rows = report.rows,
            temperatura = report.temperatura_rows,
            humedad = report.humedad_rows,
            "applied calibration curves"
        );

        report
    }
}
