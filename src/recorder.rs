// src/recorder.rs
use crate::error::RecorderError;
use crate::types::{SweepPoint, SweepResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const CSV_HEADER: [&str; 5] = ["voltage_set", "voltage_get", "current_get", "power", "time"];

/// One CSV row; field order is the column order.
#[derive(Debug, Serialize, Deserialize)]
struct SweepRow {
    voltage_set: f64,
    voltage_get: f64,
    current_get: f64,
    power: f64,
    time: f64,
}

impl From<SweepPoint> for SweepRow {
    fn from(p: SweepPoint) -> Self {
        Self {
            voltage_set: p.voltage_set,
            voltage_get: p.voltage_get,
            current_get: p.current_get,
            power: p.power,
            time: p.elapsed_s,
        }
    }
}

impl From<SweepRow> for SweepPoint {
    fn from(r: SweepRow) -> Self {
        Self {
            voltage_set: r.voltage_set,
            voltage_get: r.voltage_get,
            current_get: r.current_get,
            power: r.power,
            elapsed_s: r.time,
        }
    }
}

pub fn write_sweep_csv<W: Write>(out: W, result: &SweepResult) -> Result<(), RecorderError> {
    let mut writer = csv::Writer::from_writer(out);
    if result.is_empty() {
        // serde only emits the header alongside the first record.
        writer.write_record(CSV_HEADER)?;
    }
    for point in result.points() {
        writer.serialize(SweepRow::from(point))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_sweep_csv<R: Read>(input: R) -> Result<SweepResult, RecorderError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
    if header != CSV_HEADER {
        return Err(RecorderError::Header { found: header });
    }
    reader
        .deserialize::<SweepRow>()
        .map(|row| -> Result<SweepPoint, RecorderError> { Ok(SweepPoint::from(row?)) })
        .collect()
}

pub fn save_sweep_csv(path: &Path, result: &SweepResult) -> Result<(), RecorderError> {
    write_sweep_csv(File::create(path)?, result)?;
    info!("Saved {} sweep points to {}", result.len(), path.display());
    Ok(())
}

pub fn load_sweep_csv(path: &Path) -> Result<SweepResult, RecorderError> {
    read_sweep_csv(File::open(path)?)
}
