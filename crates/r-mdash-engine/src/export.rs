//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::{fs, io::Write, path::Path};

use chrono::SecondsFormat;
use tracing::info;

use crate::{errors::Result, sample::Sample};

pub const CSV_COLUMNS: [&str; 17] = [
    "timestamp",
    "machine_id",
    "state",
    "mode",
    "status",
    "vr",
    "vy",
    "vb",
    "ir",
    "iy",
    "ib",
    "kw",
    "kwh_total",
    "pf",
    "count_total",
    "temp_c",
    "alarm_code",
];

/// Write `samples` as CSV with a header row. Returns the number of data rows.
pub fn export_csv<W: Write>(samples: &[Sample], writer: W, delimiter: u8) -> Result<usize> {
    let mut csv = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);
    csv.write_record(CSV_COLUMNS)?;
    for sample in samples {
        csv.write_record(row(sample))?;
    }
    csv.flush()?;
    Ok(samples.len())
}

/// Export to a file, creating parent directories as needed.
pub fn export_to_path(samples: &[Sample], path: impl AsRef<Path>, delimiter: u8) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let rows = export_csv(samples, std::io::BufWriter::new(file), delimiter)?;
    info!(path = %path.display(), rows, "telemetry window exported");
    Ok(rows)
}

fn row(sample: &Sample) -> [String; 17] {
    let timestamp = sample
        .timestamp()
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| sample.ts.to_string());
    [
        timestamp,
        sample.machine_id.clone(),
        sample.state.to_string(),
        sample.mode.clone(),
        sample.status.to_string(),
        sample.vr.to_string(),
        sample.vy.to_string(),
        sample.vb.to_string(),
        sample.ir.to_string(),
        sample.iy.to_string(),
        sample.ib.to_string(),
        sample.kw.to_string(),
        sample.kwh_total.to_string(),
        sample.pf.to_string(),
        sample.count_total.to_string(),
        sample.temp_c.to_string(),
        sample.alarm_code.clone().unwrap_or_default(),
    ]
}
