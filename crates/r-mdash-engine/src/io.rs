//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::{fs, io::BufRead, path::Path};

use tracing::{debug, warn};

use crate::{errors::Result, sample::Sample};

/// Samples read from a JSONL source together with the number of lines dropped.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub samples: Vec<Sample>,
    pub skipped: usize,
}

/// Parse one JSONL line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Sample>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let sample: Sample = serde_json::from_str(line)?;
    sample.validate()?;
    Ok(Some(sample))
}

/// Read newline-delimited samples. A malformed line is logged and skipped;
/// only read failures abort.
pub fn read_jsonl<R: BufRead>(reader: R) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(sample)) => report.samples.push(sample),
            Ok(None) => {}
            Err(err) => {
                warn!(line = number + 1, error = %err, "skipping malformed sample");
                report.skipped += 1;
            }
        }
    }
    debug!(
        samples = report.samples.len(),
        skipped = report.skipped,
        "jsonl source read"
    );
    Ok(report)
}

pub fn load_jsonl(path: impl AsRef<Path>) -> Result<LoadReport> {
    let file = fs::File::open(path)?;
    read_jsonl(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MachineState;
    use std::io::Cursor;

    const GOOD: &str = r#"{"ts":1714550400000,"machine_id":"press-07","state":"RUN","mode":"AUTO","status":"OK","vr":230.0,"vy":230.0,"vb":230.0,"ir":10.0,"iy":10.0,"ib":10.0,"kw":6.9,"kwh_total":1520.0,"pf":0.94,"count_total":1,"temp_c":41.5}"#;

    #[test]
    fn skips_blank_and_malformed_lines() {
        let input = format!(
            "{GOOD}\n\n{{not json}}\n{}\n{}\n",
            GOOD.replace("1714550400000", "1714550401000"),
            GOOD.replace("\"pf\":0.94", "\"pf\":1.5"),
        );
        let report = read_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.samples[1].ts, 1_714_550_401_000);
        assert_eq!(report.samples[0].state, MachineState::Run);
    }

    #[test]
    fn blank_line_is_not_a_sample() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line(GOOD).unwrap().is_some());
        assert!(parse_line("{\"ts\":1}").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_jsonl("definitely/not/here.jsonl").is_err());
    }
}
