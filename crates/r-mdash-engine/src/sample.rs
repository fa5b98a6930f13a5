//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::errors::{EngineError, Result};

/// Discrete operating mode reported by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MachineState {
    Run,
    Idle,
    Stop,
    Off,
}

/// Health classification attached to every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HealthStatus {
    Ok,
    Warning,
    Fault,
}

/// One telemetry reading, nominally taken at 1 Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds. Accepts an integer or an RFC 3339 string on input.
    #[serde(deserialize_with = "epoch_millis::deserialize")]
    pub ts: i64,
    pub machine_id: String,
    pub state: MachineState,
    pub mode: String,
    pub status: HealthStatus,
    pub vr: f64,
    pub vy: f64,
    pub vb: f64,
    pub ir: f64,
    pub iy: f64,
    pub ib: f64,
    pub kw: f64,
    pub kwh_total: f64,
    pub pf: f64,
    pub count_total: u64,
    pub temp_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_code: Option<String>,
}

impl Sample {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts)
    }

    pub fn is_producing(&self) -> bool {
        matches!(self.state, MachineState::Run | MachineState::Idle)
    }

    pub fn temperature_band(&self) -> TemperatureBand {
        TemperatureBand::classify(self.temp_c)
    }

    /// Range and shape checks. Electrical plausibility is not judged here.
    pub fn validate(&self) -> Result<()> {
        if self.machine_id.trim().is_empty() {
            return Err(EngineError::InvalidSample {
                field: "machine_id",
                reason: "must not be empty".into(),
            });
        }
        let readings = [
            ("vr", self.vr),
            ("vy", self.vy),
            ("vb", self.vb),
            ("ir", self.ir),
            ("iy", self.iy),
            ("ib", self.ib),
            ("kw", self.kw),
            ("kwh_total", self.kwh_total),
            ("pf", self.pf),
            ("temp_c", self.temp_c),
        ];
        if let Some(&(field, value)) = readings.iter().find(|(_, value)| !value.is_finite()) {
            return Err(EngineError::InvalidSample {
                field,
                reason: format!("{value} is not a finite number"),
            });
        }
        if !(0.0..=1.0).contains(&self.pf) {
            return Err(EngineError::InvalidSample {
                field: "pf",
                reason: format!("{} is outside [0, 1]", self.pf),
            });
        }
        Ok(())
    }
}

/// Coarse thermal classification used by dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TemperatureBand {
    Low,
    Normal,
    High,
}

impl TemperatureBand {
    pub const HIGH_ABOVE_C: f64 = 60.0;
    pub const NORMAL_ABOVE_C: f64 = 45.0;

    pub fn classify(temp_c: f64) -> Self {
        if temp_c > Self::HIGH_ABOVE_C {
            TemperatureBand::High
        } else if temp_c > Self::NORMAL_ABOVE_C {
            TemperatureBand::Normal
        } else {
            TemperatureBand::Low
        }
    }
}

/// Numeric sample fields that can be charted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SampleField {
    Vr,
    Vy,
    Vb,
    Ir,
    Iy,
    Ib,
    Kw,
    KwhTotal,
    Pf,
    CountTotal,
    TempC,
}

impl SampleField {
    pub fn value(self, sample: &Sample) -> f64 {
        match self {
            SampleField::Vr => sample.vr,
            SampleField::Vy => sample.vy,
            SampleField::Vb => sample.vb,
            SampleField::Ir => sample.ir,
            SampleField::Iy => sample.iy,
            SampleField::Ib => sample.ib,
            SampleField::Kw => sample.kw,
            SampleField::KwhTotal => sample.kwh_total,
            SampleField::Pf => sample.pf,
            SampleField::CountTotal => sample.count_total as f64,
            SampleField::TempC => sample.temp_c,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SampleField::Vr | SampleField::Vy | SampleField::Vb => "V",
            SampleField::Ir | SampleField::Iy | SampleField::Ib => "A",
            SampleField::Kw => "kW",
            SampleField::KwhTotal => "kWh",
            SampleField::Pf => "",
            SampleField::CountTotal => "units",
            SampleField::TempC => "°C",
        }
    }
}

mod epoch_millis {
    use chrono::{DateTime, NaiveDateTime};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Fractional(f64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Millis(value) => Ok(value),
            RawTimestamp::Fractional(value) if value.is_finite() => Ok(value.round() as i64),
            RawTimestamp::Fractional(value) => {
                Err(D::Error::custom(format!("timestamp {value} is not finite")))
            }
            RawTimestamp::Text(text) => parse_text(&text).map_err(D::Error::custom),
        }
    }

    fn parse_text(text: &str) -> Result<i64, String> {
        let text = text.trim();
        if let Ok(millis) = text.parse::<i64>() {
            return Ok(millis);
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(parsed.timestamp_millis());
        }
        // Zone-less timestamps are taken as UTC.
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc().timestamp_millis())
            .map_err(|err| format!("unrecognised timestamp {text:?}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample;
    use std::str::FromStr;

    const LINE: &str = r#"{"ts":"2024-05-01T08:00:00Z","machine_id":"press-07","state":"RUN","mode":"AUTO","status":"OK","vr":231.2,"vy":229.8,"vb":230.4,"ir":10.1,"iy":10.4,"ib":9.9,"kw":6.9,"kwh_total":1520.25,"pf":0.94,"count_total":48210,"temp_c":41.5}"#;

    #[test]
    fn parses_rfc3339_line_without_alarm() {
        let parsed: Sample = serde_json::from_str(LINE).unwrap();
        assert_eq!(parsed.ts, 1_714_550_400_000);
        assert_eq!(parsed.state, MachineState::Run);
        assert_eq!(parsed.status, HealthStatus::Ok);
        assert_eq!(parsed.count_total, 48_210);
        assert!(parsed.alarm_code.is_none());
        parsed.validate().unwrap();
    }

    #[test]
    fn accepts_epoch_millis_and_field_order_independence() {
        let parsed: Sample = serde_json::from_str(
            r#"{"alarm_code":"E-104","temp_c":66.0,"count_total":5,"pf":0.9,"kwh_total":1.0,"kw":2.0,"ib":1.0,"iy":1.0,"ir":1.0,"vb":230.0,"vy":230.0,"vr":230.0,"status":"FAULT","mode":"MANUAL","state":"STOP","machine_id":"m1","ts":1714550400123}"#,
        )
        .unwrap();
        assert_eq!(parsed.ts, 1_714_550_400_123);
        assert_eq!(parsed.alarm_code.as_deref(), Some("E-104"));
        assert_eq!(parsed.temperature_band(), TemperatureBand::High);
        assert_eq!(
            parsed.timestamp().unwrap().to_rfc3339(),
            "2024-05-01T08:00:00.123+00:00"
        );
    }

    #[test]
    fn rejects_unknown_state_label() {
        let broken = LINE.replace("\"RUN\"", "\"SPINNING\"");
        assert!(serde_json::from_str::<Sample>(&broken).is_err());
    }

    #[test]
    fn validate_rejects_power_factor_out_of_range() {
        let mut reading = sample(0, MachineState::Run, 5.0);
        reading.pf = 1.2;
        match reading.validate() {
            Err(EngineError::InvalidSample { field, .. }) => assert_eq!(field, "pf"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_non_finite_reading() {
        let mut reading = sample(0, MachineState::Run, 5.0);
        reading.temp_c = f64::NAN;
        assert!(matches!(
            reading.validate(),
            Err(EngineError::InvalidSample { field: "temp_c", .. })
        ));
    }

    #[test]
    fn temperature_bands_follow_thresholds() {
        assert_eq!(TemperatureBand::classify(45.0), TemperatureBand::Low);
        assert_eq!(TemperatureBand::classify(45.1), TemperatureBand::Normal);
        assert_eq!(TemperatureBand::classify(60.0), TemperatureBand::Normal);
        assert_eq!(TemperatureBand::classify(60.5), TemperatureBand::High);
    }

    #[test]
    fn field_selector_parses_snake_case_names() {
        assert_eq!(SampleField::from_str("kwh_total").unwrap(), SampleField::KwhTotal);
        assert_eq!(SampleField::from_str("TEMP_C").unwrap(), SampleField::TempC);
        assert_eq!(SampleField::Pf.to_string(), "pf");
        let reading = sample(0, MachineState::Idle, 3.5);
        assert_eq!(SampleField::Kw.value(&reading), 3.5);
        assert_eq!(SampleField::KwhTotal.unit(), "kWh");
        assert_eq!(SampleField::Pf.unit(), "");
    }
}
