use crate::telemetry::Telemetry;

use super::{DecodeError, LineDecoder, report::FirmwareReport};

/// Single-object JSON records, as sent by the PID firmware:
///
/// `{"t":1490.5,"sp":1500,"limMax":1600,"heater":180,"fan":0,"alarm":"NONE","eStop":false}`
pub struct JsonDecoder;

impl LineDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, line: &str, previous: Option<&Telemetry>) -> Result<Telemetry, DecodeError> {
        if !line.starts_with('{') {
            return Err(DecodeError::Unrecognised);
        }

        let report: FirmwareReport =
            serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if report.temperature.is_none() {
            return Err(DecodeError::Malformed("missing \"t\"".to_owned()));
        }

        Ok(report.apply(previous))
    }
}
