use crate::{misc::parse_or_zero, telemetry::Telemetry};

use super::{DecodeError, LineDecoder, report::FirmwareReport};

/// `T=900;SP=1000;MODE=AUTO;STATE=HEATING;HEATER=200;FAN=0;ALARM=NONE;ESTOP=0`
///
/// Unknown keys are ignored and malformed numbers read as zero, so one bad token
/// never costs the rest of the record. A line needs at least one known key.
pub struct KeyValueDecoder;

impl LineDecoder for KeyValueDecoder {
    fn name(&self) -> &'static str {
        "key-value"
    }

    fn decode(&self, line: &str, previous: Option<&Telemetry>) -> Result<Telemetry, DecodeError> {
        let mut report = FirmwareReport::default();

        for token in line.split(';') {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };

            let value = value.trim();

            match key.trim() {
                "T" => report.temperature = Some(parse_or_zero(value)),
                "SP" => report.setpoint = Some(parse_or_zero(value)),
                "LIM_MIN" => report.lim_min = Some(parse_or_zero(value)),
                "LIM_MAX" => report.lim_max = Some(parse_or_zero(value)),
                "LIM_CRIT" => report.lim_crit = Some(parse_or_zero(value)),
                "MODE" => report.mode = Some(value.to_owned()),
                "STATE" => report.state = Some(value.to_owned()),
                "HEATER" => report.heater = Some(parse_or_zero(value)),
                "FAN" => report.fan = Some(parse_or_zero(value)),
                "ALARM" => report.alarm = Some(value.to_owned()),
                "ESTOP" => report.e_stop = Some(value == "1"),
                "DT_ESTOP_US" => report.dt_estop_us = Some(value.parse().unwrap_or(0)),
                "LOOP_US" => report.loop_us = Some(value.parse().unwrap_or(0)),
                _ => {}
            }
        }

        if report.is_empty() {
            return Err(DecodeError::Unrecognised);
        }

        Ok(report.apply(previous))
    }
}
