use chrono::Utc;

use crate::telemetry::{FurnaceState, Telemetry};

use super::{DecodeError, LineDecoder};

const TAGS: [&str; 5] = ["TEMP:", "SP:", "M:", "V:", "A:"];

/// Console status line printed by the bench firmware:
///
/// `TEMP: 1510.0C | SP: 1500C | RESFRIANDO (-8C) | M:OFF V:ON A:OFF`
///
/// Only accepted when both the temperature and the setpoint are present.
pub struct StatusLineDecoder;

impl LineDecoder for StatusLineDecoder {
    fn name(&self) -> &'static str {
        "status-line"
    }

    fn decode(&self, line: &str, previous: Option<&Telemetry>) -> Result<Telemetry, DecodeError> {
        let temperature = tag_value(line, "TEMP:").and_then(leading_number);
        let setpoint = tag_value(line, "SP:").and_then(leading_number);

        let (Some(current_temperature), Some(setpoint)) = (temperature, setpoint) else {
            return Err(DecodeError::Unrecognised);
        };

        let phrase = line
            .split('|')
            .map(str::trim)
            .find(|segment| !segment.is_empty() && !TAGS.iter().any(|tag| has_tag(segment, tag)))
            .and_then(FurnaceState::from_phrase);

        let mut telemetry = Telemetry {
            current_temperature,
            setpoint,
            heater_active: switch(line, "M:"),
            fan_active: switch(line, "V:"),
            alarm_active: switch(line, "A:"),
            critical_interlock_active: phrase == Some(FurnaceState::CriticalInterlock),
            system_active: phrase != Some(FurnaceState::Inactive),
            captured_at: Utc::now(),
            ..Default::default()
        };

        if let Some(previous) = previous {
            telemetry.alarm_threshold = previous.alarm_threshold;
            telemetry.critical_threshold = previous.critical_threshold;
        }

        telemetry.enforce_invariants();
        telemetry.relabel();

        Ok(telemetry)
    }
}

/// Text following the first occurrence of `tag` that starts a word.
fn tag_value<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.match_indices(tag)
        .find(|(index, _)| at_boundary(line, *index))
        .map(|(index, _)| line[index + tag.len()..].trim_start())
}

fn has_tag(segment: &str, tag: &str) -> bool {
    tag_value(segment, tag).is_some()
}

fn at_boundary(line: &str, index: usize) -> bool {
    line[..index]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_')
}

fn leading_number(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
        .unwrap_or(text.len());

    text[..end].parse().ok().filter(|value: &f64| value.is_finite())
}

fn switch(line: &str, tag: &str) -> bool {
    tag_value(line, tag).is_some_and(|value| {
        value
            .get(..2)
            .is_some_and(|value| value.eq_ignore_ascii_case("ON"))
            && !value
                .get(2..3)
                .is_some_and(|next| next.chars().all(|c| c.is_ascii_alphabetic()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_lines() {
        let cases = [
            (
                "TEMP: 1450.0C | SP: 1500C | AQUECENDO (+5C) | M:ON V:OFF A:OFF",
                FurnaceState::Heating,
            ),
            (
                "TEMP: 1605.0C | SP: 1500C | AQUECENDO (+5C) | M:ON V:OFF A:ON *** ALARME ***",
                FurnaceState::HeatingWithAlarm,
            ),
            (
                "TEMP: 1750.0C | SP: 1500C | *** INTERRUPCAO CRITICA *** | M:OFF V:ON A:ON",
                FurnaceState::CriticalInterlock,
            ),
            (
                "TEMP: 1500.0C | SP: 1500C | MANTENDO (-1C) | M:OFF V:OFF A:OFF",
                FurnaceState::Maintaining,
            ),
            // The thermal step is printed on the same line, ahead of the status
            (
                ">>> AQUECENDO +5C TEMP: 1455.0C | SP: 1500C | AQUECENDO (+5C) | M:ON V:OFF A:OFF",
                FurnaceState::Heating,
            ),
            (
                ">>> RESFRIANDO -8C TEMP: 1742.0C | SP: 1500C | *** INTERRUPCAO CRITICA *** | M:OFF V:ON A:ON",
                FurnaceState::CriticalInterlock,
            ),
        ];

        for (line, expected) in cases {
            let telemetry = StatusLineDecoder.decode(line, None).unwrap();
            assert_eq!(telemetry.state_label, expected, "{line}");
            assert_eq!(telemetry.setpoint, 1500.);
        }

        let line = ">>> AQUECENDO +5C TEMP: 1455.0C | SP: 1500C | AQUECENDO (+5C) | M:ON V:OFF A:OFF";
        let telemetry = StatusLineDecoder.decode(line, None).unwrap();
        assert_eq!(telemetry.current_temperature, 1455.);
        assert!(telemetry.heater_active);
    }

    #[test]
    fn test_interlock_phrase() {
        let line = "TEMP: 1752.0°C | SP: 1500°C | *** INTERRUPCAO CRITICA *** | M:OFF V:ON A:OFF";
        let telemetry = StatusLineDecoder.decode(line, None).unwrap();

        assert_eq!(telemetry.current_temperature, 1752.);
        assert!(telemetry.critical_interlock_active);
        assert!(telemetry.alarm_active);
        assert!(!telemetry.system_active);
        assert!(telemetry.fan_active);
        assert!(!telemetry.heater_active);
    }

    #[test]
    fn test_thresholds_from_previous() {
        let previous = Telemetry {
            alarm_threshold: 1200.,
            critical_threshold: 1300.,
            ..Default::default()
        };

        let telemetry = StatusLineDecoder
            .decode("TEMP: 1100.0C | SP: 1000C", Some(&previous))
            .unwrap();

        assert_eq!(telemetry.alarm_threshold, 1200.);
        assert_eq!(telemetry.critical_threshold, 1300.);
        assert!(!telemetry.heater_active);
        assert_eq!(telemetry.controller, None);
    }

    #[test]
    fn test_requires_temperature_and_setpoint() {
        for line in [
            "TEMP: 1450.0C | AQUECENDO (+5C) | M:ON V:OFF A:OFF",
            "SP: 1500C | M:ON",
            "TEMP: abc | SP: 1500C",
            ">>> PERDA NATURAL -1C",
        ] {
            assert!(StatusLineDecoder.decode(line, None).is_err(), "{line}");
        }
    }
}
