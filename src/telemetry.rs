use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One immutable snapshot of the furnace, produced once per control cycle by the
/// simulator or once per decoded record by the serial link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub current_temperature: f64,
    pub setpoint: f64,
    pub alarm_threshold: f64,
    pub critical_threshold: f64,

    pub heater_active: bool,
    pub fan_active: bool,

    pub alarm_active: bool,
    pub critical_interlock_active: bool,
    pub system_active: bool,

    pub state_label: FurnaceState,
    pub captured_at: DateTime<Utc>,

    /// Raw controller report, only present for firmware that sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerInfo>,
}

/// Descriptive state of the furnace, derived from the actuator and interlock flags.
#[derive(
    Copy, Clone, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum FurnaceState {
    #[default]
    #[strum(to_string = "MAINTAINING", serialize = "IDLE", serialize = "MANTENDO")]
    Maintaining,

    #[strum(to_string = "HEATING", serialize = "AQUECENDO", serialize = "HEAT")]
    Heating,

    #[strum(
        to_string = "HEATING_WITH_ALARM",
        serialize = "ALARME - AQUECENDO",
        serialize = "ALARM_HEATING"
    )]
    HeatingWithAlarm,

    #[strum(to_string = "COOLING", serialize = "RESFRIANDO", serialize = "COOL")]
    Cooling,

    #[strum(
        to_string = "CRITICAL_INTERLOCK",
        serialize = "INTERRUPCAO CRITICA",
        serialize = "E_STOP",
        serialize = "ESTOP",
        serialize = "CRITICAL"
    )]
    CriticalInterlock,

    #[strum(to_string = "INACTIVE", serialize = "INATIVO", serialize = "STOPPED")]
    Inactive,
}

/// Fields reported by controller firmware that have no equivalent in the simulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub mode: String,
    pub state: String,
    pub alarm: String,
    pub heater_power: u8,
    pub fan_power: u8,
    pub low_limit: f64,
    pub emergency_stop: bool,
    pub estop_latency_us: u64,
    pub loop_us: u64,
}

impl Telemetry {
    pub const DEFAULT_ALARM_THRESHOLD: f64 = 1600.;
    pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 1750.;

    /// Restores the flag invariants: an engaged interlock implies an active alarm
    /// and an inactive system.
    pub fn enforce_invariants(&mut self) {
        if self.critical_interlock_active {
            self.alarm_active = true;
            self.system_active = false;
        }
    }

    /// Recomputes `state_label` from the flags.
    pub fn relabel(&mut self) {
        self.state_label = FurnaceState::derive(
            self.system_active,
            self.alarm_active,
            self.critical_interlock_active,
            self.heater_active,
            self.fan_active,
        );
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            current_temperature: 0.,
            setpoint: 0.,
            alarm_threshold: Self::DEFAULT_ALARM_THRESHOLD,
            critical_threshold: Self::DEFAULT_CRITICAL_THRESHOLD,
            heater_active: false,
            fan_active: false,
            alarm_active: false,
            critical_interlock_active: false,
            system_active: true,
            state_label: FurnaceState::Maintaining,
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
            controller: None,
        }
    }
}

impl FurnaceState {
    /// Priority order: interlock, heating with alarm, heating, cooling, inactive,
    /// maintaining.
    pub fn derive(active: bool, alarm: bool, interlock: bool, heater: bool, fan: bool) -> Self {
        if interlock {
            Self::CriticalInterlock
        } else if heater && alarm {
            Self::HeatingWithAlarm
        } else if heater {
            Self::Heating
        } else if fan {
            Self::Cooling
        } else if !active {
            Self::Inactive
        } else {
            Self::Maintaining
        }
    }

    /// Parses a free-text state phrase such as `*** INTERRUPCAO CRITICA ***` or
    /// `AQUECENDO (+5C)`.
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        let phrase = phrase.split('(').next().unwrap_or_default();
        let phrase = phrase.trim_matches(|c: char| c == '*' || c.is_whitespace());

        phrase.parse().ok()
    }
}

impl Default for ControllerInfo {
    fn default() -> Self {
        Self {
            mode: String::new(),
            state: String::new(),
            alarm: ControllerInfo::ALARM_NONE.to_owned(),
            heater_power: 0,
            fan_power: 0,
            low_limit: 0.,
            emergency_stop: false,
            estop_latency_us: 0,
            loop_us: 0,
        }
    }
}

impl ControllerInfo {
    pub const ALARM_NONE: &str = "NONE";
    pub const ALARM_CRITICAL: &str = "CRIT";

    pub fn alarm_raised(&self) -> bool {
        !self.alarm.is_empty() && !self.alarm.eq_ignore_ascii_case(Self::ALARM_NONE)
    }

    pub fn critical(&self) -> bool {
        self.emergency_stop || self.alarm.eq_ignore_ascii_case(Self::ALARM_CRITICAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_priority() {
        use FurnaceState::*;

        let sequence = [
            ((true, true, true, false, true), CriticalInterlock),
            ((true, true, false, true, false), HeatingWithAlarm),
            ((true, false, false, true, false), Heating),
            ((true, false, false, false, true), Cooling),
            ((false, false, false, false, false), Inactive),
            ((true, false, false, false, false), Maintaining),
        ];

        for ((active, alarm, interlock, heater, fan), expected) in sequence {
            assert_eq!(
                FurnaceState::derive(active, alarm, interlock, heater, fan),
                expected
            );
        }
    }

    #[test]
    fn test_state_phrases() {
        let phrases = [
            ("*** INTERRUPCAO CRITICA ***", FurnaceState::CriticalInterlock),
            ("AQUECENDO (+5C)", FurnaceState::Heating),
            ("RESFRIANDO (-8C)", FurnaceState::Cooling),
            ("MANTENDO (-1C)", FurnaceState::Maintaining),
            ("heating", FurnaceState::Heating),
            ("E_STOP", FurnaceState::CriticalInterlock),
            ("IDLE", FurnaceState::Maintaining),
        ];

        for (phrase, expected) in phrases {
            assert_eq!(FurnaceState::from_phrase(phrase), Some(expected), "{phrase}");
        }

        assert_eq!(FurnaceState::from_phrase("WARMING UP"), None);
    }

    #[test]
    fn test_invariants() {
        let mut telemetry = Telemetry {
            critical_interlock_active: true,
            ..Default::default()
        };

        telemetry.enforce_invariants();

        assert!(telemetry.alarm_active);
        assert!(!telemetry.system_active);
    }

    #[test]
    fn test_serialized_label() {
        let telemetry = Telemetry {
            state_label: FurnaceState::HeatingWithAlarm,
            ..Default::default()
        };

        let json = serde_json::to_value(&telemetry).unwrap();

        assert_eq!(json["state_label"], "HEATING_WITH_ALARM");
        assert!(json.get("controller").is_none());
    }
}
