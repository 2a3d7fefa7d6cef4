use chrono::Utc;
use serde::Deserialize;

use crate::telemetry::{FurnaceState, Telemetry};

/// Fields of a controller status record. Every field is optional: whatever the
/// record leaves out is carried over from the previous telemetry.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareReport {
    #[serde(rename = "t")]
    pub temperature: Option<f64>,
    #[serde(rename = "sp")]
    pub setpoint: Option<f64>,
    pub lim_min: Option<f64>,
    pub lim_max: Option<f64>,
    pub lim_crit: Option<f64>,
    pub mode: Option<String>,
    pub state: Option<String>,
    pub heater: Option<f64>,
    pub fan: Option<f64>,
    pub alarm: Option<String>,
    pub e_stop: Option<bool>,
    pub dt_estop_us: Option<u64>,
    pub loop_us: Option<u64>,
}

impl FirmwareReport {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.setpoint.is_none()
            && self.lim_min.is_none()
            && self.lim_max.is_none()
            && self.lim_crit.is_none()
            && self.mode.is_none()
            && self.state.is_none()
            && self.heater.is_none()
            && self.fan.is_none()
            && self.alarm.is_none()
            && self.e_stop.is_none()
            && self.dt_estop_us.is_none()
            && self.loop_us.is_none()
    }

    /// Merges the report over `base` and derives the boolean flags from the
    /// merged controller state.
    pub fn apply(self, base: Option<&Telemetry>) -> Telemetry {
        let mut telemetry = base.cloned().unwrap_or_default();
        let mut info = telemetry.controller.take().unwrap_or_default();

        if let Some(value) = self.temperature {
            telemetry.current_temperature = value;
        }

        if let Some(value) = self.setpoint {
            telemetry.setpoint = value;
        }

        if let Some(value) = self.lim_max {
            telemetry.alarm_threshold = value;
        }

        if let Some(value) = self.lim_crit {
            telemetry.critical_threshold = value;
        }

        if let Some(value) = self.lim_min {
            info.low_limit = value;
        }

        if let Some(value) = self.mode {
            info.mode = value;
        }

        if let Some(value) = self.state {
            info.state = value;
        }

        if let Some(value) = self.heater {
            info.heater_power = duty(value);
        }

        if let Some(value) = self.fan {
            info.fan_power = duty(value);
        }

        if let Some(value) = self.alarm {
            info.alarm = value;
        }

        if let Some(value) = self.e_stop {
            info.emergency_stop = value;
        }

        if let Some(value) = self.dt_estop_us {
            info.estop_latency_us = value;
        }

        if let Some(value) = self.loop_us {
            info.loop_us = value;
        }

        let reported = FurnaceState::from_phrase(&info.state);

        telemetry.heater_active = info.heater_power > 0;
        telemetry.fan_active = info.fan_power > 0;
        telemetry.alarm_active = info.alarm_raised();
        telemetry.critical_interlock_active =
            info.critical() || reported == Some(FurnaceState::CriticalInterlock);
        telemetry.system_active = reported != Some(FurnaceState::Inactive);

        telemetry.controller = Some(info);
        telemetry.captured_at = Utc::now();
        telemetry.enforce_invariants();
        telemetry.relabel();

        telemetry
    }
}

/// PWM duty cycle as reported by the firmware, clamped to a byte. Fractions round
/// up so any positive duty still reads as active.
fn duty(value: f64) -> u8 {
    if value.is_finite() {
        value.ceil().clamp(0., 255.) as u8
    } else {
        0
    }
}
