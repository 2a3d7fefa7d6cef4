use chrono::Utc;

use crate::{
    config::SimulationConfig,
    events::TransitionKind,
    protocol::Command,
    telemetry::{FurnaceState, Telemetry},
};

/// Thermal model and interlock state machine of the simulated furnace.
///
/// Plain data with no clock of its own: the control task calls [`Furnace::step`]
/// once per period, tests call it directly.
#[derive(Debug, Clone)]
pub struct Furnace {
    params: SimulationConfig,

    temperature: f64,
    setpoint: f64,

    heater: bool,
    fan: bool,

    alarm: bool,
    interlock: bool,
    active: bool,
}

/// Result of one control cycle.
#[derive(Debug)]
pub struct Cycle {
    pub telemetry: Telemetry,
    pub transitions: Vec<TransitionKind>,
}

/// Result of a command the simulator understands.
#[derive(Debug, PartialEq)]
pub struct Outcome {
    pub ack: &'static str,
    pub transition: Option<TransitionKind>,
}

impl Furnace {
    pub fn new(params: SimulationConfig) -> Self {
        Self {
            temperature: params.initial_temperature,
            setpoint: bounded(params.setpoint, params.setpoint_min, params.setpoint_max),
            heater: false,
            fan: false,
            alarm: false,
            interlock: false,
            active: true,
            params,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Runs one control cycle. The interlock and alarm are evaluated against the
    /// temperature at the start of the cycle, the published temperature is the one
    /// after the thermal update.
    pub fn step(&mut self) -> Cycle {
        let (alarm, interlock) = (self.alarm, self.interlock);
        let p = &self.params;

        /* 1. Critical interlock */
        if !self.interlock && self.temperature >= p.critical_threshold {
            self.interlock = true;
            self.active = false;
        } else if self.interlock && self.temperature <= self.setpoint {
            self.interlock = false;
            self.active = true;
            self.alarm = false;
        }

        /* 2. Alarm */
        self.alarm = self.interlock || self.temperature >= p.alarm_threshold;

        /* 3. Actuators */
        (self.heater, self.fan) = if self.interlock {
            (false, true)
        } else if !self.active {
            (false, false)
        } else {
            (true, false)
        };

        /* 4. Thermal update */
        if self.heater {
            self.temperature += p.heat_gain;
        }

        if self.fan {
            self.temperature -= p.fan_loss;
        }

        if !self.heater && self.temperature > p.ambient_floor {
            self.temperature -= p.ambient_loss;
        }

        self.temperature = bounded(self.temperature, p.ambient_floor, p.hard_ceiling);

        /* 5. Publish */
        let mut transitions = Vec::new();

        if self.interlock != interlock {
            transitions.push(match self.interlock {
                true => TransitionKind::InterlockEngaged,
                false => TransitionKind::InterlockReleased,
            });
        }

        if self.alarm != alarm {
            transitions.push(match self.alarm {
                true => TransitionKind::AlarmRaised,
                false => TransitionKind::AlarmCleared,
            });
        }

        Cycle {
            telemetry: self.snapshot(),
            transitions,
        }
    }

    /// Applies a command. Returns `None` for commands the simulator does not
    /// implement.
    pub fn execute(&mut self, command: &Command) -> Option<Outcome> {
        let outcome = match *command {
            Command::GetStatus => Outcome {
                ack: "SIMULATOR_ACTIVE",
                transition: None,
            },

            Command::ResetSystem => {
                self.interlock = false;
                self.alarm = false;
                self.active = true;
                self.temperature = self.params.reset_temperature;

                Outcome {
                    ack: "RESET_OK",
                    transition: Some(TransitionKind::SystemReset),
                }
            }

            Command::SetTemperature(value) | Command::SetSetpoint(value) => {
                self.setpoint = bounded(value, self.params.setpoint_min, self.params.setpoint_max);

                Outcome {
                    ack: "SETPOINT_OK",
                    transition: Some(TransitionKind::SetpointChanged {
                        setpoint: self.setpoint,
                    }),
                }
            }

            Command::EmergencyStop => {
                self.interlock = true;
                self.active = false;
                self.heater = false;
                self.fan = true;
                self.alarm = true;

                Outcome {
                    ack: "EMERGENCY_STOP_OK",
                    transition: Some(TransitionKind::EmergencyStop),
                }
            }

            _ => return None,
        };

        Some(outcome)
    }

    /// Current state as telemetry, without advancing the model.
    pub fn snapshot(&self) -> Telemetry {
        let state_label = FurnaceState::derive(
            self.active,
            self.alarm,
            self.interlock,
            self.heater,
            self.fan,
        );

        Telemetry {
            current_temperature: self.temperature,
            setpoint: self.setpoint,
            alarm_threshold: self.params.alarm_threshold,
            critical_threshold: self.params.critical_threshold,
            heater_active: self.heater,
            fan_active: self.fan,
            alarm_active: self.alarm,
            critical_interlock_active: self.interlock,
            system_active: self.active,
            state_label,
            captured_at: Utc::now(),
            controller: None,
        }
    }
}

/// Like `f64::clamp`, but an inverted range yields `max` instead of panicking.
fn bounded(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
