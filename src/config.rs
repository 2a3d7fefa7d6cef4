use std::{fmt, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub server: ServerConfig,
}

/// Construction-time settings of a device backend, fixed for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub simulator: bool,
    pub strict_commands: bool,
    pub subscriber_capacity: usize,
    pub serial: SerialConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_line_length: usize,
}

/// Thermal model constants, in °C and °C per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub period_ms: u64,
    pub initial_temperature: f64,
    pub setpoint: f64,
    pub alarm_threshold: f64,
    pub critical_threshold: f64,
    pub heat_gain: f64,
    pub fan_loss: f64,
    pub ambient_loss: f64,
    pub ambient_floor: f64,
    pub hard_ceiling: f64,
    pub setpoint_min: f64,
    pub setpoint_max: f64,
    pub reset_temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read(path).await?;
        Self::from_slice(&data)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ConfigError> {
        // serde_yaml rejects an empty document, which should mean "all defaults"
        let config: Config = if data.iter().all(u8::is_ascii_whitespace) {
            Config::default()
        } else {
            serde_yaml::from_slice(data)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let serial = &self.serial;
        let sim = &self.simulation;

        let checks = [
            (serial.baud_rate > 0, "serial.baud_rate must be positive"),
            (serial.read_timeout_ms > 0, "serial.read_timeout_ms must be positive"),
            (serial.write_timeout_ms > 0, "serial.write_timeout_ms must be positive"),
            (serial.max_line_length > 0, "serial.max_line_length must be positive"),
            (sim.period_ms > 0, "simulation.period_ms must be positive"),
            (
                sim.alarm_threshold < sim.critical_threshold,
                "simulation.alarm_threshold must be below critical_threshold",
            ),
            (
                sim.setpoint_min <= sim.setpoint && sim.setpoint <= sim.setpoint_max,
                "simulation.setpoint must lie within [setpoint_min, setpoint_max]",
            ),
            (
                sim.ambient_floor < sim.hard_ceiling,
                "simulation.ambient_floor must be below hard_ceiling",
            ),
            (self.subscriber_capacity > 0, "subscriber_capacity must be positive"),
        ];

        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_owned())),
            None => Ok(()),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl SimulationConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/* == Defaults == */

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            simulator: true,
            strict_commands: false,
            subscriber_capacity: 64,
            serial: SerialConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_owned(),
            baud_rate: 115_200,
            read_timeout_ms: 50,
            write_timeout_ms: 50,
            max_line_length: 512,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            initial_temperature: 1450.,
            setpoint: 1500.,
            alarm_threshold: 1600.,
            critical_threshold: 1750.,
            heat_gain: 5.,
            fan_loss: 8.,
            ambient_loss: 2.,
            ambient_floor: 25.,
            hard_ceiling: 1800.,
            setpoint_min: 1000.,
            setpoint_max: 1800.,
            reset_temperature: 1450.,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.simulator {
            write!(f, "simulator ({} ms period)", self.simulation.period_ms)
        } else {
            write!(f, "serial {} @ {} baud", self.serial.port, self.serial.baud_rate)
        }
    }
}
