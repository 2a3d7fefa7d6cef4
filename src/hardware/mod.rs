use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;

use crate::{
    config::{ConfigError, DeviceConfig},
    error::Result,
    events::Subscription,
    telemetry::Telemetry,
};

pub mod serial;
pub mod simulator;

pub use serial::{SerialDevice, SerialPortTransport, Transport};
pub use simulator::SimulatedDevice;

/// Uniform contract over the furnace backends.
///
/// A backend is the only owner of the furnace state and the only producer of
/// [`Telemetry`]. All methods take `&self` so a device can be shared between the
/// API handlers and the monitor behind an `Arc`.
#[async_trait]
pub trait Device: Send + Sync + Display {
    /// Opens the transport or launches the control loop. Calling `start` on a
    /// running device succeeds without doing anything.
    async fn start(&self) -> Result<()>;

    /// Tears the backend down. Idempotent, close errors are logged, never returned.
    async fn stop(&self) -> Result<()>;

    /// Transmits one command and returns the acknowledgement text.
    async fn send(&self, command: &str) -> Result<String>;

    fn last_telemetry(&self) -> Option<Telemetry>;

    fn subscribe(&self) -> Subscription;

    fn is_running(&self) -> bool;
}

/// Builds the backend selected by the configuration, in the stopped state.
/// The configuration is validated first.
pub fn connect(config: &DeviceConfig) -> std::result::Result<Arc<dyn Device>, ConfigError> {
    config.validate()?;

    let device: Arc<dyn Device> = if config.simulator {
        Arc::new(SimulatedDevice::new(config))
    } else {
        Arc::new(SerialDevice::new(
            config,
            SerialPortTransport::new(&config.serial),
        ))
    };

    Ok(device)
}

#[cfg(test)]
mod tests {
    use crate::config::SimulationConfig;

    use super::*;

    #[test]
    fn test_connect_rejects_invalid_config() {
        let config = DeviceConfig {
            simulation: SimulationConfig {
                setpoint_min: 1800.,
                setpoint_max: 1000.,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(connect(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_connect_selects_backend() {
        let simulator = connect(&DeviceConfig::default()).unwrap();
        assert!(!simulator.is_running());
        assert!(simulator.to_string().starts_with("simulator"));

        let serial = connect(&DeviceConfig {
            simulator: false,
            ..Default::default()
        })
        .unwrap();
        assert!(serial.to_string().starts_with("serial"));
    }
}
