use eyre::{Context, Result};
use tokio::{select, signal};

use crate::{
    events::Event,
    hardware,
    misc::ColourDot,
    telemetry::Telemetry,
};

pub async fn run(config_path: &str, simulator: bool) -> Result<()> {
    let mut config = super::load_config(config_path).await?;
    config.device.simulator |= simulator;

    let device = hardware::connect(&config.device)?;
    let mut events = device.subscribe();

    device.start().await.wrap_err("Failed to start device")?;
    tracing::info!("Monitoring {device}, press Ctrl-C to stop");

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        select! {
            event = events.recv() => match event {
                Some(Event::Telemetry(telemetry)) => print_telemetry(&telemetry),
                Some(Event::Transition(transition)) => println!(
                    "{} {transition} at {:.1}°C",
                    transition.at.format("%H:%M:%S"),
                    transition.temperature
                ),
                None => break,
            },

            _ = &mut shutdown => break,
        }
    }

    device.stop().await?;
    Ok(())
}

fn print_telemetry(telemetry: &Telemetry) {
    println!(
        "{} {:>7.1}°C  SP {:>6.1}°C  heater {}  fan {}  alarm {}  interlock {}  {}",
        telemetry.captured_at.format("%H:%M:%S"),
        telemetry.current_temperature,
        telemetry.setpoint,
        ColourDot(telemetry.heater_active),
        ColourDot(telemetry.fan_active),
        ColourDot(telemetry.alarm_active),
        ColourDot(telemetry.critical_interlock_active),
        telemetry.state_label,
    );
}
