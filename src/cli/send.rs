use eyre::{Context, Result};

use crate::hardware;

pub async fn run(config_path: &str, command: &str) -> Result<()> {
    let config = super::load_config(config_path).await?;

    let device = hardware::connect(&config.device)?;
    device.start().await.wrap_err("Failed to start device")?;

    let result = device.send(command).await;
    device.stop().await?;

    let ack = result.wrap_err_with(|| format!("Command \"{command}\" failed"))?;
    println!("{ack}");

    Ok(())
}
