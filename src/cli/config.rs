use eyre::Result;

pub async fn read_and_print(path: &str) -> Result<()> {
    let config = super::load_config(path).await?;

    tracing::info!("Device: {}", config.device);
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
