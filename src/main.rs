use std::io;

use eyre::Result;

fn main() -> Result<()> {
    init()?;
    forno::cli::run()
}

fn init() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter("forno=info")
        .with_writer(io::stderr)
        .init();

    Ok(())
}
