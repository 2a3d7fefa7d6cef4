use clap::{Parser, Subcommand};
use eyre::{Context, Result};

use crate::config::Config;

mod config;
mod monitor;
mod send;
mod server;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate and print the configuration
    Config {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    /// Log telemetry and transitions until Ctrl-C
    Monitor {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        /// Use the simulator regardless of the configuration
        #[arg(long)]
        simulator: bool,
    },

    /// Send a single command and print the acknowledgement
    Send {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        command: String,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        /// Overrides `server.port`
        #[arg(short, long)]
        port: Option<u16>,
    },
}

pub fn run() -> Result<()> {
    execute_command(Cli::parse().command)
}

#[tokio::main]
pub async fn execute_command(command: Command) -> Result<()> {
    match command {
        Command::Config { config } => self::config::read_and_print(&config).await,
        Command::Monitor { config, simulator } => self::monitor::run(&config, simulator).await,
        Command::Send { config, command } => self::send::run(&config, &command).await,
        Command::Serve { config, port } => self::server::launch(&config, port).await,
    }
}

async fn load_config(path: &str) -> Result<Config> {
    Config::load(path)
        .await
        .wrap_err_with(|| format!("Failed to load {path}"))
}
