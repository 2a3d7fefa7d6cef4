pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod hardware;
pub mod protocol;
pub mod telemetry;

mod misc;
