use std::{io, time::Duration};

use thiserror::Error;

/// Errors surfaced by a [`Device`](crate::hardware::Device) to its caller.
///
/// Decode failures on the inbound path and close failures during `stop` are
/// absorbed by the backends and never show up here.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to open {transport}: {source}")]
    ConnectionFailed {
        transport: String,
        #[source]
        source: io::Error,
    },

    #[error("Device is not running")]
    NotRunning,

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("Unknown command \"{0}\"")]
    UnknownCommand(String),

    #[error("Invalid command \"{0}\"")]
    InvalidCommand(String),
}

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;
