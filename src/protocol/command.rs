use std::{fmt, str::FromStr};

use bytes::{BufMut, BytesMut};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::{
    error::DeviceError,
    misc::buf::{BufMutExt, Encode},
};

/// The furnace command vocabulary. The first four are understood by the
/// simulator, the rest only by controller firmware.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    GetStatus,
    ResetSystem,
    SetTemperature(f64),
    EmergencyStop,
    SetSetpoint(f64),
    SetLimits { min: f64, max: f64, critical: f64 },
    Manual { heater: u8, fan: u8 },
    Mode(Mode),
    ResetEmergencyStop,
    Start,
    Stop,
    Get,
}

#[derive(Copy, Clone, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum Mode {
    #[strum(to_string = "AUTO")]
    Auto,
    #[strum(to_string = "MAN", serialize = "MANUAL")]
    Manual,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command \"{0}\"")]
    Unknown(String),

    #[error("Invalid argument for {keyword}: \"{value}\"")]
    InvalidArgument { keyword: &'static str, value: String },
}

impl FromStr for Command {
    type Err = CommandError;

    /// Case-insensitive, surrounding whitespace and a trailing `;` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let text = text.strip_suffix(';').unwrap_or(text).trim();

        let (keyword, argument) = match text.split_once('=') {
            Some((keyword, argument)) => (keyword.trim(), Some(argument.trim())),
            None => (text, None),
        };

        let keyword = keyword.to_ascii_uppercase();

        let command = match (keyword.as_str(), argument) {
            ("GET_STATUS", None) => Command::GetStatus,
            ("RESET_SYSTEM", None) => Command::ResetSystem,
            ("EMERGENCY_STOP", None) => Command::EmergencyStop,
            ("RST_ESTOP", None) => Command::ResetEmergencyStop,
            ("START", None) => Command::Start,
            ("STOP", None) => Command::Stop,
            ("GET", None) => Command::Get,
            ("SET_TEMP", Some(value)) => Command::SetTemperature(number("SET_TEMP", value)?),
            ("SET_SP", Some(value)) => Command::SetSetpoint(number("SET_SP", value)?),
            ("SET_LIMS", Some(value)) => {
                let [min, max, critical] = list("SET_LIMS", value)?;

                Command::SetLimits {
                    min: number("SET_LIMS", min)?,
                    max: number("SET_LIMS", max)?,
                    critical: number("SET_LIMS", critical)?,
                }
            }
            ("MAN", Some(value)) => {
                let [heater, fan] = list("MAN", value)?;

                Command::Manual {
                    heater: duty("MAN", heater)?,
                    fan: duty("MAN", fan)?,
                }
            }
            ("MODE", Some(value)) => Command::Mode(value.parse().map_err(|_| {
                CommandError::InvalidArgument {
                    keyword: "MODE",
                    value: value.to_owned(),
                }
            })?),
            _ => return Err(CommandError::Unknown(text.to_owned())),
        };

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetStatus => write!(f, "GET_STATUS"),
            Command::ResetSystem => write!(f, "RESET_SYSTEM"),
            Command::SetTemperature(value) => write!(f, "SET_TEMP={value}"),
            Command::EmergencyStop => write!(f, "EMERGENCY_STOP"),
            Command::SetSetpoint(value) => write!(f, "SET_SP={value}"),
            Command::SetLimits { min, max, critical } => {
                write!(f, "SET_LIMS={min},{max},{critical}")
            }
            Command::Manual { heater, fan } => write!(f, "MAN={heater},{fan}"),
            Command::Mode(mode) => write!(f, "MODE={mode}"),
            Command::ResetEmergencyStop => write!(f, "RST_ESTOP"),
            Command::Start => write!(f, "START"),
            Command::Stop => write!(f, "STOP"),
            Command::Get => write!(f, "GET"),
        }
    }
}

impl Encode for Command {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_line(&self.to_string());
    }
}

/// Frames free command text as one wire line. Text that is empty or spans
/// several lines is refused.
pub fn encode_line(text: &str) -> Result<BytesMut, DeviceError> {
    let line = text.trim();

    if line.is_empty() || line.contains(['\n', '\r']) {
        return Err(DeviceError::InvalidCommand(text.to_owned()));
    }

    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_line(line);

    Ok(buf)
}

fn number(keyword: &'static str, value: &str) -> Result<f64, CommandError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CommandError::InvalidArgument {
            keyword,
            value: value.to_owned(),
        })
}

fn duty(keyword: &'static str, value: &str) -> Result<u8, CommandError> {
    value
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidArgument {
            keyword,
            value: value.to_owned(),
        })
}

fn list<'a, const N: usize>(keyword: &'static str, value: &'a str) -> Result<[&'a str; N], CommandError> {
    let parts: Vec<_> = value.split(',').collect();

    parts.try_into().map_err(|_| CommandError::InvalidArgument {
        keyword,
        value: value.to_owned(),
    })
}
