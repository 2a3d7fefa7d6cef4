//! Wire codec shared by the serial backend: inbound line framing, the telemetry
//! decoders and the outbound command encoder.

use thiserror::Error;

use crate::telemetry::Telemetry;

mod command;
mod json;
mod key_value;
mod line;
mod report;
mod status_line;

pub use command::{Command, CommandError, Mode, encode_line};
pub use json::JsonDecoder;
pub use key_value::KeyValueDecoder;
pub use line::LineBuffer;
pub use status_line::StatusLineDecoder;

/// A single line did not decode as telemetry. Logged and dropped by
/// [`TelemetryDecoder`], never surfaced to a device's caller.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Line does not match the format")]
    Unrecognised,

    #[error("Line is not valid UTF-8")]
    NotUtf8,

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// One wire format. Decoders are tried in order and the first to accept a line
/// wins.
pub trait LineDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decodes a trimmed, non-empty line. Fields absent from the record are taken
    /// from `previous` where the format allows it.
    fn decode(&self, line: &str, previous: Option<&Telemetry>) -> Result<Telemetry, DecodeError>;
}

/// Stateful inbound half of the codec, owned by one serial reader.
pub struct TelemetryDecoder {
    buffer: LineBuffer,
    decoders: Vec<Box<dyn LineDecoder>>,
    previous: Option<Telemetry>,
}

impl TelemetryDecoder {
    pub fn new(max_line_length: usize) -> Self {
        Self::with_decoders(
            max_line_length,
            vec![
                Box::new(KeyValueDecoder),
                Box::new(StatusLineDecoder),
                Box::new(JsonDecoder),
            ],
        )
    }

    pub fn with_decoders(max_line_length: usize, decoders: Vec<Box<dyn LineDecoder>>) -> Self {
        Self {
            buffer: LineBuffer::new(max_line_length),
            decoders,
            previous: None,
        }
    }

    /// Feeds raw bytes, returning the telemetry of every line they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Telemetry> {
        self.buffer.extend(bytes);

        let mut decoded = Vec::new();

        while let Some(line) = self.buffer.next_line() {
            match self.decode_line(&line) {
                Ok(Some(telemetry)) => {
                    self.previous = Some(telemetry.clone());
                    decoded.push(telemetry);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!("Skipped line {:?}: {error}", String::from_utf8_lossy(&line));
                }
            }
        }

        decoded
    }

    fn decode_line(&self, line: &[u8]) -> Result<Option<Telemetry>, DecodeError> {
        let line = std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)?;
        let line = line.trim();

        if line.is_empty() {
            return Ok(None);
        }

        for decoder in &self.decoders {
            match decoder.decode(line, self.previous.as_ref()) {
                Ok(telemetry) => {
                    tracing::trace!("Decoded {} record", decoder.name());
                    return Ok(Some(telemetry));
                }
                Err(DecodeError::Unrecognised) => continue,
                Err(error) => return Err(error),
            }
        }

        Err(DecodeError::Unrecognised)
    }

    /// Last successfully decoded record.
    pub fn previous(&self) -> Option<&Telemetry> {
        self.previous.as_ref()
    }
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new(LineBuffer::DEFAULT_MAX_LINE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use crate::telemetry::FurnaceState;

    use super::*;

    #[test]
    fn test_mixed_formats() {
        let mut decoder = TelemetryDecoder::default();

        let decoded = decoder.feed(
            b"Sistema iniciado!\r\n\
              T=900;SP=1000;HEATER=200\r\n\
              ACK\n\
              TEMP: 1510.0C | SP: 1500.0C | RESFRIANDO (-8C) | M:OFF V:ON A:OFF\n\
              {\"t\":1490.5,\"sp\":1500,\"heater\":0,\"fan\":0,\"alarm\":\"NONE\",\"eStop\":false}\n",
        );

        let temperatures: Vec<_> = decoded.iter().map(|t| t.current_temperature).collect();
        assert_eq!(temperatures, [900., 1510., 1490.5]);
        assert_eq!(decoded[1].state_label, FurnaceState::Cooling);
    }

    #[test]
    fn test_garbage_does_not_desynchronise() {
        let mut decoder = TelemetryDecoder::new(32);

        assert!(decoder.feed(&[0xff, 0xfe, b'\n']).is_empty());
        assert!(decoder.feed(&[b'x'; 100]).is_empty());

        let decoded = decoder.feed(b"still garbage\nT=1;SP=2\n");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].setpoint, 2.);
    }

    #[test]
    fn test_previous_carries_over() {
        let mut decoder = TelemetryDecoder::default();

        decoder.feed(b"T=900;SP=1000;LIM_MAX=1200;LIM_CRIT=1300\n");
        let decoded = decoder.feed(b"T=950\n");

        assert_eq!(decoded[0].setpoint, 1000.);
        assert_eq!(decoded[0].alarm_threshold, 1200.);
        assert_eq!(decoder.previous().unwrap().current_temperature, 950.);
    }
}
