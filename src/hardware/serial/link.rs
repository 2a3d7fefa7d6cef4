use std::{
    io::{self, Read, Write},
    time::Duration,
};

use crate::config::SerialConfig;

/// Something that can open a bidirectional byte stream to the controller.
///
/// `open` blocks and is run off the async runtime. The reader half must return
/// `TimedOut` or `WouldBlock` periodically when idle so that the reader thread can
/// notice a stop request, and `Ok(0)` once the stream has closed.
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> String;

    fn open(&self) -> io::Result<Link>;
}

/// Both halves of an open transport.
pub struct Link {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// A USB/UART serial port, 8N1.
pub struct SerialPortTransport {
    port: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialPortTransport {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout(),
        }
    }
}

impl Transport for SerialPortTransport {
    fn name(&self) -> String {
        self.port.clone()
    }

    fn open(&self) -> io::Result<Link> {
        let port = serialport::new(self.port.as_str(), self.baud_rate)
            .timeout(self.read_timeout)
            .open()?;

        let reader = port.try_clone()?;

        Ok(Link {
            reader: Box::new(reader),
            writer: Box::new(port),
        })
    }
}
