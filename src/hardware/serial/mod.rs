use std::{
    fmt,
    io::{self, ErrorKind, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    task::{JoinHandle, spawn_blocking},
    time::timeout,
};

use crate::{
    config::{DeviceConfig, SerialConfig},
    error::{DeviceError, Result},
    events::{Publisher, Subscription, Transition},
    protocol::{TelemetryDecoder, encode_line},
    telemetry::Telemetry,
};

use super::Device;

mod link;
pub mod memory;

pub use link::{Link, SerialPortTransport, Transport};

const READ_BUFFER_SIZE: usize = 256;

/// Backend talking to the controller firmware over a byte stream.
///
/// Reads happen on a dedicated blocking thread that decodes and publishes. Writes
/// go through a separate handle, so a command never waits on the reader.
pub struct SerialDevice<T = SerialPortTransport> {
    transport: Arc<T>,
    config: SerialConfig,
    publisher: Publisher,
    running: Arc<AtomicBool>,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    writer: Arc<std::sync::Mutex<Box<dyn Write + Send>>>,
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl<T: Transport> SerialDevice<T> {
    pub fn new(config: &DeviceConfig, transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            config: config.serial.clone(),
            publisher: Publisher::new(config.subscriber_capacity),
            running: Arc::new(AtomicBool::new(false)),
            connection: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<Link> {
        let transport = self.transport.clone();

        spawn_blocking(move || transport.open())
            .await
            .map_err(io::Error::other)
            .and_then(|opened| opened)
            .map_err(|source| DeviceError::ConnectionFailed {
                transport: self.transport.name(),
                source,
            })
    }

    /// Releases a connection whose reader has already stopped or is told to stop.
    async fn close(&self, connection: Connection) {
        let Connection {
            writer,
            stop,
            reader,
        } = connection;

        stop.store(true, Ordering::Release);

        // Waits out a write that outlived its caller's timeout
        let flushed = spawn_blocking(move || match writer.lock() {
            Ok(mut writer) => writer.flush(),
            Err(_) => Ok(()),
        })
        .await;

        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to flush on close: {e}"),
            Err(e) => tracing::warn!("Failed to flush on close: {e}"),
        }

        if let Err(e) = reader.await {
            tracing::warn!("Reader ended abnormally: {e}");
        }
    }
}

#[async_trait]
impl<T: Transport> Device for SerialDevice<T> {
    async fn start(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;

        if connection.is_some() {
            if self.is_running() {
                return Ok(());
            }

            // The reader died with the link, reopen from scratch
            if let Some(dead) = connection.take() {
                self.close(dead).await;
            }
        }

        let Link { reader, writer } = self.open().await?;

        let stop = Arc::new(AtomicBool::new(false));
        let decoder = TelemetryDecoder::new(self.config.max_line_length);
        let publisher = self.publisher.clone();
        let running = self.running.clone();
        let span = tracing::info_span!("serial", port = %self.transport.name());

        self.running.store(true, Ordering::Release);

        let reader = spawn_blocking({
            let stop = stop.clone();
            move || {
                span.in_scope(|| read_loop(reader, decoder, publisher, &stop));

                if !stop.load(Ordering::Acquire) {
                    running.store(false, Ordering::Release);
                }
            }
        });

        *connection = Some(Connection {
            writer: Arc::new(std::sync::Mutex::new(writer)),
            stop,
            reader,
        });

        tracing::info!(
            "Connected to {} at {} baud",
            self.transport.name(),
            self.config.baud_rate
        );

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;

        let Some(closing) = connection.take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::Release);
        self.close(closing).await;

        tracing::info!("Disconnected from {}", self.transport.name());
        Ok(())
    }

    async fn send(&self, command: &str) -> Result<String> {
        let connection = self.connection.lock().await;

        let Some(Connection { writer, .. }) = connection.as_ref().filter(|_| self.is_running())
        else {
            return Err(DeviceError::NotRunning);
        };

        let line = encode_line(command)?;
        let writer = writer.clone();
        let write_timeout = self.config.write_timeout();

        tracing::debug!("Sending \"{}\"", command.trim());

        let write = spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|_| io::Error::other("writer poisoned"))?;

            writer.write_all(&line)?;
            writer.flush()
        });

        match timeout(write_timeout, write).await {
            Ok(Ok(Ok(()))) => Ok("OK".to_owned()),
            Ok(Ok(Err(e))) if e.kind() == ErrorKind::TimedOut => {
                Err(DeviceError::WriteTimeout(write_timeout))
            }
            Ok(Ok(Err(e))) => Err(DeviceError::WriteFailed(e)),
            Ok(Err(e)) => Err(DeviceError::WriteFailed(io::Error::other(e))),
            Err(_) => Err(DeviceError::WriteTimeout(write_timeout)),
        }
    }

    fn last_telemetry(&self) -> Option<Telemetry> {
        self.publisher.last()
    }

    fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl<T: Transport> fmt::Display for SerialDevice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serial ({})", self.transport.name())
    }
}

impl<T> Drop for SerialDevice<T> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.stop.store(true, Ordering::Release);
        }
    }
}

/* == Reader thread == */

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    mut decoder: TelemetryDecoder,
    publisher: Publisher,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut previous: Option<Telemetry> = None;

    while !stop.load(Ordering::Acquire) {
        let size = match reader.read(&mut buf) {
            Ok(0) => {
                tracing::warn!("Link closed by the controller");
                break;
            }
            Ok(size) => size,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                tracing::error!("Read failed: {e}");
                break;
            }
        };

        for telemetry in decoder.feed(&buf[..size]) {
            let telemetry = publisher.publish(telemetry);

            if let Some(previous) = &previous {
                for kind in Transition::between(previous, &telemetry) {
                    publisher.transition(kind, telemetry.current_temperature);
                }
            }

            previous = Some(telemetry);
        }
    }

    tracing::debug!("Reader stopped");
}
