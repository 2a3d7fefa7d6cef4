use std::{
    io::{self, Read, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use super::link::{Link, Transport};

const IDLE_POLL: Duration = Duration::from_millis(5);

/// In-process stand-in for a serial port, driven from the other end through a
/// [`MemoryPeer`].
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// The controller's side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    inbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    written: Mutex<Vec<u8>>,
    fail_open: AtomicBool,
    write_stall_ms: AtomicU64,
    opened: AtomicU64,
}

struct MemoryReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

struct MemoryWriter {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryPeer) {
        let shared = Arc::new(Shared::default());

        (
            Self {
                shared: shared.clone(),
            },
            MemoryPeer { shared },
        )
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> String {
        "memory".to_owned()
    }

    fn open(&self) -> io::Result<Link> {
        if self.shared.fail_open.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
        }

        let (tx, rx) = mpsc::channel();
        *lock(&self.shared.inbound) = Some(tx);
        self.shared.opened.fetch_add(1, Ordering::AcqRel);

        Ok(Link {
            reader: Box::new(MemoryReader {
                rx,
                pending: Vec::new(),
            }),
            writer: Box::new(MemoryWriter {
                shared: self.shared.clone(),
            }),
        })
    }
}

impl MemoryPeer {
    /// Sends bytes to the device, as one read. Dropped if the link is not open.
    pub fn feed(&self, bytes: impl Into<Vec<u8>>) {
        if let Some(tx) = lock(&self.shared.inbound).as_ref() {
            let _ = tx.send(bytes.into());
        }
    }

    /// Closes the device's read half, as if the cable had been pulled.
    pub fn disconnect(&self) {
        lock(&self.shared.inbound).take();
    }

    /// Everything the device has written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.shared.written).clone()
    }

    pub fn fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::Release);
    }

    /// Makes every following write block for `stall` before completing.
    pub fn stall_writes(&self, stall: Duration) {
        let millis = u64::try_from(stall.as_millis()).unwrap_or(u64::MAX);
        self.shared.write_stall_ms.store(millis, Ordering::Release);
    }

    /// Number of times the transport has been opened.
    pub fn opened(&self) -> u64 {
        self.shared.opened.load(Ordering::Acquire)
    }
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.rx.recv_timeout(IDLE_POLL) {
                Ok(bytes) => self.pending = bytes,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let size = buf.len().min(self.pending.len());
        buf[..size].copy_from_slice(&self.pending[..size]);
        self.pending.drain(..size);

        Ok(size)
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stall = self.shared.write_stall_ms.load(Ordering::Acquire);

        if stall > 0 {
            thread::sleep(Duration::from_millis(stall));
        }

        lock(&self.shared.written).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
