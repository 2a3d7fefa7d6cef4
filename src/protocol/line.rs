use bytes::BytesMut;

use crate::misc::buf::BytesMutExt;

/// Accumulates a byte stream and yields complete newline-terminated lines.
///
/// A trailing fragment is kept until its newline arrives. A fragment that grows
/// past `max_line_length` is thrown away together with everything up to the next
/// newline, after which buffering resumes normally.
pub struct LineBuffer {
    buf: BytesMut,
    max_line_length: usize,
    discarding: bool,
}

impl LineBuffer {
    pub const DEFAULT_MAX_LINE_LENGTH: usize = 512;

    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_line_length),
            max_line_length,
            discarding: false,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<BytesMut> {
        loop {
            let Some(line) = self.buf.take_line() else {
                if self.buf.len() > self.max_line_length {
                    tracing::debug!("Discarding {} bytes without a line break", self.buf.len());
                    self.buf.clear();
                    self.discarding = true;
                }

                return None;
            };

            if self.discarding {
                self.discarding = false;
                continue;
            }

            if line.len() > self.max_line_length {
                tracing::debug!("Discarding oversized line of {} bytes", line.len());
                continue;
            }

            return Some(line);
        }
    }

    /// Bytes waiting for their line terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LINE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut LineBuffer) -> Vec<String> {
        std::iter::from_fn(|| buffer.next_line())
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect()
    }

    #[test]
    fn test_fragmented_lines() {
        let mut buffer = LineBuffer::default();

        buffer.extend(b"T=90");
        assert!(drain(&mut buffer).is_empty());

        buffer.extend(b"0;SP=1000\nT=9");
        assert_eq!(drain(&mut buffer), ["T=900;SP=1000"]);
        assert_eq!(buffer.pending(), 3);

        buffer.extend(b"01\n\nGET\n");
        assert_eq!(drain(&mut buffer), ["T=901", "", "GET"]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_overflow_resynchronises() {
        let mut buffer = LineBuffer::new(8);

        buffer.extend(b"garbage-garbage");
        assert!(drain(&mut buffer).is_empty());

        buffer.extend(b"-more\nT=1\n");
        assert_eq!(drain(&mut buffer), ["T=1"]);
    }

    #[test]
    fn test_oversized_complete_line() {
        let mut buffer = LineBuffer::new(4);

        buffer.extend(b"toolong\nok\n");
        assert_eq!(drain(&mut buffer), ["ok"]);
    }
}
