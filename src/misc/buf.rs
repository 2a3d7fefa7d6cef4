use bytes::{BufMut, BytesMut};

/* == Encode trait == */
pub trait Encode {
    fn encode<B: BufMut>(&self, buf: &mut B);
}

/* == Trait extensions == */

pub trait BufMutExt: BufMut {
    fn put_str(&mut self, string: &str) {
        self.put_slice(string.as_bytes());
    }

    fn put_line(&mut self, line: &str) {
        self.put_str(line);
        self.put_u8(b'\n');
    }
}

impl<T: BufMut> BufMutExt for T {}

pub trait BytesMutExt {
    /// Splits off the first newline-terminated line, without its terminator.
    fn take_line(&mut self) -> Option<BytesMut>;
}

impl BytesMutExt for BytesMut {
    fn take_line(&mut self) -> Option<BytesMut> {
        let end = self.iter().position(|&b| b == b'\n')?;

        let mut line = self.split_to(end + 1);
        line.truncate(end);

        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line() {
        let mut buf = BytesMut::from(&b"first\nsecond\nthi"[..]);

        assert_eq!(buf.take_line().as_deref(), Some(&b"first"[..]));
        assert_eq!(buf.take_line().as_deref(), Some(&b"second"[..]));
        assert_eq!(buf.take_line(), None);
        assert_eq!(&buf[..], b"thi");
    }

    #[test]
    fn test_put_line() {
        let mut buf = Vec::new();
        buf.put_line("GET");
        assert_eq!(buf, b"GET\n");
    }
}
