//! Transport over any byte stream, e.g. a TCP socket to a bridge board.
use std::io::{self, Read, Write};
use std::time::Duration;

use super::Transport;
use crate::constants::RESPONSE_BUFFER_SIZE;
use crate::error::Result;

/// Each `recv_raw` is one read of up to 512 bytes. Timeouts are left to the
/// stream itself.
pub struct StreamTransport<S> {
    stream: S,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        StreamTransport { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn send_raw(&mut self, raw: &[u8], _timeout: Duration) -> Result<()> {
        self.stream.write_all(raw)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv_raw(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
        let n = self.stream.read(&mut buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed").into());
        }
        buf.truncate(n);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::checksum::ChecksumType;
    use crate::error::Error;
    use crate::protocol::Response;

    /// Reads from a canned buffer, records writes.
    struct Loopback {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn single_read_per_response() {
        let resp = Response::Ok(vec![0x10, 0x00, 0x20, 0x00])
            .into_raw(ChecksumType::BasicSum)
            .unwrap();
        let mut transport = StreamTransport::new(Loopback {
            input: Cursor::new(resp.clone()),
            output: vec![],
        });

        transport.send_raw(&[1, 2, 3], Duration::ZERO).unwrap();
        assert_eq!(transport.recv_raw(Duration::ZERO).unwrap(), resp);
        assert_eq!(transport.get_ref().output, vec![1, 2, 3]);
    }

    #[test]
    fn closed_stream_is_an_error() {
        let mut transport = StreamTransport::new(Loopback {
            input: Cursor::new(vec![]),
            output: vec![],
        });
        let err = transport.recv_raw(Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
