use std::io::{ErrorKind, Read, Write};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};

/// A raw byte pipe to a device: read, write, close.
///
/// `read(n)` returns at most `n` bytes. An empty return value means the
/// read timeout elapsed before any byte arrived; the frame layer turns that
/// into a timeout error for the operation in progress. Implementations must
/// not buffer or interpret the data they carry.
pub trait ByteTransport: Send {
    /// Read up to `n` bytes, returning an empty buffer on timeout.
    fn read(&mut self, n: usize) -> Result<Bytes>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Release the underlying medium. Later reads and writes fail with
    /// [`TransportError::Closed`].
    fn close(&mut self) -> Result<()>;
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn read(&mut self, n: usize) -> Result<Bytes> {
        (**self).read(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Adapts any blocking `Read + Write` stream into a [`ByteTransport`].
///
/// Read timeouts configured on the stream (`set_read_timeout` on sockets)
/// surface as empty reads. End of stream is reported as
/// [`TransportError::Closed`] so a dead peer is not mistaken for a slow one.
pub struct IoTransport<S> {
    inner: Option<S>,
    name: &'static str,
}

impl<S: Read + Write + Send> IoTransport<S> {
    /// Wrap a connected stream.
    pub fn new(inner: S) -> Self {
        Self::named(inner, "io")
    }

    /// Wrap a connected stream with a name used in diagnostics.
    pub fn named(inner: S, name: &'static str) -> Self {
        Self {
            inner: Some(inner),
            name,
        }
    }

    /// Borrow the underlying stream, if still open.
    pub fn get_ref(&self) -> Option<&S> {
        self.inner.as_ref()
    }

    /// Mutably borrow the underlying stream, if still open.
    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.inner.as_mut()
    }

    /// Consume the transport and return the stream, if still open.
    pub fn into_inner(self) -> Option<S> {
        self.inner
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        self.name
    }

    fn stream(&mut self) -> Result<&mut S> {
        self.inner.as_mut().ok_or(TransportError::Closed)
    }
}

impl<S: Read + Write + Send> ByteTransport for IoTransport<S> {
    fn read(&mut self, n: usize) -> Result<Bytes> {
        let name = self.name;
        let stream = self.stream()?;
        let mut buf = vec![0u8; n];
        loop {
            match stream.read(&mut buf) {
                Ok(0) if n > 0 => {
                    debug!(transport = name, "stream reached end of file");
                    return Err(TransportError::Closed);
                }
                Ok(read) => {
                    buf.truncate(read);
                    trace!(transport = name, read, "read bytes");
                    return Ok(Bytes::from(buf));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(Bytes::new());
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        let mut offset = 0usize;
        while offset < data.len() {
            match stream.write(&data[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(written) => offset += written,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        loop {
            match stream.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.inner.take().is_some() {
            debug!(transport = self.name, "transport closed");
        }
        Ok(())
    }
}

impl<S> std::fmt::Debug for IoTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoTransport")
            .field("name", &self.name)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
