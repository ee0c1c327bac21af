use std::collections::VecDeque;

use bytes::{Buf, Bytes};

use crate::error::{Result, TransportError};
use crate::io::ByteTransport;

/// Scripted in-memory transport.
///
/// Inbound data is a queue of chunks handed out in order; each `read`
/// returns bytes from at most one chunk. Once the script runs dry every read
/// is empty, which the frame layer treats as a timeout. Everything written
/// is captured and can be inspected with [`MemoryTransport::written`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<Bytes>,
    written: Vec<u8>,
    closed: bool,
}

impl MemoryTransport {
    /// Create a transport whose inbound side yields `script` as one chunk.
    pub fn new(script: impl Into<Bytes>) -> Self {
        let mut transport = Self::default();
        transport.push(script);
        transport
    }

    /// Queue another inbound chunk.
    pub fn push(&mut self, chunk: impl Into<Bytes>) -> &mut Self {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.inbound.push_back(chunk);
        }
        self
    }

    /// Queue a single empty read, simulating one read timeout.
    pub fn push_timeout(&mut self) -> &mut Self {
        self.inbound.push_back(Bytes::new());
        self
    }

    /// All bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Drain and return everything written so far.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ByteTransport for MemoryTransport {
    fn read(&mut self, n: usize) -> Result<Bytes> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let Some(front) = self.inbound.front_mut() else {
            return Ok(Bytes::new());
        };
        if front.is_empty() {
            self.inbound.pop_front();
            return Ok(Bytes::new());
        }
        let take = n.min(front.len());
        let out = front.split_to(take);
        if !front.has_remaining() {
            self.inbound.pop_front();
        }
        Ok(out)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
