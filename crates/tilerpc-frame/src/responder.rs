use bytes::{Buf, BufMut, BytesMut};
use tilerpc_transport::ByteTransport;
use tracing::trace;

use crate::command::{MAX_RPC_PAYLOAD, STATUS_ERROR, STATUS_OK};
use crate::config::FrameConfig;
use crate::error::{FrameError, Result};
use crate::terminator::{Terminator, HEARTBEAT, RESET, RESET_ACK};

const READ_CHUNK_SIZE: usize = 256;

/// A request read by the device side of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Heartbeat byte.
    Heartbeat,
    /// Reset byte.
    Reset,
    /// A command line, without its line ending.
    Line(String),
}

/// Device side of a framed link: reads requests and writes responses.
pub struct FrameResponder<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: ByteTransport> FrameResponder<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            config,
        }
    }

    /// Wait for the next request.
    ///
    /// An idle link yields [`FrameError::TransportTimeout`]; callers usually
    /// treat that as "nothing yet" and poll again.
    pub fn read_request(&mut self) -> Result<Request> {
        loop {
            match self.buf.first().copied() {
                Some(HEARTBEAT) => {
                    self.buf.advance(1);
                    return Ok(Request::Heartbeat);
                }
                Some(RESET) => {
                    self.buf.advance(1);
                    return Ok(Request::Reset);
                }
                Some(_) => {
                    if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                        let line = self.buf.split_to(pos + 1);
                        let text = std::str::from_utf8(&line[..pos])
                            .map_err(|_| FrameError::MalformedRequest("non-utf8 command".into()))?
                            .trim_end_matches('\r')
                            .to_string();
                        trace!(line = %text, "request line");
                        return Ok(Request::Line(text));
                    }
                    if self.buf.len() > self.config.max_frame_size {
                        let size = self.buf.len();
                        self.buf.clear();
                        return Err(FrameError::FrameTooLarge {
                            size,
                            max: self.config.max_frame_size,
                        });
                    }
                }
                None => {}
            }

            let chunk = self.inner.read(READ_CHUNK_SIZE)?;
            if chunk.is_empty() {
                return Err(FrameError::TransportTimeout {
                    operation: "read_request",
                });
            }
            self.buf.extend_from_slice(&chunk);
        }
    }

    /// Echo a heartbeat byte.
    pub fn write_heartbeat(&mut self) -> Result<()> {
        self.inner.write(&[HEARTBEAT]).map_err(Into::into)
    }

    /// Acknowledge a reset.
    pub fn write_reset_ack(&mut self) -> Result<()> {
        self.inner.write(&[RESET_ACK]).map_err(Into::into)
    }

    /// Write a raw frame followed by its terminator.
    pub fn write_frame(&mut self, payload: &[u8], terminator: Terminator) -> Result<()> {
        let mut out = BytesMut::with_capacity(payload.len() + 1);
        out.put_slice(payload);
        out.put_u8(terminator.as_byte());
        self.inner.write(&out).map_err(Into::into)
    }

    /// Write a successful rpc response: status 0, length, payload, ACK.
    pub fn write_rpc_ok(&mut self, payload: &[u8]) -> Result<()> {
        let len = u8::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
            size: payload.len(),
            max: MAX_RPC_PAYLOAD,
        })?;
        let mut out = BytesMut::with_capacity(payload.len() + 3);
        out.put_u8(STATUS_OK);
        out.put_u8(len);
        out.put_slice(payload);
        out.put_u8(Terminator::Ack.as_byte());
        self.inner.write(&out).map_err(Into::into)
    }

    /// Write an rpc error response: status 254, message, NACK.
    ///
    /// Terminator bytes inside the message are replaced so the frame stays
    /// well formed.
    pub fn write_rpc_error(&mut self, message: &str) -> Result<()> {
        let mut out = BytesMut::with_capacity(message.len() + 2);
        out.put_u8(STATUS_ERROR);
        out.extend(message.bytes().map(|b| {
            if Terminator::is_terminator(b) {
                b'?'
            } else {
                b
            }
        }));
        out.put_u8(Terminator::Nack.as_byte());
        self.inner.write(&out).map_err(Into::into)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
