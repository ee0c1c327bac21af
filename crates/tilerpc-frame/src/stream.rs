use bytes::{Buf, Bytes, BytesMut};
use tilerpc_transport::ByteTransport;
use tracing::{debug, trace, warn};

use crate::command::{RpcCommand, RpcResponse, STATUS_ERROR, STATUS_OK};
use crate::config::FrameConfig;
use crate::error::{FrameError, Result};
use crate::terminator::{Terminator, HEARTBEAT, RESET, RESET_ACK};

const INITIAL_BUFFER_CAPACITY: usize = 256;
const READ_CHUNK_SIZE: usize = 256;

/// Host side of a framed link: sends commands and reads terminated frames.
///
/// Every read that comes back empty before the expected bytes arrive fails
/// the current operation with [`FrameError::TransportTimeout`]. The stream
/// itself stays usable; buffered leftovers are dropped so the next command
/// starts clean.
pub struct CommandStream<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: ByteTransport> CommandStream<T> {
    /// Create a command stream with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a command stream with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read bytes up to the next ACK or NACK and return them with the
    /// terminator (which is consumed, not included in the payload).
    pub fn read_frame(&mut self) -> Result<(Bytes, Terminator)> {
        self.read_frame_for("read_frame")
    }

    fn read_frame_for(&mut self, operation: &'static str) -> Result<(Bytes, Terminator)> {
        let mut scanned = 0usize;
        loop {
            if let Some(pos) = self.buf[scanned..]
                .iter()
                .position(|&b| Terminator::is_terminator(b))
            {
                let payload = self.buf.split_to(scanned + pos).freeze();
                let terminator = Terminator::try_from(self.buf.get_u8())?;
                trace!(operation, len = payload.len(), ?terminator, "frame received");
                return Ok((payload, terminator));
            }
            scanned = self.buf.len();

            if scanned > self.config.max_frame_size {
                let size = scanned;
                self.buf.clear();
                return Err(FrameError::FrameTooLarge {
                    size,
                    max: self.config.max_frame_size,
                });
            }

            self.fill(operation)?;
        }
    }

    /// Send a text command, appending a newline if missing, and wait for
    /// the response frame.
    pub fn send_command(&mut self, text: &str) -> Result<(Bytes, Terminator)> {
        self.send_command_with(text, |stream| stream.read_frame())
    }

    /// Send a text command and hand the response to a custom reader.
    ///
    /// Used for commands whose replies are not a plain frame, such as rpc
    /// responses with a status byte and length prefix.
    pub fn send_command_with<R>(
        &mut self,
        text: &str,
        handler: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.discard_stale();
        if text.ends_with('\n') {
            self.inner.write(text.as_bytes())?;
        } else {
            let mut line = String::with_capacity(text.len() + 1);
            line.push_str(text);
            line.push('\n');
            self.inner.write(line.as_bytes())?;
        }
        debug!(command = text.trim_end(), "command sent");
        handler(self)
    }

    /// Check liveness: send `0xFF` and expect it echoed back.
    ///
    /// Returns `Ok(false)` if some other byte came back.
    pub fn heartbeat(&mut self) -> Result<bool> {
        self.control(HEARTBEAT, HEARTBEAT, "heartbeat")
    }

    /// Reset the link: send `0x00` and expect `0x01`.
    pub fn reset(&mut self) -> Result<bool> {
        self.control(RESET, RESET_ACK, "reset")
    }

    fn control(&mut self, request: u8, expected: u8, operation: &'static str) -> Result<bool> {
        self.discard_stale();
        self.inner.write(&[request])?;
        let reply = self.take(1, operation)?;
        let ok = reply[0] == expected;
        if !ok {
            warn!(operation, reply = reply[0], expected, "unexpected control reply");
        }
        Ok(ok)
    }

    /// Send an rpc command and parse its status, payload and terminator.
    pub fn send_rpc(&mut self, command: &RpcCommand) -> Result<RpcResponse> {
        self.send_command_with(&command.to_line(), Self::read_rpc_response)
    }

    fn read_rpc_response(&mut self) -> Result<RpcResponse> {
        let status = self.take(1, "rpc_status")?[0];
        match status {
            STATUS_OK => {
                let len = self.take(1, "rpc_length")?[0] as usize;
                let payload = self.take(len, "rpc_payload")?;
                let terminator = Terminator::try_from(self.take(1, "rpc_terminator")?[0])?;
                if terminator == Terminator::Nack {
                    return Err(FrameError::Nack { operation: "rpc" });
                }
                Ok(RpcResponse::Ok(payload))
            }
            STATUS_ERROR => {
                let (message, _terminator) = self.read_frame_for("rpc_error")?;
                Ok(RpcResponse::Error(
                    String::from_utf8_lossy(&message).into_owned(),
                ))
            }
            other => {
                self.buf.clear();
                Err(FrameError::UnsupportedStatus(other))
            }
        }
    }

    fn take(&mut self, n: usize, operation: &'static str) -> Result<Bytes> {
        while self.buf.len() < n {
            self.fill(operation)?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    fn fill(&mut self, operation: &'static str) -> Result<()> {
        let chunk = self.inner.read(READ_CHUNK_SIZE)?;
        if chunk.is_empty() {
            if !self.buf.is_empty() {
                debug!(operation, dropped = self.buf.len(), "dropping partial frame after timeout");
                self.buf.clear();
            }
            return Err(FrameError::TransportTimeout { operation });
        }
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    fn discard_stale(&mut self) {
        if !self.buf.is_empty() {
            debug!(dropped = self.buf.len(), "discarding stale bytes before command");
            self.buf.clear();
        }
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the stream and return the transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        self.buf.clear();
        self.inner.close().map_err(Into::into)
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use tilerpc_format::Value;
    use tilerpc_transport::{MemoryTransport, TransportError};

    use super::*;

    fn stream(script: &'static [u8]) -> CommandStream<MemoryTransport> {
        CommandStream::new(MemoryTransport::new(script))
    }

    #[test]
    fn read_frame_ack() {
        let mut s = stream(b"\x01\x02\x03\x06");
        let (payload, term) = s.read_frame().unwrap();
        assert_eq!(payload.as_ref(), b"\x01\x02\x03");
        assert_eq!(term, Terminator::Ack);
    }

    #[test]
    fn read_frame_nack() {
        let mut s = stream(b"\x01\x02\x03\x15");
        let (payload, term) = s.read_frame().unwrap();
        assert_eq!(payload.as_ref(), b"\x01\x02\x03");
        assert_eq!(term, Terminator::Nack);
    }

    #[test]
    fn read_frame_across_chunks() {
        let mut transport = MemoryTransport::new(&b"ab"[..]);
        transport.push(&b"c"[..]).push(&b"d\x06rest"[..]);
        let mut s = CommandStream::new(transport);

        let (payload, term) = s.read_frame().unwrap();
        assert_eq!(payload.as_ref(), b"abcd");
        assert_eq!(term, Terminator::Ack);
    }

    #[test]
    fn back_to_back_frames() {
        let mut s = stream(b"one\x06two\x15");
        assert_eq!(s.read_frame().unwrap().0.as_ref(), b"one");
        let (payload, term) = s.read_frame().unwrap();
        assert_eq!(payload.as_ref(), b"two");
        assert_eq!(term, Terminator::Nack);
    }

    #[test]
    fn empty_read_is_timeout_not_partial_data() {
        let mut s = stream(b"\x01\x02");
        let err = s.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::TransportTimeout {
                operation: "read_frame"
            }
        ));
    }

    #[test]
    fn stream_usable_after_timeout() {
        let mut transport = MemoryTransport::new(&b"partial"[..]);
        transport.push_timeout().push(&b"fresh\x06"[..]);
        let mut s = CommandStream::new(transport);

        assert!(s.read_frame().unwrap_err().is_timeout());
        let (payload, _) = s.read_frame().unwrap();
        assert_eq!(payload.as_ref(), b"fresh");
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut s = CommandStream::with_config(
            MemoryTransport::new(vec![b'a'; 64]),
            FrameConfig {
                max_frame_size: 16,
                ..FrameConfig::default()
            },
        );
        assert!(matches!(
            s.read_frame(),
            Err(FrameError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn send_command_appends_newline() {
        let mut s = stream(b"0\x06");
        let (payload, term) = s.send_command("alarm status").unwrap();
        assert_eq!(payload.as_ref(), b"0");
        assert_eq!(term, Terminator::Ack);
        assert_eq!(s.get_ref().written(), b"alarm status\n");

        let mut s = stream(b"\x06");
        s.send_command("alarm yes\n").unwrap();
        assert_eq!(s.get_ref().written(), b"alarm yes\n");
    }

    #[test]
    fn send_command_with_custom_handler() {
        let mut s = stream(b"\x2a");
        let byte = s
            .send_command_with("status", |stream| Ok(stream.take(1, "status")?[0]))
            .unwrap();
        assert_eq!(byte, 0x2a);
    }

    #[test]
    fn heartbeat_echo() {
        let mut s = stream(b"\xff");
        assert!(s.heartbeat().unwrap());
        assert_eq!(s.get_ref().written(), b"\xff");

        let mut s = stream(b"\x00");
        assert!(!s.heartbeat().unwrap());

        let mut s = stream(b"");
        assert!(matches!(
            s.heartbeat(),
            Err(FrameError::TransportTimeout {
                operation: "heartbeat"
            })
        ));
    }

    #[test]
    fn reset_expects_one() {
        let mut s = stream(b"\x01");
        assert!(s.reset().unwrap());
        assert_eq!(s.get_ref().written(), b"\x00");

        let mut s = stream(b"\xff");
        assert!(!s.reset().unwrap());
    }

    #[test]
    fn rpc_success_response() {
        let mut s = stream(b"\x00\x04\x05\x00\x00\x00\x06");
        let cmd = RpcCommand::new(11, 0x8000, vec![Value::Int(2), Value::Int(3)]);
        let resp = s.send_rpc(&cmd).unwrap();
        assert_eq!(resp, RpcResponse::Ok(Bytes::from_static(b"\x05\x00\x00\x00")));
        assert_eq!(s.get_ref().written(), b"rpc 11 128 0 2 3\n");
    }

    #[test]
    fn rpc_payload_may_contain_terminator_bytes() {
        let mut s = stream(b"\x00\x04\x06\x15\x06\x15\x06");
        let resp = s.send_rpc(&RpcCommand::new(11, 0x8000, vec![])).unwrap();
        assert_eq!(resp, RpcResponse::Ok(Bytes::from_static(b"\x06\x15\x06\x15")));
    }

    #[test]
    fn rpc_terminator_bytes_split_across_reads() {
        let mut transport = MemoryTransport::default();
        transport
            .push(&b"\x00\x03\x06"[..])
            .push(&b"\x15"[..])
            .push(&b"\x06\x06"[..])
            .push(&b"\x00\x01\x15\x06"[..]);
        let mut s = CommandStream::new(transport);

        let first = s.send_rpc(&RpcCommand::new(11, 0x8000, vec![])).unwrap();
        assert_eq!(first, RpcResponse::Ok(Bytes::from_static(b"\x06\x15\x06")));
        let second = s.send_rpc(&RpcCommand::new(11, 0x8000, vec![])).unwrap();
        assert_eq!(second, RpcResponse::Ok(Bytes::from_static(b"\x15")));
    }

    #[test]
    fn rpc_empty_success_response() {
        let mut s = stream(b"\x00\x00\x06");
        let resp = s.send_rpc(&RpcCommand::new(8, 0x0001, vec![])).unwrap();
        assert_eq!(resp, RpcResponse::Ok(Bytes::new()));
    }

    #[test]
    fn rpc_error_response_carries_message() {
        let mut s = stream(b"\xfeunsupported command\x15");
        let resp = s.send_rpc(&RpcCommand::new(8, 0x1234, vec![])).unwrap();
        assert_eq!(resp, RpcResponse::Error("unsupported command".to_string()));
    }

    #[test]
    fn rpc_reserved_status_is_rejected() {
        let mut s = stream(b"\x07\x06");
        assert!(matches!(
            s.send_rpc(&RpcCommand::new(8, 0x0004, vec![])),
            Err(FrameError::UnsupportedStatus(0x07))
        ));
    }

    #[test]
    fn rpc_ok_status_with_nack_is_error() {
        let mut s = stream(b"\x00\x00\x15");
        assert!(matches!(
            s.send_rpc(&RpcCommand::new(8, 0x0004, vec![])),
            Err(FrameError::Nack { .. })
        ));
    }

    #[test]
    fn rpc_truncated_payload_times_out() {
        let mut s = stream(b"\x00\x06\x01\x02");
        assert!(matches!(
            s.send_rpc(&RpcCommand::new(8, 0x0004, vec![])),
            Err(FrameError::TransportTimeout {
                operation: "rpc_payload"
            })
        ));
    }

    #[test]
    fn closed_transport_propagates() {
        let mut s = stream(b"");
        s.close().unwrap();
        assert!(matches!(
            s.send_command("x"),
            Err(FrameError::Transport(TransportError::Closed))
        ));
    }
}
