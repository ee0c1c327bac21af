use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tilerpc_format::encode;
use tilerpc_frame::{
    FrameError, FrameResponder, Request, RpcCommand, Terminator, MAX_RPC_PAYLOAD,
};
use tilerpc_transport::{ByteTransport, TransportError};
use tracing::{debug, info, warn};

use crate::address::RpcId;
use crate::engine::EngineHandle;
use crate::error::{Result, RpcError};

/// Serves the frame protocol from an engine, so a physical-path client can
/// talk to emulated tiles.
///
/// Every failure, busy included, goes back as a status 254 response whose
/// message is the error's display text.
pub struct WireServer {
    handle: EngineHandle,
    call_timeout: Duration,
}

impl WireServer {
    pub fn new(handle: EngineHandle) -> Self {
        let call_timeout = handle.default_timeout();
        Self {
            handle,
            call_timeout,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Answer one request.
    ///
    /// Returns `Ok(false)` when the link was idle for a read timeout.
    pub fn serve_one<T: ByteTransport>(&self, responder: &mut FrameResponder<T>) -> Result<bool> {
        let request = match responder.read_request() {
            Ok(request) => request,
            Err(err) if err.is_timeout() => return Ok(false),
            Err(FrameError::MalformedRequest(message)) => {
                responder.write_frame(message.as_bytes(), Terminator::Nack)?;
                return Ok(true);
            }
            Err(err) => return Err(err.into()),
        };

        match request {
            Request::Heartbeat => responder.write_heartbeat()?,
            Request::Reset => {
                debug!("link reset");
                responder.write_reset_ack()?;
            }
            Request::Line(line) if is_rpc_line(&line) => match self.answer(&line) {
                Ok(payload) if payload.len() > MAX_RPC_PAYLOAD => {
                    warn!(line = %line, len = payload.len(), "result too large for the wire");
                    responder.write_rpc_error(&format!(
                        "result of {} bytes exceeds the {MAX_RPC_PAYLOAD} byte response limit",
                        payload.len()
                    ))?;
                }
                Ok(payload) => responder.write_rpc_ok(&payload)?,
                Err(err) => {
                    debug!(line = %line, error = %err, "rpc failed");
                    responder.write_rpc_error(&err.to_string())?;
                }
            },
            Request::Line(line) => {
                debug!(line = %line, "unknown command");
                responder.write_frame(b"unknown command", Terminator::Nack)?;
            }
        }
        Ok(true)
    }

    /// Serve requests until the peer closes the link or `stop` is set.
    pub fn serve<T: ByteTransport>(&self, transport: T, stop: &AtomicBool) -> Result<()> {
        let mut responder = FrameResponder::new(transport);
        while !stop.load(Ordering::Relaxed) {
            match self.serve_one(&mut responder) {
                Ok(_) => {}
                Err(RpcError::Frame(FrameError::Transport(TransportError::Closed))) => {
                    info!("peer closed link");
                    return Ok(());
                }
                Err(RpcError::Frame(FrameError::FrameTooLarge { size, max })) => {
                    warn!(size, max, "dropping oversized request");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn answer(&self, line: &str) -> Result<Bytes> {
        let command = RpcCommand::parse(line)?;
        let rpc_id = RpcId::from_parts(command.feature, command.command);
        let (arg_format, _) = self.handle.declared_formats(command.address, rpc_id)?;
        let payload = encode(&arg_format, &command.args)?;
        self.handle
            .call_raw(command.address, rpc_id, payload, self.call_timeout)
    }
}

fn is_rpc_line(line: &str) -> bool {
    line.split_ascii_whitespace().next() == Some("rpc")
}
