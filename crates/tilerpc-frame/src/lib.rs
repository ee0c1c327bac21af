//! Command/response framing for tile RPC links.
//!
//! Requests are newline-terminated ASCII command lines. Responses are raw
//! bytes closed by a one-byte terminator:
//! - `0x06` (ACK) when the command succeeded
//! - `0x15` (NACK) when it failed
//!
//! Two control bytes sit outside the line protocol: a heartbeat byte
//! (`0xFF`, echoed back) and a reset (`0x00`, answered with `0x01`).
//!
//! [`CommandStream`] is the host side of the link and [`FrameResponder`] the
//! device side; both work over any [`tilerpc_transport::ByteTransport`].

pub mod command;
pub mod config;
pub mod error;
pub mod responder;
pub mod stream;
pub mod terminator;

#[cfg(feature = "async")]
pub mod codec;

pub use command::{RpcCommand, RpcResponse, MAX_RPC_PAYLOAD, STATUS_ERROR, STATUS_OK};
pub use config::{FrameConfig, DEFAULT_MAX_FRAME_SIZE};
pub use error::{FrameError, Result};
pub use responder::{FrameResponder, Request};
pub use stream::CommandStream;
pub use terminator::{Terminator, HEARTBEAT, RESET, RESET_ACK};

#[cfg(feature = "async")]
pub use codec::TerminatorCodec;
