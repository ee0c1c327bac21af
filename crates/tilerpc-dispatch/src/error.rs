use std::fmt;
use std::time::Duration;

use tilerpc_format::{DecodingError, EncodingError, FormatError};
use tilerpc_frame::FrameError;

use crate::address::{RpcId, TileAddress};

/// Errors that can occur while routing, running or completing a call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No tile is registered at the address.
    #[error("no module at address {address}")]
    ModuleNotFound { address: TileAddress },

    /// The tile exists but does not handle this rpc id.
    #[error("module {address} does not support rpc {rpc_id}")]
    UnsupportedCommand { address: TileAddress, rpc_id: RpcId },

    /// The tile still has a deferred call outstanding.
    #[error("module {address} busy")]
    ModuleBusy { address: TileAddress },

    /// Arguments or results do not fit the declared format.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// A payload does not match the declared format's width.
    #[error(transparent)]
    Decoding(#[from] DecodingError),

    /// No terminator arrived on the physical link before the read timeout.
    #[error("transport timeout during {operation}")]
    TransportTimeout { operation: &'static str },

    /// The call's deadline elapsed before it resolved.
    #[error("rpc {rpc_id} on module {address} timed out after {timeout:?}")]
    CallTimeoutExpired {
        address: TileAddress,
        rpc_id: RpcId,
        timeout: Duration,
    },

    /// The device answered with an explicit error (status 254).
    #[error("device error: {0}")]
    Protocol(String),

    /// The handler itself failed.
    #[error("rpc {rpc_id} on module {address} failed: {source}")]
    Handler {
        address: TileAddress,
        rpc_id: RpcId,
        #[source]
        source: HandlerError,
    },

    /// The rpc id is already registered on that tile.
    #[error("rpc {rpc_id} already registered on module {address}")]
    DuplicateHandler { address: TileAddress, rpc_id: RpcId },

    /// A second tile was declared at an address already in use.
    #[error("a module is already registered at address {address}")]
    DuplicateTile { address: TileAddress },

    /// A format declaration could not be parsed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Any other framing failure on the physical link.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// A dispatch or worker thread could not be started.
    #[error("failed to start {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },

    /// The dispatch engine has shut down.
    #[error("dispatch engine stopped")]
    EngineStopped,

    /// A blocking engine call was made from the dispatch thread itself.
    #[error("blocking engine call made from the dispatch thread")]
    WrongContext,

    /// A completion named a call that is not pending.
    #[error("no pending call for rpc {rpc_id} on module {address}")]
    NoPendingCall { address: TileAddress, rpc_id: RpcId },

    /// A completion arrived for a call that already timed out.
    #[error("stray completion for rpc {rpc_id} on module {address} (call {seq} timed out)")]
    StrayCompletion {
        address: TileAddress,
        rpc_id: RpcId,
        seq: u64,
    },
}

impl RpcError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::ModuleBusy { .. } | RpcError::TransportTimeout { .. }
        )
    }

    /// Whether the error is a timeout of either kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RpcError::TransportTimeout { .. } | RpcError::CallTimeoutExpired { .. }
        )
    }
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TransportTimeout { operation } => RpcError::TransportTimeout { operation },
            other => RpcError::Frame(other),
        }
    }
}

impl From<tilerpc_transport::TransportError> for RpcError {
    fn from(err: tilerpc_transport::TransportError) -> Self {
        RpcError::Frame(FrameError::Transport(err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// How a handler failure is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// The arguments were unacceptable.
    Validation,
    /// The handler broke while running.
    Internal,
}

impl fmt::Display for HandlerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerErrorKind::Validation => f.write_str("validation"),
            HandlerErrorKind::Internal => f.write_str("internal"),
        }
    }
}

/// Error returned by a tile handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: HandlerErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: HandlerErrorKind::Internal,
            message: message.into(),
        }
    }
}
