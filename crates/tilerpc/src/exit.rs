use std::fmt;
use std::io;

use tilerpc_dispatch::RpcError;
use tilerpc_frame::FrameError;
use tilerpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const BUSY: i32 = 75;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::Io(source) => io_error(context, source),
        FrameError::TransportTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::FrameTooLarge { .. } | FrameError::MalformedRequest(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Frame(err) => frame_error(context, err),
        RpcError::TransportTimeout { .. } | RpcError::CallTimeoutExpired { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        RpcError::ModuleBusy { .. } => CliError::new(BUSY, format!("{context}: {err}")),
        RpcError::Encoding(_) | RpcError::Decoding(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        RpcError::Format(_) => CliError::new(USAGE, format!("{context}: {err}")),
        RpcError::ModuleNotFound { .. }
        | RpcError::UnsupportedCommand { .. }
        | RpcError::Protocol(_)
        | RpcError::Handler { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tilerpc_dispatch::RpcId;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = rpc_error(
            "call failed",
            RpcError::CallTimeoutExpired {
                address: 11,
                rpc_id: RpcId(0x8002),
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("call failed: "));

        let err = rpc_error(
            "call failed",
            RpcError::from(FrameError::TransportTimeout { operation: "rpc" }),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn busy_and_data_errors() {
        assert_eq!(rpc_error("x", RpcError::ModuleBusy { address: 11 }).code, BUSY);
        let decode = tilerpc_format::decode(&tilerpc_format::FormatString::parse("L").unwrap(), b"")
            .unwrap_err();
        assert_eq!(rpc_error("x", RpcError::Decoding(decode)).code, DATA_INVALID);
    }

    #[test]
    fn closed_transport_is_transport_error() {
        let err = rpc_error("x", RpcError::from(TransportError::Closed));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn refused_connection_is_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                endpoint: "/tmp/missing.sock".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
