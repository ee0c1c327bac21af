use std::path::PathBuf;

/// Failures of a tile link below the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A device socket could not be created at `path`.
    #[error("cannot listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No device answered at `endpoint` (socket path or `host:port`).
    #[error("cannot reach device at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("accepting a device link failed: {0}")]
    Accept(std::io::Error),

    /// Reading or writing link bytes failed.
    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// `sun_path` cannot hold the requested socket path.
    #[error("socket path is {len} bytes, platform limit is {max}: {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The peer hung up, or the link was closed locally.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
