//! Binary RPC for small addressable hardware tiles.
//!
//! A host talks to tiles over any byte stream (serial bridge, socket) with
//! newline-terminated command lines and terminator-delimited responses. The
//! same tiles can run in process, behind a dispatch engine that enforces the
//! busy, deferred-completion and timeout rules a real device would.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte transports (Unix sockets, TCP, scripted memory)
//! - [`format`]: format strings and the argument/result codec
//! - [`frame`]: command/response framing, heartbeat and reset
//! - [`dispatch`]: router, dispatch engine, workers, callers (behind the
//!   `dispatch` feature, on by default)

/// Re-export transport types.
pub mod transport {
    pub use tilerpc_transport::*;
}

/// Re-export format types.
pub mod format {
    pub use tilerpc_format::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tilerpc_frame::*;
}

/// Re-export dispatch types (requires `dispatch` feature).
#[cfg(feature = "dispatch")]
pub mod dispatch {
    pub use tilerpc_dispatch::*;
}
