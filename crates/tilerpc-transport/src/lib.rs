//! Byte-stream transports for tile RPC links.
//!
//! A transport moves raw bytes and nothing else: no framing, no notion of
//! commands or responses. The frame layer builds on the [`ByteTransport`]
//! trait defined here, so serial links, sockets and scripted test streams are
//! interchangeable.

pub mod error;
pub mod io;
pub mod memory;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use io::{ByteTransport, IoTransport};
pub use memory::MemoryTransport;
pub use tcp::TcpLink;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
