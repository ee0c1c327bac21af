//! Call routing and lifecycle management for addressable tiles.
//!
//! A [`Device`] owns a set of [`Tile`]s and one dispatch thread. Every call
//! goes through an [`EngineHandle`]: the router resolves `(address, rpc id)`
//! to a handler, the dispatch thread runs it, and the caller blocks until
//! the call completes, fails, is rejected as busy, or times out.
//!
//! Handlers may defer their result by returning [`Reply::Pending`]; the
//! deferred call is finished later with [`EngineHandle::finish_async_call`]
//! using the [`AsyncTicket`] from the call's [`CallContext`]. A tile has at
//! most one deferred call outstanding; anything else sent to it meanwhile is
//! rejected with [`RpcError::ModuleBusy`].
//!
//! A call that times out clears its tile's busy flag. Its ticket is
//! disowned, and a completion arriving afterwards is reported as
//! [`RpcError::StrayCompletion`] instead of resolving anything.

pub mod address;
pub mod caller;
pub mod engine;
pub mod error;
pub mod handler;
pub mod record;
pub mod router;
pub mod server;
pub mod worker;

pub use address::{RpcId, TileAddress, CONTROLLER_ADDRESS};
pub use caller::{RpcCaller, StreamCaller, TileProxy, TILE_NAME_RPC};
pub use engine::{Device, EngineConfig, EngineHandle, EngineStats};
pub use error::{HandlerError, HandlerErrorKind, Result, RpcError};
pub use handler::{AsyncTicket, CallContext, Handler, Reply};
pub use record::{CallRecord, CallStatus};
pub use router::{Router, RpcEntry, Tile};
pub use server::WireServer;
pub use worker::{Worker, WorkerContext};
