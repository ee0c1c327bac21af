use tilerpc_format::Value;

use crate::address::{RpcId, TileAddress};
use crate::engine::EngineHandle;
use crate::error::HandlerError;

/// A tile rpc handler.
///
/// Handlers run on the dispatch thread, one at a time. They receive the
/// decoded arguments and either answer immediately or defer.
pub type Handler = dyn Fn(&CallContext, &[Value]) -> Result<Reply, HandlerError> + Send + Sync;

/// What a handler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Result values, encoded with the rpc's declared result format.
    Values(Vec<Value>),
    /// The result will be delivered later through
    /// [`EngineHandle::finish_async_call`].
    Pending,
}

impl Reply {
    /// A reply with no result values.
    pub fn empty() -> Self {
        Reply::Values(Vec::new())
    }

    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Reply::Values(values.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Value>> for Reply {
    fn from(values: Vec<Value>) -> Self {
        Reply::Values(values)
    }
}

/// Names one specific call so its deferred result can be delivered.
///
/// The sequence number distinguishes successive calls to the same rpc; a
/// ticket only ever finishes the call it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncTicket {
    pub address: TileAddress,
    pub rpc_id: RpcId,
    pub seq: u64,
}

/// Per-call information passed to a handler.
pub struct CallContext {
    address: TileAddress,
    rpc_id: RpcId,
    seq: u64,
    handle: EngineHandle,
}

impl CallContext {
    pub(crate) fn new(address: TileAddress, rpc_id: RpcId, seq: u64, handle: EngineHandle) -> Self {
        Self {
            address,
            rpc_id,
            seq,
            handle,
        }
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn rpc_id(&self) -> RpcId {
        self.rpc_id
    }

    /// Ticket for finishing this call later, after returning
    /// [`Reply::Pending`].
    pub fn ticket(&self) -> AsyncTicket {
        AsyncTicket {
            address: self.address,
            rpc_id: self.rpc_id,
            seq: self.seq,
        }
    }

    /// Handle to the engine running this call.
    ///
    /// Blocking calls through it are refused while still on the dispatch
    /// thread; clone it into another thread to issue nested calls or finish
    /// a deferred one.
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_builders() {
        assert_eq!(Reply::empty(), Reply::Values(vec![]));
        assert_eq!(
            Reply::values([5u32]),
            Reply::Values(vec![Value::Int(5)])
        );
        assert_eq!(
            Reply::from(vec![Value::from("ab")]),
            Reply::Values(vec![Value::from(&b"ab"[..])])
        );
    }
}
