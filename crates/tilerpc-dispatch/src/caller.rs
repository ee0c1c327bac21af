use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tilerpc_format::{decode, encode, FormatString, Value};
use tilerpc_frame::{CommandStream, RpcCommand, RpcResponse};
use tilerpc_transport::ByteTransport;
use tracing::debug;

use crate::address::{RpcId, TileAddress};
use crate::engine::EngineHandle;
use crate::error::{Result, RpcError};

/// Rpc every tile answers with its 6-byte name.
pub const TILE_NAME_RPC: RpcId = RpcId(0x0004);

/// The capability to make one typed rpc call.
///
/// Implemented by [`EngineHandle`] for in-process tiles and by
/// [`StreamCaller`] for a device at the other end of a byte link.
pub trait RpcCaller {
    fn call(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        arg_format: &FormatString,
        result_format: &FormatString,
        args: &[Value],
    ) -> Result<Vec<Value>>;
}

impl RpcCaller for EngineHandle {
    fn call(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        arg_format: &FormatString,
        result_format: &FormatString,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        EngineHandle::call(self, address, rpc_id, arg_format, result_format, args)
    }
}

impl<C: RpcCaller + ?Sized> RpcCaller for &C {
    fn call(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        arg_format: &FormatString,
        result_format: &FormatString,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        (**self).call(address, rpc_id, arg_format, result_format, args)
    }
}

/// Calls a device over a framed byte link.
///
/// Arguments travel as text on the command line, so they are only encoded
/// locally to check them against `arg_format`. The result payload is decoded
/// with `result_format`; a status 254 answer becomes
/// [`RpcError::Protocol`].
pub struct StreamCaller<T> {
    stream: Mutex<CommandStream<T>>,
}

impl<T: ByteTransport> StreamCaller<T> {
    pub fn new(stream: CommandStream<T>) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    pub fn from_transport(transport: T) -> Self {
        Self::new(CommandStream::new(transport))
    }

    /// Send one rpc and return the raw result payload.
    pub fn call_raw(&self, address: TileAddress, rpc_id: RpcId, args: &[Value]) -> Result<Bytes> {
        let command = RpcCommand::new(address, rpc_id.get(), args.to_vec());
        let response = self.lock().send_rpc(&command)?;
        match response {
            RpcResponse::Ok(payload) => Ok(payload),
            RpcResponse::Error(message) => {
                debug!(address, rpc_id = %rpc_id, error = %message, "device returned error");
                Err(RpcError::Protocol(message))
            }
        }
    }

    pub fn heartbeat(&self) -> Result<bool> {
        Ok(self.lock().heartbeat()?)
    }

    pub fn reset(&self) -> Result<bool> {
        Ok(self.lock().reset()?)
    }

    pub fn into_inner(self) -> CommandStream<T> {
        self.stream
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CommandStream<T>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: ByteTransport> RpcCaller for StreamCaller<T> {
    fn call(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        arg_format: &FormatString,
        result_format: &FormatString,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        encode(arg_format, args)?;
        let payload = self.call_raw(address, rpc_id, args)?;
        Ok(decode(result_format, &payload)?)
    }
}

/// A tile seen through some caller.
///
/// Holds the caller rather than being one: the same proxy code drives an
/// emulated tile through an [`EngineHandle`] or a real one through a
/// [`StreamCaller`].
pub struct TileProxy<C> {
    caller: C,
    address: TileAddress,
}

impl<C: RpcCaller> TileProxy<C> {
    pub fn new(caller: C, address: TileAddress) -> Self {
        Self { caller, address }
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn caller(&self) -> &C {
        &self.caller
    }

    /// Call an rpc on this tile.
    pub fn rpc(
        &self,
        rpc_id: RpcId,
        arg_format: &str,
        result_format: &str,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        let arg_format = FormatString::parse(arg_format)?;
        let result_format = FormatString::parse(result_format)?;
        self.caller
            .call(self.address, rpc_id, &arg_format, &result_format, args)
    }

    /// The tile's 6-byte name.
    pub fn name(&self) -> Result<Bytes> {
        let mut values = self.rpc(TILE_NAME_RPC, "", "6s", &[])?;
        match values.pop() {
            Some(Value::Bytes(name)) => Ok(name),
            _ => Err(RpcError::Protocol("tile name was not a byte string".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tilerpc_transport::MemoryTransport;

    use super::*;

    fn caller(response: &'static [u8]) -> StreamCaller<MemoryTransport> {
        StreamCaller::from_transport(MemoryTransport::new(response))
    }

    #[test]
    fn stream_call_renders_line_and_decodes() {
        let link = caller(b"\x00\x04\x05\x00\x00\x00\x06");
        let result = RpcCaller::call(
            &link,
            11,
            RpcId(0x8000),
            &FormatString::parse("LL").unwrap(),
            &FormatString::parse("L").unwrap(),
            &[Value::Int(2), Value::Int(3)],
        )
        .unwrap();
        assert_eq!(result, vec![Value::Int(5)]);

        let stream = link.into_inner();
        assert_eq!(stream.get_ref().written(), b"rpc 11 128 0 2 3\n");
    }

    #[test]
    fn stream_call_checks_arguments_before_sending() {
        let link = caller(b"");
        let err = RpcCaller::call(
            &link,
            11,
            RpcId(0x8000),
            &FormatString::parse("B").unwrap(),
            &FormatString::empty(),
            &[Value::Int(300)],
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::Encoding(_)));
        assert!(link.into_inner().get_ref().written().is_empty());
    }

    #[test]
    fn status_254_is_protocol_error() {
        let link = caller(b"\xfemodule 11 busy\x15");
        let err = link.call_raw(11, RpcId(0x8002), &[]).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref msg) if msg == "module 11 busy"));
    }

    #[test]
    fn silent_link_is_transport_timeout() {
        let link = caller(b"");
        let err = link.call_raw(11, RpcId(0x8000), &[]).unwrap_err();
        assert!(matches!(err, RpcError::TransportTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn wrong_result_width_is_decoding_error() {
        let proxy = TileProxy::new(caller(b"\x00\x02ab\x06"), 8);
        assert!(matches!(proxy.name(), Err(RpcError::Decoding(_))));
    }

    #[test]
    fn proxy_name_over_stream() {
        let proxy = TileProxy::new(caller(b"\x00\x06ctrlr1\x06"), 8);
        assert_eq!(proxy.name().unwrap(), Bytes::from_static(b"ctrlr1"));
        assert_eq!(proxy.caller().lock().get_ref().written(), b"rpc 8 0 4\n");
    }
}
