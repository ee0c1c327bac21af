use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tilerpc_format::{FormatString, Value};

use crate::address::{RpcId, TileAddress};
use crate::error::{HandlerError, Result, RpcError};
use crate::handler::{CallContext, Handler, Reply};
use crate::worker::Worker;

/// A registered rpc: its handler plus declared argument and result layouts.
#[derive(Clone)]
pub struct RpcEntry {
    pub handler: Arc<Handler>,
    pub arg_format: FormatString,
    pub result_format: FormatString,
}

impl fmt::Debug for RpcEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEntry")
            .field("arg_format", &self.arg_format)
            .field("result_format", &self.result_format)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct TileTable {
    name: String,
    entries: HashMap<RpcId, RpcEntry>,
}

/// Maps `(address, rpc id)` to the handler that serves it.
///
/// Built before the device starts and read-only afterwards.
#[derive(Debug, Default)]
pub struct Router {
    tiles: HashMap<TileAddress, TileTable>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one handler. Re-registering the same pair is an error.
    pub fn register(
        &mut self,
        address: TileAddress,
        rpc_id: RpcId,
        handler: Arc<Handler>,
        arg_format: FormatString,
        result_format: FormatString,
    ) -> Result<()> {
        let table = self.tiles.entry(address).or_default();
        if table.entries.contains_key(&rpc_id) {
            return Err(RpcError::DuplicateHandler { address, rpc_id });
        }
        table.entries.insert(
            rpc_id,
            RpcEntry {
                handler,
                arg_format,
                result_format,
            },
        );
        Ok(())
    }

    /// Add every rpc of a tile, returning its workers.
    pub fn add_tile(&mut self, tile: Tile) -> Result<Vec<Worker>> {
        if self.tiles.contains_key(&tile.address) {
            return Err(RpcError::DuplicateTile {
                address: tile.address,
            });
        }
        self.tiles.insert(
            tile.address,
            TileTable {
                name: tile.name,
                entries: tile.entries,
            },
        );
        Ok(tile.workers)
    }

    /// Resolve a handler, distinguishing a missing tile from a missing rpc.
    pub fn lookup(&self, address: TileAddress, rpc_id: RpcId) -> Result<&RpcEntry> {
        let table = self
            .tiles
            .get(&address)
            .ok_or(RpcError::ModuleNotFound { address })?;
        table
            .entries
            .get(&rpc_id)
            .ok_or(RpcError::UnsupportedCommand { address, rpc_id })
    }

    pub fn contains(&self, address: TileAddress) -> bool {
        self.tiles.contains_key(&address)
    }

    pub fn tile_name(&self, address: TileAddress) -> Option<&str> {
        self.tiles.get(&address).map(|table| table.name.as_str())
    }

    /// Registered addresses in ascending order.
    pub fn addresses(&self) -> Vec<TileAddress> {
        let mut addresses: Vec<_> = self.tiles.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Rpc ids registered on a tile, in ascending order.
    pub fn rpc_ids(&self, address: TileAddress) -> Vec<RpcId> {
        let mut ids: Vec<_> = self
            .tiles
            .get(&address)
            .map(|table| table.entries.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

/// Builder for one tile's handler table and workers.
///
/// ```
/// use tilerpc_dispatch::{Reply, RpcId, Tile};
///
/// let tile = Tile::new(11, "adder")
///     .rpc(RpcId(0x8000), "LL", "L", |_ctx, args| {
///         let sum = args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0);
///         Ok(Reply::values([sum]))
///     })
///     .unwrap();
/// assert_eq!(tile.address(), 11);
/// ```
pub struct Tile {
    address: TileAddress,
    name: String,
    entries: HashMap<RpcId, RpcEntry>,
    workers: Vec<Worker>,
}

impl Tile {
    pub fn new(address: TileAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            entries: HashMap::new(),
            workers: Vec::new(),
        }
    }

    /// Declare an rpc with its argument and result formats.
    pub fn rpc<F>(
        mut self,
        rpc_id: RpcId,
        arg_format: &str,
        result_format: &str,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(&CallContext, &[Value]) -> std::result::Result<Reply, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        if self.entries.contains_key(&rpc_id) {
            return Err(RpcError::DuplicateHandler {
                address: self.address,
                rpc_id,
            });
        }
        let entry = RpcEntry {
            handler: Arc::new(handler),
            arg_format: FormatString::parse(arg_format)?,
            result_format: FormatString::parse(result_format)?,
        };
        self.entries.insert(rpc_id, entry);
        Ok(self)
    }

    /// Attach a background worker, started with the device.
    pub fn worker(mut self, worker: Worker) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("rpcs", &self.entries.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}
