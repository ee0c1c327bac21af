use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tilerpc_format::{decode, encode, FormatString, Value};
use tracing::{debug, error, info, trace, warn};

use crate::address::{RpcId, TileAddress};
use crate::error::{HandlerError, Result, RpcError};
use crate::handler::{AsyncTicket, CallContext, Reply};
use crate::record::{CallRecord, CallStatus};
use crate::router::{Router, Tile};
use crate::worker::ShutdownSignal;

/// Default deadline for calls that do not name one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of timed-out call tickets remembered for stray detection.
pub const DEFAULT_DISOWNED_CAPACITY: usize = 256;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline applied by [`EngineHandle::call`] and
    /// [`EngineHandle::invoke`].
    pub default_timeout: Duration,
    /// How many timed-out tickets to remember. Older ones are forgotten and
    /// their completions reported as [`RpcError::NoPendingCall`].
    pub disowned_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_CALL_TIMEOUT,
            disowned_capacity: DEFAULT_DISOWNED_CAPACITY,
        }
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub issued: u64,
    pub completed: u64,
    pub failed: u64,
    pub busy: u64,
    pub timed_out: u64,
    pub stray: u64,
}

#[derive(Debug, Default)]
struct Counters {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    busy: AtomicU64,
    timed_out: AtomicU64,
    stray: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            issued: self.issued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            stray: self.stray.load(Ordering::Relaxed),
        }
    }
}

type CallReply = Sender<Result<Bytes>>;

enum EngineCommand {
    Call {
        record: CallRecord,
        timeout: Duration,
        reply: CallReply,
    },
    Finish {
        ticket: AsyncTicket,
        outcome: std::result::Result<Bytes, HandlerError>,
        ack: Sender<Result<()>>,
    },
    Expire {
        address: TileAddress,
        seq: u64,
    },
    IsBusy {
        address: TileAddress,
        reply: Sender<bool>,
    },
    Shutdown,
}

/// Cloneable handle for issuing and finishing calls.
///
/// Every blocking method refuses to run on the dispatch thread itself, since
/// waiting there would stall the engine it is waiting on.
#[derive(Clone)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    router: Arc<Router>,
    counters: Arc<Counters>,
    next_seq: Arc<AtomicU64>,
    dispatch_thread: ThreadId,
    default_timeout: Duration,
}

impl EngineHandle {
    /// Call with caller-side formats and the default deadline.
    ///
    /// Arguments are encoded with `arg_format`; the result payload is
    /// decoded with `result_format`.
    pub fn call(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        arg_format: &FormatString,
        result_format: &FormatString,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        self.call_with_timeout(
            address,
            rpc_id,
            arg_format,
            result_format,
            args,
            self.default_timeout,
        )
    }

    pub fn call_with_timeout(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        arg_format: &FormatString,
        result_format: &FormatString,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let payload = encode(arg_format, args)?;
        let result = self.call_raw(address, rpc_id, payload, timeout)?;
        Ok(decode(result_format, &result)?)
    }

    /// Call using the formats the tile declared for this rpc.
    pub fn invoke(&self, address: TileAddress, rpc_id: RpcId, args: &[Value]) -> Result<Vec<Value>> {
        self.invoke_with_timeout(address, rpc_id, args, self.default_timeout)
    }

    pub fn invoke_with_timeout(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let (arg_format, result_format) = self.declared_formats(address, rpc_id)?;
        self.call_with_timeout(address, rpc_id, &arg_format, &result_format, args, timeout)
    }

    /// Declared `(argument, result)` formats of a registered rpc.
    pub fn declared_formats(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
    ) -> Result<(FormatString, FormatString)> {
        let entry = self.router.lookup(address, rpc_id)?;
        Ok((entry.arg_format.clone(), entry.result_format.clone()))
    }

    /// Send an encoded payload and wait for the encoded result.
    ///
    /// Router failures return without touching the engine. Busy rejections
    /// are decided on the dispatch thread, so they return as soon as the
    /// engine reaches the call, which may be after a long synchronous
    /// handler on another tile. A deadline that elapses first yields
    /// [`RpcError::CallTimeoutExpired`] and clears the tile's busy flag.
    ///
    /// The engine also checks the deadline itself: a result produced at or
    /// after it is never delivered as a success, so a call cannot both time
    /// out here and count as completed.
    pub fn call_raw(
        &self,
        address: TileAddress,
        rpc_id: RpcId,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        self.ensure_caller_context()?;
        Counters::bump(&self.counters.issued);

        if let Err(err) = self.router.lookup(address, rpc_id) {
            Counters::bump(&self.counters.failed);
            debug!(address, rpc_id = %rpc_id, error = %err, "routing failed");
            return Err(err);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let record = CallRecord::new(seq, address, rpc_id, payload, Instant::now() + timeout);
        trace!(address, rpc_id = %rpc_id, seq, "call issued");

        let (reply, replies) = mpsc::channel();
        self.commands
            .send(EngineCommand::Call {
                record,
                timeout,
                reply,
            })
            .map_err(|_| RpcError::EngineStopped)?;

        let result = match replies.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => match replies.try_recv() {
                Ok(result) => result,
                Err(_) => {
                    debug!(address, rpc_id = %rpc_id, seq, ?timeout, "call deadline elapsed");
                    // Engine gone means nothing is left to expire.
                    let _ = self.commands.send(EngineCommand::Expire { address, seq });
                    Err(RpcError::CallTimeoutExpired {
                        address,
                        rpc_id,
                        timeout,
                    })
                }
            },
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::EngineStopped),
        };
        if matches!(result, Err(RpcError::CallTimeoutExpired { .. })) {
            Counters::bump(&self.counters.timed_out);
        }
        result
    }

    /// Deliver the result of a deferred call.
    pub fn finish_async_call(&self, ticket: AsyncTicket, result: impl Into<Bytes>) -> Result<()> {
        self.finish(ticket, Ok(result.into()))
    }

    /// Fail a deferred call.
    pub fn finish_async_error(&self, ticket: AsyncTicket, error: HandlerError) -> Result<()> {
        self.finish(ticket, Err(error))
    }

    fn finish(
        &self,
        ticket: AsyncTicket,
        outcome: std::result::Result<Bytes, HandlerError>,
    ) -> Result<()> {
        self.ensure_caller_context()?;
        let (ack, acks) = mpsc::channel();
        self.commands
            .send(EngineCommand::Finish {
                ticket,
                outcome,
                ack,
            })
            .map_err(|_| RpcError::EngineStopped)?;
        acks.recv().map_err(|_| RpcError::EngineStopped)?
    }

    /// Whether the tile has a deferred call outstanding.
    pub fn is_tile_busy(&self, address: TileAddress) -> Result<bool> {
        self.ensure_caller_context()?;
        let (reply, replies) = mpsc::channel();
        self.commands
            .send(EngineCommand::IsBusy { address, reply })
            .map_err(|_| RpcError::EngineStopped)?;
        replies.recv().map_err(|_| RpcError::EngineStopped)
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn ensure_caller_context(&self) -> Result<()> {
        if thread::current().id() == self.dispatch_thread {
            Err(RpcError::WrongContext)
        } else {
            Ok(())
        }
    }
}

struct PendingCall {
    record: CallRecord,
    timeout: Duration,
    reply: CallReply,
}

struct Engine {
    router: Arc<Router>,
    counters: Arc<Counters>,
    handle: EngineHandle,
    pending: HashMap<TileAddress, PendingCall>,
    disowned: VecDeque<u64>,
    disowned_capacity: usize,
}

impl Engine {
    fn run(mut self, commands: Receiver<EngineCommand>) {
        debug!("dispatch engine started");
        while let Ok(command) = commands.recv() {
            match command {
                EngineCommand::Call {
                    record,
                    timeout,
                    reply,
                } => self.dispatch(record, timeout, reply),
                EngineCommand::Finish {
                    ticket,
                    outcome,
                    ack,
                } => {
                    let result = self.complete(ticket, outcome);
                    let _ = ack.send(result);
                }
                EngineCommand::Expire { address, seq } => self.expire(address, seq),
                EngineCommand::IsBusy { address, reply } => {
                    let _ = reply.send(self.pending.contains_key(&address));
                }
                EngineCommand::Shutdown => break,
            }
        }
        self.stop_pending();
        debug!("dispatch engine stopped");
    }

    fn dispatch(&mut self, mut record: CallRecord, timeout: Duration, reply: CallReply) {
        let (address, rpc_id, seq) = (record.address, record.rpc_id, record.seq);

        if record.is_expired(Instant::now()) {
            debug!(address, rpc_id = %rpc_id, seq, "call expired before it ran");
            time_out(&mut record, timeout, reply);
            return;
        }

        let expired_pending = self
            .pending
            .get(&address)
            .is_some_and(|call| call.record.is_expired(Instant::now()));
        if expired_pending {
            if let Some(PendingCall {
                mut record,
                timeout,
                reply,
            }) = self.pending.remove(&address)
            {
                warn!(
                    address,
                    rpc_id = %record.rpc_id,
                    seq = record.seq,
                    "deferred call passed its deadline; tile no longer busy"
                );
                self.disown(record.seq);
                time_out(&mut record, timeout, reply);
            }
        }

        if self.pending.contains_key(&address) {
            record.advance(CallStatus::Busy);
            Counters::bump(&self.counters.busy);
            debug!(address, rpc_id = %rpc_id, seq, "tile busy");
            let _ = reply.send(Err(RpcError::ModuleBusy { address }));
            return;
        }

        let entry = match self.router.lookup(address, rpc_id) {
            Ok(entry) => entry.clone(),
            Err(err) => {
                record.advance(CallStatus::Failed);
                Counters::bump(&self.counters.failed);
                let _ = reply.send(Err(err));
                return;
            }
        };

        record.advance(CallStatus::Running);
        let ctx = CallContext::new(address, rpc_id, seq, self.handle.clone());
        let outcome = decode(&entry.arg_format, &record.payload)
            .map_err(|err| HandlerError::validation(err.to_string()))
            .and_then(|args| invoke_handler(&entry, &ctx, &args));

        if !matches!(outcome, Ok(Reply::Pending)) && record.is_expired(Instant::now()) {
            warn!(
                address,
                rpc_id = %rpc_id,
                seq,
                "handler finished after the deadline; discarding result"
            );
            time_out(&mut record, timeout, reply);
            return;
        }

        match outcome {
            Ok(Reply::Values(values)) => {
                let result = encode(&entry.result_format, &values).map_err(|err| {
                    HandlerError::internal(format!("result does not fit declared format: {err}"))
                });
                match result {
                    Ok(bytes) => {
                        record.advance(CallStatus::Completed);
                        Counters::bump(&self.counters.completed);
                        trace!(address, rpc_id = %rpc_id, seq, "call completed");
                        self.deliver(&record, reply, Ok(bytes));
                    }
                    Err(source) => self.fail(&mut record, reply, source),
                }
            }
            Ok(Reply::Pending) => {
                debug!(address, rpc_id = %rpc_id, seq, "call deferred");
                self.pending.insert(
                    address,
                    PendingCall {
                        record,
                        timeout,
                        reply,
                    },
                );
            }
            Err(source) => self.fail(&mut record, reply, source),
        }
    }

    fn fail(&self, record: &mut CallRecord, reply: CallReply, source: HandlerError) {
        record.advance(CallStatus::Failed);
        Counters::bump(&self.counters.failed);
        debug!(
            address = record.address,
            rpc_id = %record.rpc_id,
            seq = record.seq,
            kind = %source.kind,
            error = %source.message,
            "handler failed"
        );
        let err = RpcError::Handler {
            address: record.address,
            rpc_id: record.rpc_id,
            source,
        };
        self.deliver(record, reply, Err(err));
    }

    fn deliver(&self, record: &CallRecord, reply: CallReply, result: Result<Bytes>) {
        if reply.send(result).is_err() {
            warn!(
                address = record.address,
                rpc_id = %record.rpc_id,
                seq = record.seq,
                "caller gave up; discarding late result"
            );
        }
    }

    fn complete(
        &mut self,
        ticket: AsyncTicket,
        outcome: std::result::Result<Bytes, HandlerError>,
    ) -> Result<()> {
        let AsyncTicket {
            address,
            rpc_id,
            seq,
        } = ticket;

        let matches = self
            .pending
            .get(&address)
            .is_some_and(|call| call.record.seq == seq && call.record.rpc_id == rpc_id);

        if matches {
            if let Some(PendingCall {
                mut record,
                timeout,
                reply,
            }) = self.pending.remove(&address)
            {
                if record.is_expired(Instant::now()) {
                    Counters::bump(&self.counters.stray);
                    warn!(
                        address,
                        rpc_id = %rpc_id,
                        seq,
                        "discarding completion that arrived after the deadline"
                    );
                    self.disown(seq);
                    time_out(&mut record, timeout, reply);
                    return Err(RpcError::StrayCompletion {
                        address,
                        rpc_id,
                        seq,
                    });
                }
                match outcome {
                    Ok(bytes) => {
                        record.advance(CallStatus::Completed);
                        Counters::bump(&self.counters.completed);
                        debug!(address, rpc_id = %rpc_id, seq, "deferred call completed");
                        self.deliver(&record, reply, Ok(bytes));
                    }
                    Err(source) => self.fail(&mut record, reply, source),
                }
            }
            return Ok(());
        }

        if self.disowned.contains(&seq) {
            Counters::bump(&self.counters.stray);
            warn!(
                address,
                rpc_id = %rpc_id,
                seq,
                "discarding completion for a call that already timed out"
            );
            return Err(RpcError::StrayCompletion {
                address,
                rpc_id,
                seq,
            });
        }

        error!(
            address,
            rpc_id = %rpc_id,
            seq,
            "completion does not match any pending call"
        );
        Err(RpcError::NoPendingCall { address, rpc_id })
    }

    fn expire(&mut self, address: TileAddress, seq: u64) {
        let matches = self
            .pending
            .get(&address)
            .is_some_and(|call| call.record.seq == seq);
        if !matches {
            trace!(address, seq, "expired call was not pending");
            return;
        }
        if let Some(PendingCall { mut record, .. }) = self.pending.remove(&address) {
            record.advance(CallStatus::TimedOut);
            warn!(
                address,
                rpc_id = %record.rpc_id,
                seq,
                "deferred call timed out; tile no longer busy"
            );
            self.disown(seq);
        }
    }

    fn disown(&mut self, seq: u64) {
        if self.disowned_capacity == 0 {
            return;
        }
        if self.disowned.len() == self.disowned_capacity {
            self.disowned.pop_front();
        }
        self.disowned.push_back(seq);
    }

    fn stop_pending(&mut self) {
        for (_, PendingCall { mut record, reply, .. }) in self.pending.drain() {
            record.advance(CallStatus::Failed);
            let _ = reply.send(Err(RpcError::EngineStopped));
        }
    }
}

/// Resolve a call whose deadline has passed. The caller may already be
/// gone, in which case the send fails quietly.
fn time_out(record: &mut CallRecord, timeout: Duration, reply: CallReply) {
    record.advance(CallStatus::TimedOut);
    let _ = reply.send(Err(RpcError::CallTimeoutExpired {
        address: record.address,
        rpc_id: record.rpc_id,
        timeout,
    }));
}

fn invoke_handler(
    entry: &crate::router::RpcEntry,
    ctx: &CallContext,
    args: &[Value],
) -> std::result::Result<Reply, HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(ctx, args))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            error!(
                address = ctx.address(),
                rpc_id = %ctx.rpc_id(),
                panic = %message,
                "handler panicked"
            );
            Err(HandlerError::internal(format!("handler panicked: {message}")))
        }
    }
}

/// A running device: tiles, their workers, and the dispatch thread.
pub struct Device {
    handle: EngineHandle,
    dispatch: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<ShutdownSignal>,
}

impl Device {
    /// Build the router from `tiles`, start the dispatch thread, then start
    /// every tile's workers.
    pub fn start(tiles: impl IntoIterator<Item = Tile>, config: EngineConfig) -> Result<Self> {
        let mut router = Router::new();
        let mut workers = Vec::new();
        for tile in tiles {
            let address = tile.address();
            for worker in router.add_tile(tile)? {
                workers.push((address, worker));
            }
        }
        let router = Arc::new(router);
        let counters = Arc::new(Counters::default());
        let (commands, inbox) = mpsc::channel();

        // The engine needs a handle for call contexts, and the handle needs
        // the engine's thread id; hand the handle over once it exists.
        let (handle_tx, handle_rx) = mpsc::channel::<EngineHandle>();
        let engine_router = Arc::clone(&router);
        let engine_counters = Arc::clone(&counters);
        let disowned_capacity = config.disowned_capacity;
        let dispatch = thread::Builder::new()
            .name("tilerpc-dispatch".to_string())
            .spawn(move || {
                let Ok(handle) = handle_rx.recv() else {
                    return;
                };
                Engine {
                    router: engine_router,
                    counters: engine_counters,
                    handle,
                    pending: HashMap::new(),
                    disowned: VecDeque::with_capacity(disowned_capacity),
                    disowned_capacity,
                }
                .run(inbox);
            })
            .map_err(|source| RpcError::Spawn {
                what: "dispatch thread".to_string(),
                source,
            })?;

        let handle = EngineHandle {
            commands,
            router,
            counters,
            next_seq: Arc::new(AtomicU64::new(1)),
            dispatch_thread: dispatch.thread().id(),
            default_timeout: config.default_timeout,
        };
        handle_tx
            .send(handle.clone())
            .map_err(|_| RpcError::EngineStopped)?;

        let mut device = Self {
            handle,
            dispatch: Some(dispatch),
            workers: Vec::new(),
            shutdown: Arc::new(ShutdownSignal::default()),
        };

        for (address, worker) in workers {
            let what = format!("worker {} on tile {address}", worker.name());
            match worker.spawn(address, device.handle.clone(), Arc::clone(&device.shutdown)) {
                Ok(thread) => device.workers.push(thread),
                Err(source) => {
                    device.shutdown();
                    return Err(RpcError::Spawn { what, source });
                }
            }
        }

        info!(
            tiles = device.handle.router().addresses().len(),
            workers = device.workers.len(),
            "device started"
        );
        Ok(device)
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn router(&self) -> &Router {
        self.handle.router()
    }

    /// Stop workers, resolve deferred calls with
    /// [`RpcError::EngineStopped`], and join every thread.
    pub fn shutdown(&mut self) {
        let Some(dispatch) = self.dispatch.take() else {
            return;
        };
        self.shutdown.set();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        let _ = self.handle.commands.send(EngineCommand::Shutdown);
        if dispatch.join().is_err() {
            error!("dispatch thread panicked");
        }
        debug!(stats = ?self.handle.stats(), "device stopped");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}
