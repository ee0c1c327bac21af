use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::address::TileAddress;
use crate::engine::EngineHandle;
use crate::error::RpcError;

type Task = Box<dyn FnMut(&WorkerContext) -> Result<(), RpcError> + Send>;

enum Schedule {
    Periodic(Duration),
    Background,
}

/// A task owned by a tile that runs beside the dispatch thread.
///
/// Workers talk to the engine only through its handle, so calls they make
/// obey the same busy and timeout rules as any external call.
pub struct Worker {
    name: String,
    schedule: Schedule,
    task: Task,
}

impl Worker {
    /// Run `task` every `interval` until the device shuts down.
    ///
    /// The first run happens one interval after start.
    pub fn periodic<F>(name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: FnMut(&WorkerContext) -> Result<(), RpcError> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule: Schedule::Periodic(interval),
            task: Box::new(task),
        }
    }

    /// Run `task` once on its own thread. Long-running tasks should poll
    /// [`WorkerContext::sleep`] or [`WorkerContext::is_shutdown`].
    pub fn background<F>(name: impl Into<String>, task: F) -> Self
    where
        F: FnMut(&WorkerContext) -> Result<(), RpcError> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule: Schedule::Background,
            task: Box::new(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn spawn(
        self,
        address: TileAddress,
        handle: EngineHandle,
        shutdown: Arc<ShutdownSignal>,
    ) -> std::io::Result<JoinHandle<()>> {
        let Worker {
            name,
            schedule,
            mut task,
        } = self;
        let ctx = WorkerContext {
            handle,
            address,
            name,
            shutdown,
        };
        thread::Builder::new()
            .name(format!("tile-{address}-{}", ctx.name))
            .spawn(move || {
                debug!(address, worker = %ctx.name, "worker started");
                match schedule {
                    Schedule::Periodic(interval) => {
                        while ctx.sleep(interval) {
                            ctx.run(&mut task);
                        }
                    }
                    Schedule::Background => ctx.run(&mut task),
                }
                debug!(address, worker = %ctx.name, "worker stopped");
            })
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule = match self.schedule {
            Schedule::Periodic(interval) => format!("every {interval:?}"),
            Schedule::Background => "background".to_string(),
        };
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("schedule", &schedule)
            .finish_non_exhaustive()
    }
}

/// What a worker task sees while it runs.
pub struct WorkerContext {
    handle: EngineHandle,
    address: TileAddress,
    name: String,
    shutdown: Arc<ShutdownSignal>,
}

impl WorkerContext {
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Address of the tile that owns this worker.
    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sleep for `duration`, waking early on shutdown.
    ///
    /// Returns `false` once the device is shutting down.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.shutdown.wait(duration)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }

    fn run(&self, task: &mut Task) {
        if let Err(err) = task(self) {
            warn!(
                address = self.address,
                worker = %self.name,
                error = %err,
                "worker task failed"
            );
        }
    }
}

/// One-shot shutdown flag that sleeping workers can wait on.
#[derive(Debug, Default)]
pub(crate) struct ShutdownSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn set(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `duration`; `false` means the signal was set.
    pub(crate) fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            stopped = self
                .wake
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wait_times_out_when_unset() {
        let signal = ShutdownSignal::default();
        let start = Instant::now();
        assert!(signal.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn signal_wakes_sleepers() {
        let signal = Arc::new(ShutdownSignal::default());
        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.set();
        assert!(!sleeper.join().unwrap());
        assert!(signal.is_set());
        assert!(!signal.wait(Duration::from_secs(30)));
    }

    #[test]
    fn debug_shows_schedule() {
        let worker = Worker::periodic("poll", Duration::from_millis(100), |_| Ok(()));
        assert!(format!("{worker:?}").contains("every 100ms"));
        assert_eq!(worker.name(), "poll");
    }
}
