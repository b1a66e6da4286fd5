//! Execution units: dedicated OS threads that run one invocation at a time.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, SandboxError};

/// Work handed to a unit.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A worker thread with a private stack.
///
/// Dropping the unit closes its queue; the thread exits once its current
/// job, if any, returns.
pub(crate) struct ExecutionUnit {
    id: usize,
    jobs: mpsc::UnboundedSender<Job>,
}

impl ExecutionUnit {
    fn spawn(id: usize, stack_bytes: usize) -> Result<Self> {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(format!("hotmod-unit-{id}"))
            .stack_size(stack_bytes)
            .spawn(move || {
                while let Some(job) = queue.blocking_recv() {
                    // Jobs report their own panics; this keeps the thread alive.
                    let _ = catch_unwind(AssertUnwindSafe(job));
                }
                tracing::trace!(unit = id, "execution unit exited");
            })
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        tracing::debug!(unit = id, "spawned execution unit");
        Ok(Self { id, jobs })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Queue `job`. Fails only if the thread is gone.
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| SandboxError::Unavailable(format!("unit {} has exited", self.id)))
    }
}

/// A unit checked out of the pool together with its concurrency permit.
pub(crate) struct Lease {
    pub(crate) unit: ExecutionUnit,
    _permit: OwnedSemaphorePermit,
}

/// Bounded set of execution units.
///
/// At most `size` units run at once. Idle units are reused; retired ones
/// are dropped and replaced lazily on the next checkout.
pub(crate) struct UnitPool {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<ExecutionUnit>>,
    next_id: AtomicUsize,
    stack_bytes: usize,
    size: usize,
}

impl UnitPool {
    pub(crate) fn new(size: usize, stack_bytes: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            next_id: AtomicUsize::new(0),
            stack_bytes,
            size,
        }
    }

    pub(crate) async fn checkout(&self) -> Result<Lease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Unavailable("pool closed".into()))?;
        let reused = self.idle.lock().pop();
        let unit = match reused {
            Some(unit) => unit,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                ExecutionUnit::spawn(id, self.stack_bytes)?
            }
        };
        Ok(Lease {
            unit,
            _permit: permit,
        })
    }

    /// Return a unit whose last job finished cleanly.
    pub(crate) fn release(&self, lease: Lease) {
        self.idle.lock().push(lease.unit);
    }

    /// Drop a unit that did not report back in time. It is never reused.
    pub(crate) fn retire(&self, lease: Lease) {
        tracing::warn!(unit = lease.unit.id(), "retiring execution unit");
        drop(lease);
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Units ever spawned, including retired ones.
    pub(crate) fn spawned(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }
}
