use crate::error::{ExecutionError, Result};
use futures::future::BoxFuture;
use ramify_core::BranchOutput;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;

/// Externally supplied unbounded task executor
///
/// Every regular branch and every loop iteration runs as its own task on
/// this pool. Keeping it unbounded means independent operations cannot
/// deadlock each other; loops are throttled locally by a [`Runner`].
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
}

impl WorkerPool {
    /// Create a pool over an explicit runtime handle
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a pool over the current runtime
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    /// Submit a task to the pool
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

/// Single-assignment completion handle for one branch (or one iteration)
///
/// The first `complete` wins; `get` blocks until a value is present and may
/// be awaited by any number of consumers (dependents and the collecting
/// task).
pub struct Slot {
    value: Mutex<Option<BranchOutput>>,
    notify: Notify,
}

impl Slot {
    /// Create a new empty slot
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    fn read(&self) -> Option<BranchOutput> {
        match self.value.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Complete the slot; returns false if it was already complete
    pub fn complete(&self, output: BranchOutput) -> bool {
        let mut guard = match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return false;
        }
        *guard = Some(output);
        drop(guard);
        self.notify.notify_waiters();
        true
    }

    /// Wait for the slot to complete and return its output
    pub async fn get(&self) -> BranchOutput {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, so a complete() between the check
            // and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(output) = self.read() {
                return output;
            }
            notified.await;
        }
    }

    /// Check whether the slot already holds an output
    pub fn is_complete(&self) -> bool {
        self.read().is_some()
    }
}

/// Wait for every slot and return the outputs in slot order
pub async fn join_outputs(slots: &[Arc<Slot>]) -> Vec<BranchOutput> {
    futures::future::join_all(slots.iter().map(|slot| slot.get())).await
}

/// Factory for throttled runners over the worker pool
#[derive(Clone)]
pub struct ThrottledExecutor {
    pool: WorkerPool,
}

impl ThrottledExecutor {
    /// Create a new throttled executor
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Create a runner with the given concurrency capacity
    pub fn runner(&self, capacity: usize) -> Runner {
        Runner::new(self.pool.clone(), capacity)
    }
}

enum Submission {
    Task(BoxFuture<'static, ()>),
    Release,
}

/// Bounded-concurrency adapter over the worker pool
///
/// Submissions flow through a fair FIFO queue of the runner's capacity into
/// a single dispatcher task, which forwards each one to the pool holding one
/// of `capacity` permits until the task finishes. At most `capacity` tasks
/// of this runner are therefore in flight at any time, and `run` blocks its
/// caller while the queue is full.
pub struct Runner {
    tx: mpsc::Sender<Submission>,
    stopped: Arc<AtomicBool>,
}

impl Runner {
    fn new(pool: WorkerPool, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<Submission>(capacity);
        let permits = Arc::new(Semaphore::new(capacity));
        let stopped = Arc::new(AtomicBool::new(false));

        let dispatcher_pool = pool.clone();
        let dispatcher_stopped = stopped.clone();
        pool.spawn(async move {
            while let Some(submission) = rx.recv().await {
                let task = match submission {
                    Submission::Release => break,
                    Submission::Task(task) => task,
                };
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                dispatcher_pool.spawn(async move {
                    task.await;
                    drop(permit);
                });
            }
            dispatcher_stopped.store(true, Ordering::SeqCst);
        });

        Self { tx, stopped }
    }

    /// Submit a task, blocking while the runner is at capacity
    ///
    /// Fails with [`ExecutionError::RunnerStopped`] once the runner has been
    /// closed or its dispatcher has exited.
    pub async fn run<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ExecutionError::RunnerStopped);
        }
        self.tx
            .send(Submission::Task(Box::pin(task)))
            .await
            .map_err(|_| {
                self.stopped.store(true, Ordering::SeqCst);
                ExecutionError::RunnerStopped
            })
    }

    /// Signal the dispatcher to exit once the queue has drained
    ///
    /// Idempotent; later `run` calls fail with
    /// [`ExecutionError::RunnerStopped`].
    pub async fn close(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Submission::Release).await;
    }
}
