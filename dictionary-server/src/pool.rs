//! Fixed-size worker pool fed by a single FIFO queue.
//!
//! The pool owns `size` long-lived threads. Each one blocks on the shared
//! queue, runs whatever task it receives to completion, and loops. Producers
//! push with [`WorkerPool::submit`], which never blocks: an unbounded queue
//! accepts everything, a bounded one hands the task back when full.
//!
//! Stopping is a fire-and-forget signal. [`WorkerPool::shutdown`] closes a
//! dedicated stop channel, which wakes every idle worker at once; a worker in
//! the middle of a task notices the signal only after that task returns.
//! Tasks still sitting in the queue are never started.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TrySendError, bounded, select, unbounded,
};
use tracing::{debug, error, info, warn};

/// A unit of work executed by exactly one worker.
pub trait Task: Send + 'static {
    fn run(self);
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self) {
        self()
    }
}

/// Why [`WorkerPool::submit`] refused a task. The task is handed back.
pub enum SubmitError<T> {
    /// The bounded queue is at capacity.
    Full(T),
    /// The pool has been told to stop.
    ShutDown(T),
}

impl<T> SubmitError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SubmitError::Full(task) | SubmitError::ShutDown(task) => task,
        }
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Full(_) => f.write_str("Full(..)"),
            SubmitError::ShutDown(_) => f.write_str("ShutDown(..)"),
        }
    }
}

impl<T> fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Full(_) => f.write_str("worker queue is full"),
            SubmitError::ShutDown(_) => f.write_str("worker pool is shut down"),
        }
    }
}

impl<T> std::error::Error for SubmitError<T> {}

pub struct WorkerPool<T: Task> {
    sender: Sender<T>,
    // Kept so queued-but-unstarted tasks can be drained after shutdown.
    receiver: Receiver<T>,
    // Never sent on; dropping it disconnects the channel and wakes every worker.
    stop: Mutex<Option<Sender<()>>>,
    stopping: Arc<AtomicBool>,
    abandoned: Arc<AtomicUsize>,
    // Each worker sends its id here as it exits, so waits can be bounded.
    exited: Receiver<usize>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl<T: Task> WorkerPool<T> {
    /// Starts `size` workers reading from one queue.
    ///
    /// `capacity` of `None` gives an unbounded queue. A bounded queue must have
    /// room for at least one task.
    pub fn new(size: usize, capacity: Option<usize>) -> std::io::Result<Self> {
        let (sender, receiver) = match capacity {
            Some(capacity) => bounded(capacity.max(1)),
            None => unbounded(),
        };
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let stopping = Arc::new(AtomicBool::new(false));
        let abandoned = Arc::new(AtomicUsize::new(0));
        let (exited_tx, exited_rx) = unbounded();

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let worker = Worker {
                id,
                tasks: receiver.clone(),
                stop: stop_rx.clone(),
                stopping: Arc::clone(&stopping),
                abandoned: Arc::clone(&abandoned),
                exited: exited_tx.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("dictionary-worker-{id}"))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        info!(workers = size, capacity = ?capacity, "worker pool started");

        Ok(Self {
            sender,
            receiver,
            stop: Mutex::new(Some(stop_tx)),
            stopping,
            abandoned,
            exited: exited_rx,
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queues `task` for the next idle worker without blocking.
    pub fn submit(&self, task: T) -> Result<(), SubmitError<T>> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown(task));
        }
        self.sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(task) => SubmitError::Full(task),
            TrySendError::Disconnected(task) => SubmitError::ShutDown(task),
        })
    }

    /// Tells every worker to exit after its current task. Does not wait.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(stop);
        debug!("worker pool stop signal sent");
    }

    /// Blocks until every worker thread has exited.
    ///
    /// Only returns once [`WorkerPool::shutdown`] has been called and all
    /// in-flight tasks have finished.
    pub fn join(&self) {
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                error!(worker = ?name, "worker thread panicked outside a task");
            }
        }
    }

    /// Like [`WorkerPool::join`], but gives up after `timeout`.
    ///
    /// Workers that are still running a task when the time is up are detached
    /// and keep running in the background. Returns how many were left behind.
    pub fn join_timeout(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        // Indexed by worker id.
        let mut running: Vec<Option<JoinHandle<()>>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        )
        .into_iter()
        .map(Some)
        .collect();
        let mut left = running.len();

        while left > 0 {
            let id = match self.exited.recv_deadline(deadline) {
                Ok(id) => id,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            };
            if let Some(handle) = running.get_mut(id).and_then(Option::take) {
                left -= 1;
                if handle.join().is_err() {
                    error!(worker = id, "worker thread panicked outside a task");
                }
            }
        }

        if left > 0 {
            warn!(
                unfinished = left,
                "workers still busy after shutdown grace period; detaching them"
            );
        }
        left
    }

    /// Drops every task still waiting in the queue and returns how many tasks
    /// were never started since shutdown began.
    pub fn abandon(&self) -> usize {
        let drained = self.receiver.try_iter().count();
        self.abandoned.fetch_add(drained, Ordering::AcqRel) + drained
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }
}

impl<T: Task> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<T> {
    id: usize,
    tasks: Receiver<T>,
    stop: Receiver<()>,
    stopping: Arc<AtomicBool>,
    abandoned: Arc<AtomicUsize>,
    exited: Sender<usize>,
}

impl<T: Task> Worker<T> {
    fn run(self) {
        debug!(worker = self.id, "worker started");
        loop {
            select! {
                recv(self.stop) -> _ => break,
                recv(self.tasks) -> task => {
                    let Ok(task) = task else { break };
                    // Both channels may be ready at once; a stopped pool never
                    // starts another task.
                    if self.stopping.load(Ordering::Acquire) {
                        self.abandoned.fetch_add(1, Ordering::AcqRel);
                        break;
                    }
                    self.execute(task);
                }
            }
        }
        debug!(worker = self.id, "worker exiting");
        let _ = self.exited.send(self.id);
    }

    fn execute(&self, task: T) {
        if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            error!(worker = self.id, "task panicked; worker continues");
        }
    }
}
