//! Bounded worker pool draining a FIFO of boxed closures.
//!
//! [`ThreadPool::push`] returns a [`TaskHandle`] that yields the closure's
//! result, or [`Error::TaskFailed`] if the closure panicked. Shrinking the pool
//! asks surplus workers to exit after their current task and detaches them.
//! Dropping the pool drains the queue and joins every attached worker.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use ys_core::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    stop_at_empty: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("thread pool queue mutex poisoned")
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Default worker count: one less than the hardware threads, at least one.
pub fn default_threads() -> usize {
    let hw = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    if hw > 2 { hw - 1 } else { 1 }
}

/// Fixed-size pool of worker threads.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
    spawned: AtomicUsize,
}

impl ThreadPool {
    /// Pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState { jobs: VecDeque::new(), stop_at_empty: false }),
                cv: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
            spawned: AtomicUsize::new(0),
        };
        pool.resize(threads)?;
        Ok(pool)
    }

    fn workers(&self) -> MutexGuard<'_, Vec<Worker>> {
        self.workers.lock().expect("thread pool worker list poisoned")
    }

    /// Current number of attached workers.
    pub fn size(&self) -> usize {
        self.workers().len()
    }

    /// Grow or shrink to `threads` workers (at least one).
    ///
    /// Shrinking never interrupts a running task: the surplus workers finish
    /// what they hold, then exit on their own.
    pub fn resize(&self, threads: usize) -> Result<()> {
        let target = threads.max(1);
        let mut workers = self.workers();
        while workers.len() < target {
            workers.push(self.spawn_worker()?);
        }
        if workers.len() > target {
            let _queue = self.shared.lock();
            for mut w in workers.drain(target..) {
                w.stop.store(true, Ordering::SeqCst);
                w.join.take();
            }
            self.shared.cv.notify_all();
        }
        tracing::debug!(threads = workers.len(), "thread pool resized");
        Ok(())
    }

    fn spawn_worker(&self) -> Result<Worker> {
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&stop);
        let idx = self.spawned.fetch_add(1, Ordering::Relaxed);
        let join = thread::Builder::new()
            .name(format!("ys-worker-{idx}"))
            .spawn(move || worker_loop(&shared, &flag))?;
        Ok(Worker { stop, join: Some(join) })
    }

    /// Queue `f` and return a handle to its result.
    pub fn push<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let _ = tx.send(catch_panic(f));
        });
        self.shared.lock().jobs.push_back(job);
        self.shared.cv.notify_one();
        TaskHandle { rx }
    }
}

fn worker_loop(shared: &Shared, stop: &AtomicBool) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.stop_at_empty {
                    return;
                }
                state = shared.cv.wait(state).expect("thread pool queue mutex poisoned");
            }
        };
        job();
    }
}

/// Run `f`, turning a panic into [`Error::TaskFailed`].
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|p| Error::TaskFailed(panic_message(p)))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.lock().stop_at_empty = true;
        self.shared.cv.notify_all();
        let workers = std::mem::take(&mut *self.workers());
        for mut w in workers {
            if let Some(join) = w.join.take() {
                let _ = join.join();
            }
        }
    }
}

/// Pending result of a pushed task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run.
    pub fn join(self) -> Result<T> {
        self.rx.recv().map_err(|_| Error::TaskFailed("task dropped before it ran".into()))?
    }
}
