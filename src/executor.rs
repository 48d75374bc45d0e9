//! Shared worker pool that runs actor drain bursts.
//!
//! One process-wide [`Executor`] instance is the default home for every
//! actor, with dependency injection for anything that wants its own pool
//! (tests, latency-critical subsystems). The pool is created lazily on the
//! first [`execute`](Executor::execute) and torn down by
//! [`shutdown`](Executor::shutdown); a later `execute` builds a fresh pool
//! from the parameters in force at that moment.
//!
//! # Worker model
//!
//! ```text
//! execute(job) ──► shared deque ──► worker 1..core      (always resident)
//!                     │
//!                     └─ no idle worker? ──► worker core+1..max  (on demand,
//!                                            retired after idle_timeout)
//! ```
//!
//! A job that panics is caught at the worker boundary and logged; it never
//! takes the worker down with it.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work submitted to the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Replacement pool constructor, installed with [`Executor::set_factory`].
pub type PoolFactory = Box<dyn Fn(&ExecutorParams) -> ThreadPool + Send + 'static>;

/// Tunable executor parameters.
///
/// Changes take effect at the *next* pool construction: mutate at runtime,
/// then `shutdown()` — the pool built by the next `execute` reads the new
/// values. The exception is `on_same_thread`, which actors consult on every
/// send.
///
/// # Invariants
///
/// - `core_threads >= 1`
/// - `max_threads >= core_threads`
#[derive(Debug, Clone, Copy)]
pub struct ExecutorParams {
    /// Minimum worker count, spawned eagerly at pool construction.
    ///
    /// **Default: 16**
    pub core_threads: usize,

    /// Burst ceiling. When every worker is busy and work keeps arriving,
    /// extra workers are spawned up to this count.
    ///
    /// **Default: `core_threads * 25`**
    pub max_threads: usize,

    /// How long a surplus (above-core) worker waits for work before
    /// retiring.
    ///
    /// **Default: 60s**
    pub idle_timeout: Duration,

    /// When true, actors run their drain bursts inline on the sending
    /// thread instead of submitting to the pool.
    ///
    /// **Default: false**
    pub on_same_thread: bool,
}

impl Default for ExecutorParams {
    fn default() -> Self {
        let core_threads = 16;
        Self {
            core_threads,
            max_threads: core_threads * 25,
            idle_timeout: Duration::from_secs(60),
            on_same_thread: false,
        }
    }
}

struct PoolInner {
    queue: VecDeque<Job>,
    /// Workers currently blocked waiting for work.
    idle: usize,
    /// Workers alive (resident or surplus).
    live: usize,
    shutdown: bool,
}

struct PoolShared {
    inner: Mutex<PoolInner>,
    available: Condvar,
    core_threads: usize,
    idle_timeout: Duration,
}

/// Grow-on-demand worker pool over a shared job deque.
///
/// `core_threads` workers are resident for the pool's lifetime; surplus
/// workers appear under burst load and retire after `idle_timeout` without
/// work. [`shutdown`](ThreadPool::shutdown) lets workers finish the queued
/// jobs, then joins them.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    max_threads: usize,
    next_worker_id: AtomicUsize,
}

impl ThreadPool {
    /// Build a pool and eagerly spawn the core workers.
    #[must_use]
    pub fn new(params: &ExecutorParams) -> Self {
        debug_assert!(params.core_threads >= 1, "core_threads must be >= 1");
        debug_assert!(
            params.max_threads >= params.core_threads,
            "max_threads must be >= core_threads"
        );

        let shared = Arc::new(PoolShared {
            inner: Mutex::new(PoolInner {
                queue: VecDeque::new(),
                idle: 0,
                live: params.core_threads,
                shutdown: false,
            }),
            available: Condvar::new(),
            core_threads: params.core_threads,
            idle_timeout: params.idle_timeout,
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(params.core_threads)),
            max_threads: params.max_threads,
            next_worker_id: AtomicUsize::new(0),
        };
        for _ in 0..params.core_threads {
            pool.spawn_worker();
        }
        log::debug!("thread pool up: {} core workers", params.core_threads);
        pool
    }

    /// Queue a job, growing the pool if every worker is busy.
    pub fn submit(&self, job: Job) {
        let grow = {
            let mut inner = self.shared.inner.lock();
            if inner.shutdown {
                log::warn!("job submitted to a shut-down pool; dropping");
                return;
            }
            inner.queue.push_back(job);
            // Grow whenever queued work exceeds the workers free to take
            // it; judging by idle == 0 alone can strand a job behind a
            // worker that wakes for an earlier one.
            let grow = inner.queue.len() > inner.idle && inner.live < self.max_threads;
            if grow {
                inner.live += 1;
            }
            grow
        };
        self.shared.available.notify_one();
        if grow {
            self.spawn_worker();
        }
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.shared.inner.lock().live
    }

    /// Let workers drain the queue, then stop and join them.
    pub fn shutdown(self) {
        self.signal_shutdown();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        log::debug!("thread pool down");
    }

    fn signal_shutdown(&self) {
        self.shared.inner.lock().shutdown = true;
        self.shared.available.notify_all();
    }

    fn spawn_worker(&self) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("actor-worker-{id}"))
            .spawn(move || worker_loop(&shared));
        match spawned {
            Ok(handle) => self.workers.lock().push(handle),
            Err(err) => {
                // The job stays queued for the remaining workers.
                self.shared.inner.lock().live -= 1;
                log::error!("failed to spawn pool worker: {err}");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // A pool dropped without an explicit shutdown still stops its
        // workers; they detach instead of being joined.
        self.signal_shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut inner = shared.inner.lock();
            loop {
                if let Some(job) = inner.queue.pop_front() {
                    break job;
                }
                if inner.shutdown {
                    inner.live -= 1;
                    return;
                }
                inner.idle += 1;
                let timed_out = shared
                    .available
                    .wait_for(&mut inner, shared.idle_timeout)
                    .timed_out();
                inner.idle -= 1;
                if timed_out && inner.live > shared.core_threads && inner.queue.is_empty() {
                    // Surplus worker saw no work for a full idle window.
                    inner.live -= 1;
                    return;
                }
            }
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let what = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            log::error!("pool job panicked: {what}");
        }
    }
}

/// Pool lifecycle manager: lazy construction, graceful teardown, runtime
/// reconfiguration.
///
/// Most callers never construct one — [`Executor::global`] hands out the
/// process-wide instance every [`Actor`](crate::Actor) uses by default.
pub struct Executor {
    pool: Mutex<Option<ThreadPool>>,
    params: Mutex<ExecutorParams>,
    same_thread: AtomicBool,
    factory: Mutex<Option<PoolFactory>>,
}

impl Executor {
    /// An executor with default parameters and no pool yet.
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(ExecutorParams::default())
    }

    /// An executor that will build its pool from `params`.
    #[must_use]
    pub fn with_params(params: ExecutorParams) -> Self {
        Self {
            pool: Mutex::new(None),
            same_thread: AtomicBool::new(params.on_same_thread),
            params: Mutex::new(params),
            factory: Mutex::new(None),
        }
    }

    /// The process-wide default executor.
    pub fn global() -> Arc<Executor> {
        static GLOBAL: Lazy<Arc<Executor>> = Lazy::new(|| Arc::new(Executor::new()));
        Arc::clone(&GLOBAL)
    }

    /// Schedule `job` for asynchronous execution, building the pool first if
    /// none exists. Returns immediately.
    pub fn execute(&self, job: Job) {
        let mut slot = self.pool.lock();
        slot.get_or_insert_with(|| self.build_pool()).submit(job);
    }

    /// Tear the pool down and return to the uninitialized state.
    ///
    /// Queued jobs are drained first; workers are joined. The next
    /// `execute` re-creates the pool from the current parameters.
    pub fn shutdown(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
    }

    /// Snapshot of the current parameters.
    pub fn params(&self) -> ExecutorParams {
        *self.params.lock()
    }

    /// Replace the parameters. Pool-sizing fields apply at the next pool
    /// construction; `on_same_thread` applies to the next send.
    pub fn set_params(&self, params: ExecutorParams) {
        self.same_thread.store(params.on_same_thread, Ordering::Relaxed);
        *self.params.lock() = params;
    }

    /// Toggle inline drain mode (see [`ExecutorParams::on_same_thread`]).
    pub fn set_same_thread(&self, on: bool) {
        self.same_thread.store(on, Ordering::Relaxed);
        self.params.lock().on_same_thread = on;
    }

    /// Whether actors should drain inline on the sending thread.
    pub fn same_thread(&self) -> bool {
        self.same_thread.load(Ordering::Relaxed)
    }

    /// Install a replacement pool constructor, used by the next pool
    /// construction instead of [`ThreadPool::new`].
    pub fn set_factory(&self, factory: PoolFactory) {
        *self.factory.lock() = Some(factory);
    }

    fn build_pool(&self) -> ThreadPool {
        let params = *self.params.lock();
        match self.factory.lock().as_ref() {
            Some(factory) => factory(&params),
            None => ThreadPool::new(&params),
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("initialized", &self.pool.lock().is_some())
            .field("same_thread", &self.same_thread())
            .finish_non_exhaustive()
    }
}
