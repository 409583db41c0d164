//! Pausable worker pool
//!
//! A bounded pool of OS threads with admission control: job starts can be
//! paused and resumed, submission can be shut down while in-flight work
//! drains, and termination listeners fire once the last worker exits. With
//! a positive send delay the pool meters job starts one delay apart,
//! behaving as a rate-limiting scheduled executor.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Returned when a job is submitted to a shut-down executor
#[derive(Debug, Error)]
#[error("executor is shut down")]
pub struct RejectedExecution;

/// Notified exactly once, when the last worker thread exits
pub trait TerminationListener: Send + Sync {
    fn terminated(&self);
}

type Job = Box<dyn FnOnce() + Send + 'static>;

const SHUTDOWN_POLL: Duration = Duration::from_millis(25);

struct QueueState {
    jobs: VecDeque<Job>,
    paused: bool,
    shutdown: bool,
    shutdown_now: bool,
}

struct TermState {
    live_workers: usize,
    notified: bool,
}

struct PoolShared {
    queue: Mutex<QueueState>,
    work_available: Condvar,
    term: Mutex<TermState>,
    term_cv: Condvar,
    listeners: Mutex<Vec<Arc<dyn TerminationListener>>>,
    pace_slot: Mutex<Instant>,
    send_delay: Duration,
}

impl PoolShared {
    fn is_shutdown_now(&self) -> bool {
        self.queue.lock().shutdown_now
    }

    /// Meter job starts one send delay apart
    fn pace(&self) {
        if self.send_delay.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.pace_slot.lock();
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + self.send_delay;
            slot
        };

        // Chunked sleep so a forced shutdown is observed promptly.
        loop {
            if self.is_shutdown_now() {
                return;
            }
            let now = Instant::now();
            if now >= slot {
                return;
            }
            thread::sleep((slot - now).min(SHUTDOWN_POLL));
        }
    }

    /// Block while the pool is paused; new job starts stay gated even for
    /// jobs already popped from the queue.
    fn wait_if_paused(&self) {
        let mut queue = self.queue.lock();
        while queue.paused && !queue.shutdown_now {
            self.work_available.wait(&mut queue);
        }
    }

    fn worker_exited(&self) {
        let fire = {
            let mut term = self.term.lock();
            term.live_workers -= 1;
            let fire = term.live_workers == 0 && !term.notified;
            if fire {
                term.notified = true;
            }
            self.term_cv.notify_all();
            fire
        };

        if fire {
            let listeners: Vec<Arc<dyn TerminationListener>> = self.listeners.lock().clone();
            for listener in &listeners {
                listener.terminated();
            }
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown_now {
                    break None;
                }
                if queue.paused {
                    shared.work_available.wait(&mut queue);
                    continue;
                }
                match queue.jobs.pop_front() {
                    Some(job) => break Some(job),
                    None if queue.shutdown => break None,
                    None => shared.work_available.wait(&mut queue),
                }
            }
        };

        let Some(job) = job else { break };

        shared.pace();
        shared.wait_if_paused();

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("a pool job panicked");
        }
    }

    shared.worker_exited();
}

/// Bounded worker pool with pausable job admission
pub struct PausableExecutor {
    shared: Arc<PoolShared>,
}

impl PausableExecutor {
    /// Spawn `pool_size` named worker threads
    pub fn new(
        pool_size: usize,
        send_delay: Duration,
        thread_name_prefix: &str,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                paused: false,
                shutdown: false,
                shutdown_now: false,
            }),
            work_available: Condvar::new(),
            term: Mutex::new(TermState {
                live_workers: pool_size,
                notified: false,
            }),
            term_cv: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            pace_slot: Mutex::new(Instant::now()),
            send_delay,
        });

        for n in 0..pool_size {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}{}", thread_name_prefix, n + 1))
                .spawn(move || worker_loop(worker_shared));

            if let Err(e) = spawned {
                // Account for the workers that never started, then release
                // the ones that did.
                {
                    let mut term = shared.term.lock();
                    term.live_workers -= pool_size - n;
                }
                let executor = Self { shared };
                executor.shutdown_now();
                return Err(e);
            }
        }

        Ok(Self { shared })
    }

    /// Submit a job; rejected once the executor is shut down
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), RejectedExecution> {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown || queue.shutdown_now {
            return Err(RejectedExecution);
        }
        queue.jobs.push_back(Box::new(job));
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Stop starting new jobs; in-flight jobs continue
    pub fn pause(&self) {
        self.shared.queue.lock().paused = true;
    }

    /// Resume starting jobs
    pub fn resume(&self) {
        let mut queue = self.shared.queue.lock();
        queue.paused = false;
        self.shared.work_available.notify_all();
    }

    /// Refuse new submissions; workers exit once the queue drains
    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        queue.shutdown = true;
        self.shared.work_available.notify_all();
    }

    /// Refuse new submissions and discard queued jobs; in-flight jobs run
    /// to completion
    pub fn shutdown_now(&self) {
        let mut queue = self.shared.queue.lock();
        queue.shutdown = true;
        queue.shutdown_now = true;
        queue.jobs.clear();
        self.shared.work_available.notify_all();
    }

    /// Bounded wait for all workers to exit; true once the pool terminated
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut term = self.shared.term.lock();
        while term.live_workers > 0 {
            if self
                .shared
                .term_cv
                .wait_until(&mut term, deadline)
                .timed_out()
            {
                return term.live_workers == 0;
            }
        }
        true
    }

    pub fn add_termination_listener(&self, listener: Arc<dyn TerminationListener>) {
        self.shared.listeners.lock().push(listener);
    }
}
