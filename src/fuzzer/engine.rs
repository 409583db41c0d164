//! Core fuzzing campaign engine
//!
//! One engine drives one campaign: a dedicated submitter thread pulls
//! combinations from the replacement source and feeds tasks into a bounded
//! pausable worker pool, under a live-task ceiling, a pause condition and an
//! error budget.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{FuzzerError, ReplacerError};

use super::executor::{PausableExecutor, TerminationListener};
use super::options::FuzzerOptions;
use super::replacer::{Replacement, ReplacementSource};
use super::task::{FuzzTask, TaskHooks, TaskRunner};
use super::{Fuzzer, FuzzerErrorListener, FuzzerProgressListener, TaskErrorReport};

/// Campaign lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    Running,
    Paused,
    Stopped,
    Finished,
}

const LIVE_TASK_CEILING_FACTOR: u64 = 3;
const THROTTLE_POLL: Duration = Duration::from_millis(25);
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A fuzzing campaign over messages of type `M`
pub struct FuzzEngine<M: Send + 'static> {
    shared: Arc<EngineShared<M>>,
}

struct EngineShared<M: Send + 'static> {
    display_name: String,
    options: FuzzerOptions,

    scan_id: Mutex<Option<usize>>,

    state: Mutex<State>,
    unpause: Condvar,

    tasks_total: u64,
    tasks_done: AtomicU64,

    error_count: AtomicU64,
    max_errors_allowed: Option<u64>,

    progress_listeners: Mutex<Vec<Arc<dyn FuzzerProgressListener>>>,
    error_listeners: Mutex<Vec<Arc<dyn FuzzerErrorListener>>>,
    completion_notified: AtomicBool,

    executor: Mutex<Option<Arc<PausableExecutor>>>,
    replacer: Mutex<Option<Box<dyn ReplacementSource<M>>>>,
    runner: Arc<dyn TaskRunner<M>>,
}

impl<M: Send + 'static> FuzzEngine<M> {
    /// Create a new campaign engine.
    ///
    /// The replacement source must be initialised and the options must name
    /// at least one worker thread.
    pub fn new(
        display_name: impl Into<String>,
        options: FuzzerOptions,
        replacer: Box<dyn ReplacementSource<M>>,
        runner: Arc<dyn TaskRunner<M>>,
    ) -> Result<Self, FuzzerError> {
        if options.thread_count == 0 {
            return Err(FuzzerError::InvalidOptions(
                "thread_count must be greater than zero",
            ));
        }
        if !replacer.is_initialised() {
            return Err(FuzzerError::UninitialisedReplacer);
        }

        let tasks_total = replacer.total_replacements();
        let max_errors_allowed = options.max_errors_allowed;

        Ok(Self {
            shared: Arc::new(EngineShared {
                display_name: display_name.into(),
                options,
                scan_id: Mutex::new(None),
                state: Mutex::new(State::NotStarted),
                unpause: Condvar::new(),
                tasks_total,
                tasks_done: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                max_errors_allowed,
                progress_listeners: Mutex::new(Vec::new()),
                error_listeners: Mutex::new(Vec::new()),
                completion_notified: AtomicBool::new(false),
                executor: Mutex::new(None),
                replacer: Mutex::new(Some(replacer)),
                runner,
            }),
        })
    }

    /// Starts the fuzzer.
    ///
    /// Has no effect if the campaign was already started.
    pub fn start_scan(&self) -> Result<(), FuzzerError> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if *state != State::NotStarted {
            return Ok(());
        }

        let scan_id = match *shared.scan_id.lock() {
            Some(id) => id,
            None => return Err(FuzzerError::ScanIdNotSet),
        };

        let executor = Arc::new(PausableExecutor::new(
            shared.options.thread_count,
            shared.options.send_message_delay,
            &format!("carnyx-fuzzer-{}-thread-", scan_id),
        )?);
        executor.add_termination_listener(Arc::new(EngineTerminationListener {
            shared: Arc::clone(shared),
        }));
        *shared.executor.lock() = Some(Arc::clone(&executor));

        let submitter_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("carnyx-submitter-{}", scan_id))
            .spawn(move || submitter_loop(submitter_shared));

        if let Err(e) = spawned {
            executor.shutdown_now();
            *shared.executor.lock() = None;
            return Err(FuzzerError::ThreadCreation(e));
        }

        tracing::info!(scan = scan_id, name = %shared.display_name, "Fuzzer started");
        *state = State::Running;
        Ok(())
    }

    /// Starts the fuzzer; alias of `start_scan`
    pub fn run(&self) -> Result<(), FuzzerError> {
        self.start_scan()
    }

    /// Pauses the fuzzer.
    ///
    /// Has no effect unless the campaign is running.
    pub fn pause_scan(&self) {
        let mut state = self.shared.state.lock();
        if *state == State::Running {
            if let Some(executor) = self.shared.executor.lock().as_ref() {
                executor.pause();
            }
            *state = State::Paused;
        }
    }

    /// Resumes the fuzzer.
    ///
    /// Has no effect unless the campaign is paused.
    pub fn resume_scan(&self) {
        let mut state = self.shared.state.lock();
        if *state == State::Paused {
            if let Some(executor) = self.shared.executor.lock().as_ref() {
                executor.resume();
            }
            self.shared.unpause.notify_all();
            *state = State::Running;
        }
    }

    /// Stops the fuzzer.
    ///
    /// Has no effect if the campaign was never started or already ended.
    pub fn stop_scan(&self) {
        self.shared.stop();
    }

    pub fn is_running(&self) -> bool {
        *self.shared.state.lock() == State::Running
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.state.lock() == State::Paused
    }

    /// True once the campaign ended, whether stopped or finished
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Number of completed tasks
    pub fn progress(&self) -> u64 {
        self.shared.tasks_done.load(Ordering::SeqCst)
    }

    /// Total number of tasks in the campaign
    pub fn maximum(&self) -> u64 {
        self.shared.tasks_total
    }

    pub fn error_count(&self) -> u64 {
        self.shared.error_count.load(Ordering::SeqCst)
    }

    pub fn scan_id(&self) -> Option<usize> {
        *self.shared.scan_id.lock()
    }

    /// Assign the campaign id; only allowed before the campaign starts
    pub fn set_scan_id(&self, id: usize) -> Result<(), FuzzerError> {
        let state = self.shared.state.lock();
        if *state != State::NotStarted {
            return Err(FuzzerError::AlreadyStarted);
        }
        *self.shared.scan_id.lock() = Some(id);
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        &self.shared.display_name
    }

    pub fn options(&self) -> &FuzzerOptions {
        &self.shared.options
    }

    pub fn add_progress_listener(&self, listener: Arc<dyn FuzzerProgressListener>) {
        self.shared.progress_listeners.lock().push(listener);
    }

    pub fn remove_progress_listener(&self, listener: &Arc<dyn FuzzerProgressListener>) {
        self.shared
            .progress_listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_error_listener(&self, listener: Arc<dyn FuzzerErrorListener>) {
        self.shared.error_listeners.lock().push(listener);
    }

    pub fn remove_error_listener(&self, listener: &Arc<dyn FuzzerErrorListener>) {
        self.shared
            .error_listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

impl<M: Send + 'static> Clone for FuzzEngine<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Send + 'static> Fuzzer for FuzzEngine<M> {
    fn scan_id(&self) -> Option<usize> {
        FuzzEngine::scan_id(self)
    }

    fn set_scan_id(&self, id: usize) -> Result<(), FuzzerError> {
        FuzzEngine::set_scan_id(self, id)
    }

    fn display_name(&self) -> &str {
        FuzzEngine::display_name(self)
    }

    fn start_scan(&self) -> Result<(), FuzzerError> {
        FuzzEngine::start_scan(self)
    }

    fn pause_scan(&self) {
        FuzzEngine::pause_scan(self)
    }

    fn resume_scan(&self) {
        FuzzEngine::resume_scan(self)
    }

    fn stop_scan(&self) {
        FuzzEngine::stop_scan(self)
    }

    fn is_running(&self) -> bool {
        FuzzEngine::is_running(self)
    }

    fn is_paused(&self) -> bool {
        FuzzEngine::is_paused(self)
    }

    fn is_stopped(&self) -> bool {
        FuzzEngine::is_stopped(self)
    }

    fn progress(&self) -> u64 {
        FuzzEngine::progress(self)
    }

    fn maximum(&self) -> u64 {
        FuzzEngine::maximum(self)
    }
}

impl<M: Send + 'static> EngineShared<M> {
    fn is_stopped(&self) -> bool {
        matches!(*self.state.lock(), State::Stopped | State::Finished)
    }

    fn is_paused(&self) -> bool {
        *self.state.lock() == State::Paused
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if matches!(
            *state,
            State::NotStarted | State::Finished | State::Stopped
        ) {
            return;
        }

        tracing::info!(name = %self.display_name, "Stopping fuzzer");
        let was_paused = *state == State::Paused;
        *state = State::Stopped;

        let executor = self.executor.lock().clone();
        if let Some(executor) = &executor {
            executor.shutdown();
            if was_paused {
                executor.resume();
            }
        }
        self.unpause.notify_all();

        // Release the state lock so task threads and listeners can query
        // the fuzzer while it drains.
        drop(state);

        if let Some(executor) = &executor {
            executor.shutdown_now();
            if !executor.await_termination(STOP_DRAIN_TIMEOUT) {
                tracing::warn!("Fuzzer tasks did not stop within the drain window (2s)");
            }
        }

        self.terminated(false);
    }

    fn terminated(&self, successfully: bool) {
        {
            let mut state = self.state.lock();
            if *state != State::Stopped {
                *state = State::Finished;
            }
        }

        if self.completion_notified.swap(true, Ordering::SeqCst) {
            return;
        }

        self.executor.lock().take();
        self.notify_completed(successfully);

        if successfully {
            tracing::info!(name = %self.display_name, "Fuzzer completed");
        } else {
            tracing::info!(name = %self.display_name, "Fuzzer stopped");
        }
    }

    fn increase_error_count(
        &self,
        task_id: u64,
        source: &str,
        reason: &str,
        replacements: &[Replacement],
    ) {
        let total = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        let max_reached = self.max_errors_allowed.is_some_and(|max| total > max);

        self.notify_task_error(&TaskErrorReport {
            task_id,
            source,
            reason,
            total_errors: total,
            max_errors_reached: max_reached,
            replacements,
        });

        if max_reached {
            tracing::warn!(errors = total, "Error budget exceeded, stopping fuzzer");
            self.stop();
        }
    }

    fn failed_to_craft(&self, task_id: u64, error: &ReplacerError, replacements: &[Replacement]) {
        self.post_task_execution(task_id, true);

        let source = match error {
            ReplacerError::Replacement { .. } => "payload replacement",
            _ => "message crafting",
        };
        self.increase_error_count(task_id, source, &error.to_string(), replacements);
    }

    fn notify_progress(&self, done: u64) {
        let scan_id = (*self.scan_id.lock()).unwrap_or(0);
        let listeners: Vec<Arc<dyn FuzzerProgressListener>> =
            self.progress_listeners.lock().clone();
        for listener in &listeners {
            listener.fuzzer_progress(scan_id, &self.display_name, done, self.tasks_total);
        }
    }

    fn notify_completed(&self, successfully: bool) {
        let scan_id = (*self.scan_id.lock()).unwrap_or(0);
        let listeners: Vec<Arc<dyn FuzzerProgressListener>> =
            self.progress_listeners.lock().clone();
        for listener in &listeners {
            listener.fuzzer_completed(scan_id, &self.display_name, successfully);
        }
    }

    fn notify_task_error(&self, report: &TaskErrorReport<'_>) {
        let listeners: Vec<Arc<dyn FuzzerErrorListener>> = self.error_listeners.lock().clone();
        for listener in &listeners {
            listener.task_error(report);
        }
    }
}

impl<M: Send + 'static> TaskHooks for EngineShared<M> {
    fn is_stopped(&self) -> bool {
        EngineShared::is_stopped(self)
    }

    fn pre_task_execution(&self, _task_id: u64) {}

    fn post_task_execution(&self, task_id: u64, normal_termination: bool) {
        let done = self.tasks_done.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify_progress(done);

        if !normal_termination {
            self.increase_error_count(task_id, "unknown", "task terminated abnormally", &[]);
        }
    }

    fn report_task_failure(&self, task_id: u64, reason: &str) {
        self.post_task_execution(task_id, true);
        self.increase_error_count(task_id, "message send", reason, &[]);
    }
}

/// Termination callback installed on the campaign's pool.
///
/// The FINISHED transition runs on a fresh thread: a pool worker must not
/// take the state lock while a concurrent `stop_scan` caller awaits the
/// pool drain.
struct EngineTerminationListener<M: Send + 'static> {
    shared: Arc<EngineShared<M>>,
}

impl<M: Send + 'static> TerminationListener for EngineTerminationListener<M> {
    fn terminated(&self) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("carnyx-termination-notifier".to_string())
            .spawn(move || {
                let ended = {
                    let state = shared.state.lock();
                    matches!(*state, State::Stopped | State::Finished)
                };
                if !ended {
                    shared.terminated(true);
                }
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to spawn the termination notifier");
        }
    }
}

/// Dedicated submitter: pulls combinations from the replacement source and
/// feeds tasks into the pool.
fn submitter_loop<M: Send + 'static>(shared: Arc<EngineShared<M>>) {
    let mut replacer = match shared.replacer.lock().take() {
        Some(replacer) => replacer,
        None => return,
    };
    let executor = match shared.executor.lock().clone() {
        Some(executor) => executor,
        None => return,
    };

    submit_tasks(&shared, &executor, replacer.as_mut());

    if let Err(e) = replacer.close() {
        tracing::debug!(error = %e, "Failed to close the replacement source");
    }
    executor.shutdown();
}

fn submit_tasks<M: Send + 'static>(
    shared: &Arc<EngineShared<M>>,
    executor: &PausableExecutor,
    replacer: &mut dyn ReplacementSource<M>,
) {
    let live_task_ceiling = shared.options.thread_count as u64 * LIVE_TASK_CEILING_FACTOR;
    let mut tasks_submitted: u64 = 0;
    let mut task_id_counter: u64 = 1;

    while replacer.has_next() && !shared.is_stopped() {
        // Backpressure: bound the number of live tasks.
        while tasks_submitted.saturating_sub(shared.tasks_done.load(Ordering::SeqCst))
            > live_task_ceiling
            && !shared.is_stopped()
        {
            thread::sleep(THROTTLE_POLL);
        }

        if shared.is_stopped() {
            return;
        }

        let mut task_submitted = false;
        while !task_submitted && !shared.is_stopped() {
            {
                let mut state = shared.state.lock();
                while *state == State::Paused {
                    shared.unpause.wait(&mut state);
                }
            }

            if !shared.is_paused() && !shared.is_stopped() {
                let task_id = task_id_counter;
                task_id_counter += 1;

                match replacer.next() {
                    Ok(message) => {
                        let payloads: Vec<String> = replacer
                            .current_replacements()
                            .iter()
                            .map(|r| r.payload.clone())
                            .collect();
                        submit_task(shared, executor, FuzzTask::new(task_id, message, payloads));
                    }
                    Err(e) => {
                        shared.failed_to_craft(task_id, &e, replacer.current_replacements());
                    }
                }

                task_submitted = true;
                tasks_submitted += 1;
            }
        }
    }
}

fn submit_task<M: Send + 'static>(
    shared: &Arc<EngineShared<M>>,
    executor: &PausableExecutor,
    task: FuzzTask<M>,
) -> bool {
    if shared.is_stopped() {
        tracing::debug!("Submitting task skipped, the fuzzer is stopped");
        return false;
    }

    let task_id = task.id();
    let job_shared = Arc::clone(shared);
    let runner = Arc::clone(&shared.runner);

    match executor.execute(move || task.run(&*job_shared, runner.as_ref())) {
        Ok(()) => true,
        Err(_) => {
            shared.post_task_execution(task_id, false);
            tracing::warn!(
                stopped = shared.is_stopped(),
                "Submitted task was rejected by the executor"
            );
            false
        }
    }
}
