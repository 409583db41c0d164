//! Task unit and the send/detect delegate

use std::panic::{self, AssertUnwindSafe};

/// Executes the actual fuzzed-message send and response detection.
///
/// An `Err` marks the task as failed; the engine records it against the
/// campaign's error budget. Transport-level retries belong to the
/// implementation, not to the engine.
pub trait TaskRunner<M>: Send + Sync {
    fn run_task(&self, task_id: u64, message: M, payloads: &[String]) -> anyhow::Result<()>;
}

/// Owner-side hooks a task reports through
pub(crate) trait TaskHooks: Send + Sync {
    fn is_stopped(&self) -> bool;
    fn pre_task_execution(&self, task_id: u64);
    fn post_task_execution(&self, task_id: u64, normal_termination: bool);
    fn report_task_failure(&self, task_id: u64, reason: &str);
}

/// One unit of work: a fuzzed message and the payloads that produced it.
/// Consumed by `run`.
pub(crate) struct FuzzTask<M> {
    id: u64,
    message: M,
    payloads: Vec<String>,
}

impl<M> FuzzTask<M> {
    pub(crate) fn new(id: u64, message: M, payloads: Vec<String>) -> Self {
        Self {
            id,
            message,
            payloads,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Runs the task: skips entirely if the owner is stopped, otherwise
    /// pre-hook, delegate, post-hook regardless of the outcome.
    pub(crate) fn run(self, owner: &dyn TaskHooks, runner: &dyn TaskRunner<M>) {
        if owner.is_stopped() {
            tracing::debug!(task = self.id, "skipping task, the fuzzer is stopped");
            return;
        }

        owner.pre_task_execution(self.id);

        let id = self.id;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runner.run_task(id, self.message, &self.payloads)
        }));

        match outcome {
            Ok(Ok(())) => owner.post_task_execution(id, true),
            Ok(Err(e)) => {
                owner.report_task_failure(id, &format!("{:#}", e));
            }
            Err(_) => owner.post_task_execution(id, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingHooks {
        stopped: AtomicBool,
        events: Mutex<Vec<String>>,
    }

    impl TaskHooks for RecordingHooks {
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn pre_task_execution(&self, task_id: u64) {
            self.events.lock().push(format!("pre {}", task_id));
        }

        fn post_task_execution(&self, task_id: u64, normal_termination: bool) {
            self.events
                .lock()
                .push(format!("post {} {}", task_id, normal_termination));
        }

        fn report_task_failure(&self, task_id: u64, reason: &str) {
            self.events
                .lock()
                .push(format!("failure {} {}", task_id, reason));
        }
    }

    struct ScriptedRunner {
        fail: bool,
        panic: bool,
    }

    impl TaskRunner<String> for ScriptedRunner {
        fn run_task(&self, _task_id: u64, _message: String, _payloads: &[String]) -> anyhow::Result<()> {
            if self.panic {
                panic!("runner blew up");
            }
            if self.fail {
                anyhow::bail!("send failed");
            }
            Ok(())
        }
    }

    #[test]
    fn test_successful_task_reports_normal_completion() {
        let hooks = RecordingHooks::default();
        let runner = ScriptedRunner {
            fail: false,
            panic: false,
        };

        FuzzTask::new(7, "msg".to_string(), vec![]).run(&hooks, &runner);

        let events = hooks.events.lock();
        assert_eq!(
            *events,
            vec!["pre 7".to_string(), "post 7 true".to_string()]
        );
    }

    #[test]
    fn test_failed_task_reports_failure() {
        let hooks = RecordingHooks::default();
        let runner = ScriptedRunner {
            fail: true,
            panic: false,
        };

        FuzzTask::new(3, "msg".to_string(), vec![]).run(&hooks, &runner);

        let events = hooks.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], "pre 3");
        assert!(events[1].starts_with("failure 3 send failed"));
    }

    #[test]
    fn test_panicking_task_is_abnormal_termination() {
        let hooks = RecordingHooks::default();
        let runner = ScriptedRunner {
            fail: false,
            panic: true,
        };

        FuzzTask::new(5, "msg".to_string(), vec![]).run(&hooks, &runner);

        let events = hooks.events.lock();
        assert_eq!(
            *events,
            vec!["pre 5".to_string(), "post 5 false".to_string()]
        );
    }

    #[test]
    fn test_stopped_owner_skips_task_entirely() {
        let hooks = RecordingHooks::default();
        hooks.stopped.store(true, Ordering::SeqCst);
        let runner = ScriptedRunner {
            fail: false,
            panic: false,
        };

        FuzzTask::new(1, "msg".to_string(), vec![]).run(&hooks, &runner);

        assert!(hooks.events.lock().is_empty());
    }
}
