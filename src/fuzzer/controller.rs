//! Campaign registry and bulk lifecycle control

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::FuzzerError;

use super::Fuzzer;

/// Owner-side callback for registry removals
pub trait FuzzerHandler<F>: Send + Sync {
    /// Called after the fuzzer was dropped from the registry
    fn scanner_removed(&self, fuzzer: &Arc<F>);
}

struct ScanEntry<F> {
    handler: Arc<dyn FuzzerHandler<F>>,
    fuzzer: Arc<F>,
}

struct Registry<F> {
    scans: BTreeMap<usize, ScanEntry<F>>,
    next_id: usize,
}

/// Registry of fuzzing campaigns.
///
/// Ids are sequential and never reused, even after removal. The registry
/// map and the id counter share one lock; handler notifications always run
/// outside it.
pub struct FuzzersController<F> {
    registry: Mutex<Registry<F>>,
}

impl<F: Fuzzer> FuzzersController<F> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                scans: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Register a fuzzer, assigning it the next campaign id
    pub fn register_scan(
        &self,
        handler: Arc<dyn FuzzerHandler<F>>,
        fuzzer: Arc<F>,
    ) -> Result<usize, FuzzerError> {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        fuzzer.set_scan_id(id)?;
        registry.next_id += 1;
        registry.scans.insert(id, ScanEntry { handler, fuzzer });
        tracing::debug!(scan = id, "Registered fuzzer");
        Ok(id)
    }

    pub fn get_scan(&self, id: usize) -> Option<Arc<F>> {
        self.registry
            .lock()
            .scans
            .get(&id)
            .map(|entry| Arc::clone(&entry.fuzzer))
    }

    pub fn get_all_scans(&self) -> Vec<Arc<F>> {
        self.registry
            .lock()
            .scans
            .values()
            .map(|entry| Arc::clone(&entry.fuzzer))
            .collect()
    }

    /// Campaigns that have not yet stopped or finished
    pub fn get_active_scans(&self) -> Vec<Arc<F>> {
        self.registry
            .lock()
            .scans
            .values()
            .filter(|entry| !entry.fuzzer.is_stopped())
            .map(|entry| Arc::clone(&entry.fuzzer))
            .collect()
    }

    pub fn stop_scan(&self, id: usize) {
        if let Some(fuzzer) = self.get_scan(id) {
            fuzzer.stop_scan();
        }
    }

    pub fn pause_scan(&self, id: usize) {
        if let Some(fuzzer) = self.get_scan(id) {
            fuzzer.pause_scan();
        }
    }

    pub fn resume_scan(&self, id: usize) {
        if let Some(fuzzer) = self.get_scan(id) {
            fuzzer.resume_scan();
        }
    }

    pub fn pause_all_scans(&self) {
        let registry = self.registry.lock();
        for entry in registry.scans.values() {
            entry.fuzzer.pause_scan();
        }
    }

    pub fn resume_all_scans(&self) {
        let registry = self.registry.lock();
        for entry in registry.scans.values() {
            entry.fuzzer.resume_scan();
        }
    }

    pub fn stop_all_scans(&self) {
        let registry = self.registry.lock();
        for entry in registry.scans.values() {
            entry.fuzzer.stop_scan();
        }
    }

    /// Remove one campaign, notifying its handler; returns the removed
    /// fuzzer, if any
    pub fn remove_scan(&self, id: usize) -> Option<Arc<F>> {
        let entry = self.registry.lock().scans.remove(&id);
        entry.map(|entry| {
            entry.handler.scanner_removed(&entry.fuzzer);
            entry.fuzzer
        })
    }

    /// Remove every campaign, notifying the handlers; stops nothing
    pub fn remove_all_scans(&self) -> usize {
        let removed: Vec<ScanEntry<F>> = {
            let mut registry = self.registry.lock();
            std::mem::take(&mut registry.scans).into_values().collect()
        };

        for entry in &removed {
            entry.handler.scanner_removed(&entry.fuzzer);
        }
        removed.len()
    }

    /// Stop, remove and notify only the given handler's campaigns
    pub fn remove_all_scans_for(&self, handler: &Arc<dyn FuzzerHandler<F>>) -> usize {
        let removed: Vec<ScanEntry<F>> = {
            let mut registry = self.registry.lock();
            let ids: Vec<usize> = registry
                .scans
                .iter()
                .filter(|(_, entry)| Arc::ptr_eq(&entry.handler, handler))
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| registry.scans.remove(id))
                .collect()
        };

        for entry in &removed {
            entry.fuzzer.stop_scan();
            entry.handler.scanner_removed(&entry.fuzzer);
        }
        removed.len()
    }

    /// Remove campaigns that have stopped or finished, notifying their
    /// handlers; returns how many were removed
    pub fn remove_finished_scans(&self) -> usize {
        let removed: Vec<ScanEntry<F>> = {
            let mut registry = self.registry.lock();
            let ids: Vec<usize> = registry
                .scans
                .iter()
                .filter(|(_, entry)| entry.fuzzer.is_stopped())
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| registry.scans.remove(id))
                .collect()
        };

        for entry in &removed {
            entry.handler.scanner_removed(&entry.fuzzer);
        }
        removed.len()
    }

    /// Campaigns are constructed and started by concrete fuzzer
    /// implementations; the generic single-target entry point is not
    /// supported.
    pub fn start_scan(&self) -> Result<usize, FuzzerError> {
        Err(FuzzerError::Unsupported(
            "fuzzers are created and started by their concrete implementations",
        ))
    }

    /// No meaningful "last scan" ordering is defined for fuzzers.
    pub fn get_last_scan(&self) -> Result<Arc<F>, FuzzerError> {
        Err(FuzzerError::Unsupported(
            "no last-scan ordering is defined for fuzzers",
        ))
    }
}

impl<F: Fuzzer> Default for FuzzersController<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubFuzzer {
        id: PlMutex<Option<usize>>,
        started: AtomicBool,
        stopped: AtomicBool,
        paused: AtomicBool,
    }

    impl Fuzzer for StubFuzzer {
        fn scan_id(&self) -> Option<usize> {
            *self.id.lock()
        }

        fn set_scan_id(&self, id: usize) -> Result<(), FuzzerError> {
            if self.started.load(Ordering::SeqCst) {
                return Err(FuzzerError::AlreadyStarted);
            }
            *self.id.lock() = Some(id);
            Ok(())
        }

        fn display_name(&self) -> &str {
            "stub"
        }

        fn start_scan(&self) -> Result<(), FuzzerError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn pause_scan(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }

        fn resume_scan(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }

        fn stop_scan(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            self.started.load(Ordering::SeqCst) && !self.is_stopped()
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn progress(&self) -> u64 {
            0
        }

        fn maximum(&self) -> u64 {
            0
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        removals: AtomicUsize,
    }

    impl FuzzerHandler<StubFuzzer> for CountingHandler {
        fn scanner_removed(&self, _fuzzer: &Arc<StubFuzzer>) {
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handler() -> Arc<CountingHandler> {
        Arc::new(CountingHandler::default())
    }

    #[test]
    fn test_ids_are_sequential_and_never_reused() {
        let controller = FuzzersController::new();
        let owner = handler();

        let first = controller
            .register_scan(owner.clone(), Arc::new(StubFuzzer::default()))
            .unwrap();
        let second = controller
            .register_scan(owner.clone(), Arc::new(StubFuzzer::default()))
            .unwrap();
        assert!(second > first);

        controller.remove_scan(second);
        let third = controller
            .register_scan(owner, Arc::new(StubFuzzer::default()))
            .unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_register_assigns_id_to_fuzzer() {
        let controller = FuzzersController::new();
        let fuzzer = Arc::new(StubFuzzer::default());
        let id = controller.register_scan(handler(), fuzzer.clone()).unwrap();
        assert_eq!(fuzzer.scan_id(), Some(id));
        assert!(controller.get_scan(id).is_some());
    }

    #[test]
    fn test_remove_scan_notifies_handler() {
        let controller = FuzzersController::new();
        let owner = handler();
        let id = controller
            .register_scan(owner.clone(), Arc::new(StubFuzzer::default()))
            .unwrap();

        assert!(controller.remove_scan(id).is_some());
        assert_eq!(owner.removals.load(Ordering::SeqCst), 1);
        assert!(controller.get_scan(id).is_none());
        assert!(controller.remove_scan(id).is_none());
    }

    #[test]
    fn test_active_scans_excludes_stopped() {
        let controller = FuzzersController::new();
        let owner = handler();
        let running = Arc::new(StubFuzzer::default());
        let stopped = Arc::new(StubFuzzer::default());

        controller.register_scan(owner.clone(), running).unwrap();
        let stopped_id = controller.register_scan(owner, stopped.clone()).unwrap();
        controller.stop_scan(stopped_id);

        assert_eq!(controller.get_all_scans().len(), 2);
        assert_eq!(controller.get_active_scans().len(), 1);
    }

    #[test]
    fn test_remove_finished_scans_counts_only_stopped() {
        let controller = FuzzersController::new();
        let owner = handler();

        controller
            .register_scan(owner.clone(), Arc::new(StubFuzzer::default()))
            .unwrap();
        let finished = Arc::new(StubFuzzer::default());
        finished.stop_scan();
        controller.register_scan(owner.clone(), finished).unwrap();

        assert_eq!(controller.remove_finished_scans(), 1);
        assert_eq!(owner.removals.load(Ordering::SeqCst), 1);
        assert_eq!(controller.get_all_scans().len(), 1);
    }

    #[test]
    fn test_remove_all_scans_for_handler_stops_and_removes() {
        let controller = FuzzersController::new();
        let mine = handler();
        let other = handler();

        let kept = Arc::new(StubFuzzer::default());
        let dropped = Arc::new(StubFuzzer::default());
        controller.register_scan(other.clone(), kept.clone()).unwrap();
        controller.register_scan(mine.clone(), dropped.clone()).unwrap();

        let mine_dyn: Arc<dyn FuzzerHandler<StubFuzzer>> = mine.clone();
        assert_eq!(controller.remove_all_scans_for(&mine_dyn), 1);
        assert!(dropped.is_stopped());
        assert!(!kept.is_stopped());
        assert_eq!(mine.removals.load(Ordering::SeqCst), 1);
        assert_eq!(other.removals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_all_scans_notifies_without_stopping() {
        let controller = FuzzersController::new();
        let owner = handler();
        let fuzzer = Arc::new(StubFuzzer::default());
        controller.register_scan(owner.clone(), fuzzer.clone()).unwrap();

        assert_eq!(controller.remove_all_scans(), 1);
        assert!(!fuzzer.is_stopped());
        assert_eq!(owner.removals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bulk_pause_and_resume() {
        let controller = FuzzersController::new();
        let owner = handler();
        let fuzzer = Arc::new(StubFuzzer::default());
        controller.register_scan(owner, fuzzer.clone()).unwrap();

        controller.pause_all_scans();
        assert!(fuzzer.is_paused());
        controller.resume_all_scans();
        assert!(!fuzzer.is_paused());
    }

    #[test]
    fn test_generic_entry_points_are_unsupported() {
        let controller: FuzzersController<StubFuzzer> = FuzzersController::new();
        assert!(matches!(
            controller.start_scan(),
            Err(FuzzerError::Unsupported(_))
        ));
        assert!(matches!(
            controller.get_last_scan(),
            Err(FuzzerError::Unsupported(_))
        ));
    }
}
