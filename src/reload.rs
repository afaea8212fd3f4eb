//! Hot-reload manager owning the active model set.
//!
//! The active set lives in an [`ArcSwap`] cell. Readers take a reference with
//! a lock-free load and keep it for the whole request, so a swap never
//! changes the model under a request that is already running. A superseded
//! set is freed when the last request holding it finishes.
//!
//! Writers are serialized by a mutex that readers never touch.

use crate::error::Result;
use crate::models::model_set::ModelSet;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Owns the single mutable reference to the serving model set
pub struct HotReloadManager {
    active: ArcSwap<ModelSet>,
    writer: Mutex<()>,
    generation: AtomicU64,
}

impl HotReloadManager {
    /// Create a manager serving `initial`.
    ///
    /// The initial set goes through the same structural checks as a swap.
    pub fn new(initial: ModelSet) -> Result<Self> {
        initial.validate_structure()?;

        info!(
            version = %initial.version(),
            components = initial.predictor().component_count(),
            "Initial model set active"
        );

        Ok(Self {
            active: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// Reference to the model set active right now.
    ///
    /// Never blocks; later swaps do not affect the returned set.
    pub fn get_active(&self) -> Arc<ModelSet> {
        self.active.load_full()
    }

    /// Version of the active set
    pub fn current_version(&self) -> String {
        self.active.load().version().to_string()
    }

    /// Number of successful swaps since construction
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Atomically replace the active set.
    ///
    /// The candidate is checked before anything becomes visible; on failure
    /// the previous set keeps serving and no state changes. Returns the
    /// superseded set.
    pub fn swap(&self, new_set: ModelSet) -> Result<Arc<ModelSet>> {
        if let Err(e) = new_set.validate_structure() {
            warn!(
                candidate = %new_set.version(),
                active = %self.current_version(),
                error = %e,
                "Rejected model set swap"
            );
            return Err(e);
        }

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let new_version = new_set.version().to_string();
        let previous = self.active.swap(Arc::new(new_set));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        info!(
            previous = %previous.version(),
            active = %new_version,
            generation = generation,
            in_flight_on_previous = Arc::strong_count(&previous) - 1,
            "Model set swapped"
        );

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServingError;
    use crate::models::aggregator::EnsembleWeights;
    use crate::models::inference::tests::{constant, features, request_schema};
    use crate::models::inference::EnsemblePredictor;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    /// Single-component set whose prediction equals `value`
    fn set_with_value(version: &str, value: f64) -> ModelSet {
        let weights = EnsembleWeights::equal(&["only"]).unwrap();
        ModelSet::new(
            version,
            EnsemblePredictor::new(request_schema(), vec![constant("only", value)], weights),
        )
    }

    fn mismatched_set(version: &str) -> ModelSet {
        let weights = EnsembleWeights::equal(&["a", "b"]).unwrap();
        ModelSet::new(
            version,
            EnsemblePredictor::new(request_schema(), vec![constant("a", 1.0)], weights),
        )
    }

    #[test]
    fn test_swap_changes_version() {
        let manager = HotReloadManager::new(set_with_value("1", 1.0)).unwrap();
        assert_eq!(manager.current_version(), "1");

        let previous = manager.swap(set_with_value("2", 2.0)).unwrap();

        assert_eq!(previous.version(), "1");
        assert_eq!(manager.current_version(), "2");
        assert_eq!(manager.generation(), 1);
    }

    #[test]
    fn test_in_flight_reference_survives_swap() {
        let manager = HotReloadManager::new(set_with_value("1", 1.0)).unwrap();

        let in_flight = manager.get_active();
        manager.swap(set_with_value("2", 2.0)).unwrap();

        // Started before the swap: still sees version 1 end to end
        assert_eq!(in_flight.version(), "1");
        assert_eq!(in_flight.predictor().predict(&features()).unwrap(), 1.0);

        // Started after the swap: sees version 2
        let fresh = manager.get_active();
        assert_eq!(fresh.version(), "2");
        assert_eq!(fresh.predictor().predict(&features()).unwrap(), 2.0);
    }

    #[test]
    fn test_superseded_set_released_after_last_reader() {
        let manager = HotReloadManager::new(set_with_value("1", 1.0)).unwrap();
        let in_flight = manager.get_active();
        let watcher = Arc::downgrade(&in_flight);

        drop(manager.swap(set_with_value("2", 2.0)).unwrap());
        assert!(watcher.upgrade().is_some());

        drop(in_flight);
        assert!(watcher.upgrade().is_none());
    }

    #[test]
    fn test_invalid_swap_keeps_previous_state() {
        let manager = HotReloadManager::new(set_with_value("1", 1.0)).unwrap();
        let before = manager.get_active();

        let err = manager.swap(mismatched_set("2")).unwrap_err();

        assert!(matches!(err, ServingError::IncompatibleSchema(_)));
        assert_eq!(manager.current_version(), "1");
        assert_eq!(manager.generation(), 0);
        assert!(Arc::ptr_eq(&before, &manager.get_active()));
    }

    #[test]
    fn test_invalid_initial_set_rejected() {
        assert!(HotReloadManager::new(mismatched_set("1")).is_err());
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_state() {
        let manager = Arc::new(HotReloadManager::new(set_with_value("1", 1.0)).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    let mut observed = 0u64;
                    loop {
                        let set = manager.get_active();
                        let value = set.predictor().predict(&features()).unwrap();
                        // Version and prediction always come from the same set
                        let expected: f64 = set.version().parse().unwrap();
                        assert_eq!(value, expected);
                        observed += 1;
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    observed
                })
            })
            .collect();

        for version in 2..=50 {
            manager
                .swap(set_with_value(&version.to_string(), version as f64))
                .unwrap();
            thread::sleep(Duration::from_micros(200));
        }
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(manager.current_version(), "50");
        assert_eq!(manager.generation(), 49);
    }
}
