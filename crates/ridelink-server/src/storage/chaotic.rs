//! Chaotic store wrapper for fault injection testing
//!
//! Wraps another [`RideStore`] and fails a seeded fraction of operations with
//! [`StorageError::Io`]. A failed operation never reaches the inner store, so
//! an injected failure is always a clean "nothing happened".

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use ridelink_proto::{Actor, Ride, RideId, RideState};

use super::{RideStore, StorageError};

/// Store wrapper that randomly injects I/O failures.
#[derive(Clone)]
pub struct ChaoticStore<S: RideStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operations: Arc<AtomicUsize>,
    injected: Arc<AtomicUsize>,
}

/// Linear congruential generator, so chaos runs replay from a seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: RideStore> ChaoticStore<S> {
    /// Wrap `inner`, failing roughly `failure_rate` of operations.
    ///
    /// The rate is clamped to [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap with an explicit seed for reproducible chaos.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operations: Arc::new(AtomicUsize::new(0)),
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Number of operations that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Result<(), StorageError> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let fail =
            self.rng.lock().unwrap_or_else(PoisonError::into_inner).next() < self.failure_rate;
        if fail {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: RideStore> RideStore for ChaoticStore<S> {
    fn insert(&self, ride: &Ride) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.insert(ride)
    }

    fn load(&self, ride_id: RideId) -> Result<Ride, StorageError> {
        self.roll()?;
        self.inner.load(ride_id)
    }

    fn compare_and_swap<F>(
        &self,
        ride_id: RideId,
        expected_version: u64,
        mutator: F,
    ) -> Result<Ride, StorageError>
    where
        F: FnOnce(&Ride) -> Ride,
    {
        self.roll()?;
        self.inner.compare_and_swap(ride_id, expected_version, mutator)
    }

    fn active_rides(&self, actor: Actor) -> Result<Vec<Ride>, StorageError> {
        self.roll()?;
        self.inner.active_rides(actor)
    }

    fn rides_in_state(&self, state: RideState) -> Result<Vec<Ride>, StorageError> {
        self.roll()?;
        self.inner.rides_in_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn zero_rate_never_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);
        for _ in 0..100 {
            assert!(store.rides_in_state(RideState::Requested).is_ok());
        }
        assert_eq!(store.operation_count(), 100);
        assert_eq!(store.injected_failures(), 0);
    }

    #[test]
    fn full_rate_always_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0);
        for _ in 0..10 {
            assert!(matches!(store.load(1), Err(StorageError::Io(_))));
        }
        assert_eq!(store.injected_failures(), 10);
    }

    #[test]
    fn same_seed_same_failures() {
        let run = |seed| {
            let store = ChaoticStore::with_seed(MemoryStore::new(), 0.3, seed);
            (0..50).map(|_| store.load(1).is_err_and(|e| e.is_backend_failure())).collect::<Vec<_>>()
        };

        assert_eq!(run(7), run(7));
    }
}
