//! Simulation environment.
//!
//! Time comes from tokio's clock, which turmoil drives virtually, so sweeps
//! and delivery timeouts fire on simulated time. The wall clock follows the
//! simulation's elapsed time so every host agrees on it.
//!
//! Randomness comes from a seeded ChaCha stream shared by all clones, so ride
//! and session ids repeat across runs with the same seed.

#![allow(clippy::disallowed_types, reason = "RNG state is only touched synchronously")]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use ridelink_core::env::Environment;
use tokio::time::Instant;

/// Wall clock reading at simulation start (2023-11-14T22:13:20Z).
const DEFAULT_EPOCH_MS: u64 = 1_700_000_000_000;

/// Seed used by [`SimEnv::new`].
const DEFAULT_SEED: u64 = 0;

/// Deterministic environment for simulations.
#[derive(Clone, Debug)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    started: Instant,
    epoch_ms: u64,
}

impl SimEnv {
    /// Environment with the default seed.
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment whose RNG is seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            started: Instant::now(),
            epoch_ms: DEFAULT_EPOCH_MS,
        }
    }

    /// Start the simulated wall clock at `epoch_ms` instead.
    #[must_use]
    pub fn with_epoch(mut self, epoch_ms: u64) -> Self {
        self.epoch_ms = epoch_ms;
        self
    }

    /// Virtual time elapsed: the simulation's clock inside turmoil, tokio's
    /// (possibly paused) clock outside it.
    pub fn elapsed(&self) -> Duration {
        turmoil::sim_elapsed()
            .unwrap_or_else(|| Instant::now().saturating_duration_since(self.started))
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }

    fn wall_clock_ms(&self) -> u64 {
        self.epoch_ms + self.elapsed().as_millis() as u64
    }
}
