//! Environment abstraction for deterministic testing.
//!
//! Decouples coordination logic from system resources (time, randomness).
//! Production uses the OS clock and RNG; simulations plug in a virtual clock
//! and a seeded RNG so every run is reproducible.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`, simulations use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (sweeps, timeouts) sleeps; the state machine never
    /// does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same seed, simulation environments produce the same bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall-clock time as Unix milliseconds.
    ///
    /// Used for ride timestamps and request expiry, which must survive
    /// restarts and so cannot use the monotonic clock.
    fn wall_clock_ms(&self) -> u64;

    /// Generates a random `u64`. Used for session ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`. Used for ride ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

/// Deterministic environment for unit tests.
pub mod test_utils {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use super::Environment;

    /// Manually advanced clock and counter-based RNG.
    ///
    /// Clones share the clock, so a test can hold one handle and advance time
    /// seen by the code under test.
    #[derive(Clone, Debug)]
    pub struct MockEnv {
        elapsed_ms: Arc<AtomicU64>,
        epoch_ms: u64,
        counter: Arc<AtomicU64>,
    }

    impl MockEnv {
        /// Start the wall clock at `epoch_ms`.
        pub fn new(epoch_ms: u64) -> Self {
            Self {
                elapsed_ms: Arc::new(AtomicU64::new(0)),
                epoch_ms,
                counter: Arc::new(AtomicU64::new(1)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, duration: Duration) {
            self.elapsed_ms.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new(1_700_000_000_000)
        }
    }

    impl Environment for MockEnv {
        type Instant = Duration;

        fn now(&self) -> Self::Instant {
            Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for chunk in buffer.chunks_mut(8) {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                let bytes = n.to_be_bytes();
                chunk.copy_from_slice(&bytes[8 - chunk.len()..]);
            }
        }

        fn wall_clock_ms(&self) -> u64 {
            self.epoch_ms + self.elapsed_ms.load(Ordering::SeqCst)
        }
    }

}
