//! Production environment: system clocks and the OS RNG.
//!
//! Behaviour is non-deterministic by nature; simulations use the harness's
//! seeded environment instead.

use std::time::Duration;

use ridelink_core::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// Uses `std::time::Instant::now()` for monotonic time, the system clock for
/// ride timestamps, `tokio::time::sleep()` for the expiry sweep, and getrandom
/// for ride and session ids.
///
/// # Panics
///
/// Panics if the OS RNG fails. Ids must be unguessable and unique; a server
/// without working randomness cannot hand them out.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }

    /// A clock set before 1970 reads as the epoch rather than failing.
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}
