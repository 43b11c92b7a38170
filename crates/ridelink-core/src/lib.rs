//! Ride lifecycle logic.
//!
//! Pure, I/O-free building blocks used by the server and the simulation
//! harness:
//!
//! - [`machine`]: validates ride transitions and decides who is notified
//! - [`ride`]: creation of new rides from a rider's request
//! - [`env`]: time and randomness abstraction for deterministic tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod machine;
pub mod ride;

pub use error::{RequestError, TransitionError};
pub use machine::{Notification, Transition};
pub use ride::RideRequest;
