//! Deterministic simulation harness for Ridelink.
//!
//! Turmoil-based implementations of the Environment and session transport
//! seams for deterministic, reproducible testing of reconnects, supersession
//! and request expiry.
//!
//! # Components
//!
//! - [`SimEnv`]: seeded RNG and turmoil's virtual clock
//! - [`RecordingTransport`]: in-memory session transport with failure knobs
//! - [`SimServer`]: coordination service behind a turmoil TCP listener
//! - [`SimClient`]: Sans-IO client driven over a turmoil TCP stream

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod recording;
pub mod sim_client;
pub mod sim_env;
pub mod sim_server;

pub use recording::RecordingTransport;
pub use sim_client::SimClient;
pub use sim_env::SimEnv;
pub use sim_server::{SimCoordinator, SimServer};
