//! Client
//!
//! Action-based client state machine for the Ridelink coordination channel.
//! Tracks the rides an actor is involved in and keeps them current from
//! pushed events, replays and transition replies.
//!
//! # Architecture
//!
//! The client is Sans-IO. It receives events ([`ClientEvent`]), processes
//! them through pure state machine logic, and returns actions
//! ([`ClientAction`]) for the caller to execute.
//!
//! # Components
//!
//! - [`Client`]: session handshake, request ids, frame handling
//! - [`RideTracker`]: latest known version of each ride; stale and duplicate
//!   events are no-ops
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedClient`]: Client with QUIC transport
//! - [`transport::connect`]: Connect to a server

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod tracker;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, SessionState};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use ridelink_proto::{Actor, ActorId, RideId};
pub use tracker::RideTracker;
