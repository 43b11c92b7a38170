//! Ridelink coordination server.
//!
//! Wraps [`ridelink_core`]'s pure ride logic with storage, live sessions and a
//! QUIC listener.
//!
//! # Architecture
//!
//! ```text
//!  QUIC stream ──► connection ──► CoordinationService ──► RideStore (CAS)
//!                      ▲                  │
//!                      │                  ▼
//!                  Session ◄──── ConnectionRegistry (replay queues)
//! ```
//!
//! # Components
//!
//! - [`CoordinationService`]: the only writer of rides; persists, then notifies
//! - [`ConnectionRegistry`]: one live session per actor, bounded replay queues
//! - [`RideStore`]: versioned ride records ([`MemoryStore`], [`RedbStore`])
//! - [`Server`]: QUIC accept loop, expiry sweeper, graceful shutdown
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
mod coordination_error;
mod coordinator;
mod error;
mod registry;
pub mod session;
pub mod storage;
mod system_env;
mod transport;

use std::{future::Future, net::SocketAddr, path::PathBuf, time::Duration};

pub use connection::serve_connection;
pub use coordination_error::CoordinationError;
pub use coordinator::{CoordinationService, CoordinatorConfig};
pub use error::ServerError;
pub use registry::{
    ConnectionRegistry, DeliveryOutcome, JoinOutcome, QueueCause, RegistryConfig,
};
use ridelink_core::env::Environment;
use ridelink_proto::CloseReason;
pub use session::{DeliveryError, FrameWriter, Session, SessionTransport};
pub use storage::{ChaoticStore, MemoryStore, RedbStore, RideStore, StorageError};
pub use system_env::SystemEnv;
pub use transport::{QuinnConnection, QuinnTransport};

/// Time given to closing sessions to flush their `Goodbye` before the QUIC
/// endpoint goes away.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<PathBuf>,
    /// Redb database file; rides are kept in memory when unset
    pub db_path: Option<PathBuf>,
    /// Session and replay queue tuning
    pub registry: RegistryConfig,
    /// Request expiry tuning
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            db_path: None,
            registry: RegistryConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Production Ridelink server.
pub struct Server<S: RideStore> {
    coordinator: CoordinationService<SystemEnv, S>,
    transport: QuinnTransport,
}

impl<S: RideStore> Server<S> {
    /// Bind the QUIC endpoint and build the coordinator over `store`.
    pub fn bind(config: ServerRuntimeConfig, store: S) -> Result<Self, ServerError> {
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        let coordinator = CoordinationService::new(
            SystemEnv::new(),
            store,
            ConnectionRegistry::new(config.registry),
            config.coordinator,
        );

        Ok(Self { coordinator, transport })
    }

    /// Coordinator shared by all connections.
    ///
    /// Exposed for the (external) HTTP adapter, which creates rides and issues
    /// transitions on behalf of callers that are not connected over QUIC.
    pub fn coordinator(&self) -> &CoordinationService<SystemEnv, S> {
        &self.coordinator
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Serve until the process is killed.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then close every session with
    /// `server-shutdown`.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %self.transport.local_addr()?, "server starting");

        let sweeper = {
            let coordinator = self.coordinator.clone();
            tokio::spawn(async move { coordinator.run_sweeper().await })
        };

        tokio::pin!(shutdown);
        loop {
            let incoming = tokio::select! {
                () = &mut shutdown => break,
                incoming = self.transport.accept() => incoming,
            };
            let Some(incoming) = incoming else {
                tracing::warn!("endpoint closed");
                break;
            };

            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, coordinator).await {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }

        sweeper.abort();

        let closed = self.coordinator.registry().close_all(CloseReason::ServerShutdown);
        tracing::info!(sessions = closed, "server shutting down");

        self.coordinator.env().sleep(SHUTDOWN_GRACE).await;
        self.transport.close("server shutdown");

        Ok(())
    }
}

/// Finish the handshake, take the client's stream and serve it.
async fn handle_connection<S: RideStore>(
    incoming: quinn::Incoming,
    coordinator: CoordinationService<SystemEnv, S>,
) -> Result<(), ServerError> {
    let conn = QuinnConnection::establish(incoming).await?;
    tracing::debug!(remote = %conn.remote_addr(), "connection accepted");

    let (send, recv) = conn.accept_bi().await?;
    let result = serve_connection(recv, send, coordinator).await;

    conn.close(0u32.into(), b"closed");
    result
}
