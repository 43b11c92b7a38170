//! Simulation server wrapper for testing with turmoil.
//!
//! `SimServer` runs the real connection handler over turmoil TCP instead of
//! QUIC streams. The coordinator is built outside the simulated host so
//! tests can create rides and inspect the registry from client hosts.

use std::io;

use ridelink_server::{
    ConnectionRegistry, CoordinationService, CoordinatorConfig, MemoryStore, RegistryConfig,
    serve_connection,
};
use turmoil::net::TcpListener;

use crate::SimEnv;

/// Coordinator used in simulations.
pub type SimCoordinator = CoordinationService<SimEnv, MemoryStore>;

/// Simulation server for testing with turmoil.
pub struct SimServer {
    coordinator: SimCoordinator,
    listener: TcpListener,
}

impl SimServer {
    /// Build a coordinator over an in-memory store.
    pub fn coordinator(
        env: SimEnv,
        registry: RegistryConfig,
        config: CoordinatorConfig,
    ) -> SimCoordinator {
        CoordinationService::new(env, MemoryStore::new(), ConnectionRegistry::new(registry), config)
    }

    /// Bind a listener for `coordinator`. Call from inside a turmoil host.
    pub async fn bind(address: &str, coordinator: SimCoordinator) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { coordinator, listener })
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            tracing::debug!(%addr, "sim connection accepted");

            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                let (reader, writer) = tokio::io::split(stream);
                if let Err(e) = serve_connection(reader, writer, coordinator).await {
                    tracing::debug!(error = %e, "sim connection ended with error");
                }
            });
        }
    }

    /// Like [`run`](Self::run), with the expiry sweeper running alongside.
    pub async fn run_with_sweeper(self) -> io::Result<()> {
        let coordinator = self.coordinator.clone();
        let sweeper = tokio::spawn(async move { coordinator.run_sweeper().await });

        let result = self.run().await;
        sweeper.abort();
        result
    }
}
