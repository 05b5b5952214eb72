//! gRPC server for the Hivebot daemon.

mod config;
mod subbot_svc;

pub use config::ServerConfig;
pub use subbot_svc::SubbotServiceImpl;

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tonic::transport::Server;
use tracing::info;

use hivebot_proto::v1::subbot_service_server::SubbotServiceServer;

use crate::gateway::EventGateway;
use crate::launch::LaunchCoordinator;
use crate::storage::Database;
use crate::supervisor::SubbotSupervisor;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// gRPC server handle.
pub struct GrpcServer {
    config: ServerConfig,
    db: Database,
    coordinator: Arc<LaunchCoordinator>,
    supervisor: Arc<SubbotSupervisor>,
    gateway: Arc<EventGateway>,
}

impl GrpcServer {
    /// Create a new gRPC server with all components wired together.
    pub const fn new(
        config: ServerConfig,
        db: Database,
        coordinator: Arc<LaunchCoordinator>,
        supervisor: Arc<SubbotSupervisor>,
        gateway: Arc<EventGateway>,
    ) -> Self {
        Self {
            config,
            db,
            coordinator,
            supervisor,
            gateway,
        }
    }

    /// Start serving on TCP socket.
    pub async fn serve_tcp(self, addr: SocketAddr) -> Result<(), ServerError> {
        let subbot_service = SubbotServiceImpl::new(
            self.db.clone(),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.supervisor),
            Arc::clone(&self.gateway),
        );

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<SubbotServiceServer<SubbotServiceImpl>>()
            .await;

        info!(%addr, "Starting gRPC server on TCP");

        Server::builder()
            .http2_keepalive_interval(Some(self.config.keepalive_interval))
            .http2_keepalive_timeout(Some(self.config.keepalive_timeout))
            .add_service(health_service)
            .add_service(SubbotServiceServer::new(subbot_service))
            .serve(addr)
            .await?;

        Ok(())
    }

    /// Get the server configuration.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the database.
    pub const fn db(&self) -> &Database {
        &self.db
    }
}
