//! gmd - game master daemon
//!
//! Rules resolution and state tracking for a Daggerheart-style tabletop
//! game, driven through tool calls by a narrative layer (typically a
//! language model acting as game master).

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod rules;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub use config::{Config, RulesConfig};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use gateway::{ToolCall, ToolGateway, ToolResponse};

/// The gmd server instance
pub struct Server {
    config: Config,
    gateway: Arc<ToolGateway>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let gateway = ToolGateway::shared(config.rules.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            gateway,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Get the tool gateway
    pub fn gateway(&self) -> Arc<ToolGateway> {
        self.gateway.clone()
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(self.gateway.clone())
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("gmd listening on {}", local_addr);

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("gmd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
