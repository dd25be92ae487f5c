//! skirmish - tabletop combat server daemon
//!
//! Rules-accurate dice, attack and saving-throw resolution, status
//! conditions, initiative and NPC auto-play, served per session over
//! WebSocket.

pub mod api;
pub mod combat;
pub mod config;
pub mod reference;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub use config::Config;
use reference::ReferenceLibrary;
use session::SessionManager;

/// The skirmish server instance
pub struct Server {
    config: Config,
    sessions: Arc<SessionManager>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance, loading its reference data
    pub async fn new(config: Config) -> Result<Self> {
        let reference = match &config.reference_path {
            Some(path) => ReferenceLibrary::load(path)
                .await
                .with_context(|| format!("loading reference data from {}", path.display()))?,
            None => ReferenceLibrary::starter().context("loading starter reference data")?,
        };
        let sessions = Arc::new(SessionManager::new(
            Arc::new(reference),
            config.autoplay_max_steps,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            sessions,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the session manager
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(api::AppState {
            sessions: self.sessions.clone(),
            config: Arc::new(self.config.clone()),
        })
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("skirmish listening on {}", local_addr);

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("skirmish shutdown complete");
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
