//! Server: owns the scheduler, the session manager, and the listener task,
//! and wires the live-backends feed from the first into the second.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::BindError;
use crate::listener;
use crate::scheduler::{Scheduler, SchedulerBuildError};
use crate::session::SessionManager;

#[derive(Debug, thiserror::Error)]
pub enum ServerStartError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerBuildError),
}

/// A running mptun server: one bound UDP socket, a scheduler computing
/// live backends, a session table keyed off the consistent ring, and a
/// listener task copying client traffic into sessions.
pub struct Server {
    scheduler: Scheduler,
    sessions: SessionManager,
    listener_stop_tx: watch::Sender<bool>,
    listener_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    /// Bind the configured address, start the scheduler and session
    /// manager, and spawn the listener loop.
    pub async fn start(cfg: &ServerConfig) -> Result<Self, ServerStartError> {
        let socket = UdpSocket::bind(&cfg.bind)
            .await
            .map_err(|source| BindError::Udp { addr: cfg.bind.clone(), source })?;
        let socket = Arc::new(socket);
        info!(bind = %cfg.bind, "listening");

        let mut scheduler = Scheduler::build(cfg)?.start()?;
        let live_backends_rx = scheduler.live_backends_rx();

        let sessions = SessionManager::start(socket.clone(), live_backends_rx, Duration::ZERO);

        let (listener_stop_tx, listener_stop_rx) = watch::channel(false);
        let listener_handle =
            tokio::spawn(listener::run(socket, sessions.handle(), listener_stop_rx));

        Ok(Self {
            scheduler,
            sessions,
            listener_stop_tx,
            listener_handle: Some(listener_handle),
        })
    }

    /// Stop the listener, then the session manager, then the scheduler, in
    /// that order so in-flight forwards still have somewhere to land while
    /// shutting down.
    pub async fn stop(&mut self) {
        let _ = self.listener_stop_tx.send(true);
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.await;
        }
        self.sessions.stop().await;
        self.scheduler.stop().await;
        info!("server stopped");
    }
}
