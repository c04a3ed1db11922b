//! Health-check supervisor and worker. `Healthcheck::new` is the explicit
//! constructor for a configured check kind: it returns a supervisor
//! exposing `In`/`Out` channels and `start`/`stop`.

mod ping;
mod supervisor;
mod worker;

use tokio::sync::mpsc;

use crate::config::HealthcheckConfig;
use crate::types::{CheckResult, Target};

#[derive(Debug, thiserror::Error)]
pub enum HealthcheckError {
    #[error("unknown healthcheck kind: {0:?}")]
    UnknownKind(String),
}

/// A running (or no-op) healthcheck supervisor for one configured kind.
pub struct Healthcheck {
    kind: String,
    in_tx: mpsc::Sender<Vec<Target>>,
    in_rx: Option<mpsc::Receiver<Vec<Target>>>,
    out_rx: mpsc::Receiver<CheckResult>,
    out_tx: Option<mpsc::Sender<CheckResult>>,
    cfg: HealthcheckConfig,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Healthcheck {
    pub fn new(kind: &str, cfg: HealthcheckConfig) -> Result<Self, HealthcheckError> {
        if !matches!(kind, "none" | "ping") {
            return Err(HealthcheckError::UnknownKind(kind.to_string()));
        }

        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::channel(64);

        Ok(Self {
            kind: kind.to_string(),
            in_tx,
            in_rx: Some(in_rx),
            out_rx,
            out_tx: Some(out_tx),
            cfg,
            handle: None,
        })
    }

    /// Sender for pushing the current target set. Cheap to clone.
    pub fn in_tx(&self) -> mpsc::Sender<Vec<Target>> {
        self.in_tx.clone()
    }

    /// Start the supervisor loop. `kind == "none"` never spawns workers —
    /// the supervisor task just drains `in_rx` so senders don't block.
    pub fn start(&mut self) {
        let in_rx = self.in_rx.take().expect("start called twice");
        if self.kind == "none" {
            self.handle = Some(tokio::spawn(drain(in_rx)));
            return;
        }

        let cfg = self.cfg.clone();
        let out_tx = self.out_tx.take().expect("start called twice");
        self.handle = Some(tokio::spawn(supervisor::run(cfg, in_rx, out_tx)));
    }

    pub async fn recv(&mut self) -> Option<CheckResult> {
        self.out_rx.recv().await
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn drain(mut in_rx: mpsc::Receiver<Vec<Target>>) {
    while in_rx.recv().await.is_some() {}
}
