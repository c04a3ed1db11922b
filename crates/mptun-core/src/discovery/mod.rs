//! Discovery: a lazy sequence of backend lists from a configured source
//! source. `static` fetches once and closes; `interval-polled` is a
//! generic retry loop the static mode simply runs zero times (scaffold for
//! a future pull-discovery kind).

mod static_list;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use crate::config::DiscoveryConfig;
use crate::types::Backend;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("unknown discovery kind: {0:?}")]
    UnknownKind(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Options for a (future) re-fetching discovery kind. `retry_wait_duration
/// == Duration::ZERO` means "fetch once and stop", which is what `static`
/// always does.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOpts {
    pub retry_wait_duration: Duration,
}

impl Default for DiscoveryOpts {
    fn default() -> Self {
        Self { retry_wait_duration: Duration::ZERO }
    }
}

type FetchFn = fn(&DiscoveryConfig) -> Result<Vec<Backend>, DiscoveryError>;

/// Running discovery source: emits successive backend lists on `out`,
/// closing it when the fetch loop exits (fatal fetch error in the static
/// case, or `stop()`).
pub struct Discovery {
    out_rx: mpsc::Receiver<Vec<Backend>>,
    stop_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Discovery {
    /// Build and start the discovery source named `kind`.
    pub fn start(kind: &str, cfg: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let (fetch, opts): (FetchFn, DiscoveryOpts) = match kind {
            "static" => (static_list::fetch, DiscoveryOpts::default()),
            other => return Err(DiscoveryError::UnknownKind(other.to_string())),
        };

        let (out_tx, out_rx) = mpsc::channel(1);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                let result = fetch(&cfg);
                match result {
                    Ok(backends) => {
                        if out_tx.send(backends).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "discovery fetch failed, stopping");
                        return;
                    }
                }

                if opts.retry_wait_duration.is_zero() {
                    return; // one-shot (static)
                }

                tokio::select! {
                    _ = tokio::time::sleep(opts.retry_wait_duration) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_ok() && *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Self { out_rx, stop_tx, handle })
    }

    /// Receive the next backend list. `None` once the source has stopped.
    pub async fn recv(&mut self) -> Option<Vec<Backend>> {
        self.out_rx.recv().await
    }

    /// Signal the fetch loop to stop between iterations.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "discovery task join error");
        }
    }
}
