//! Supervisor: spawns/retires one worker per target as the target set
//! changes, fans CheckResults into a single output channel.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tracing::info;

use super::worker::Worker;
use crate::config::HealthcheckConfig;
use crate::types::{CheckResult, Target};

struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

/// Runs the supervisor loop until `in_rx` closes. Exactly one worker runs
/// per target in the most recently received set.
pub async fn run(
    cfg: HealthcheckConfig,
    mut in_rx: mpsc::Receiver<Vec<Target>>,
    out_tx: mpsc::Sender<CheckResult>,
) {
    let mut workers: HashMap<Target, WorkerHandle> = HashMap::new();

    while let Some(targets) = in_rx.recv().await {
        let wanted: std::collections::HashSet<Target> = targets.into_iter().collect();

        let to_remove: Vec<Target> =
            workers.keys().filter(|t| !wanted.contains(t)).cloned().collect();
        for target in to_remove {
            if let Some(handle) = workers.remove(&target) {
                let _ = handle.stop_tx.send(true);
                handle.join.abort();
                info!(target = %target, "healthcheck worker retired");
            }
        }

        for target in wanted {
            if workers.contains_key(&target) {
                continue;
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            let worker = Worker::new(target.clone(), cfg.clone(), out_tx.clone(), stop_rx);
            let join = tokio::spawn(worker.run());
            info!(target = %target, "healthcheck worker spawned");
            workers.insert(target, WorkerHandle { stop_tx, join });
        }
    }

    for (_, handle) in workers {
        let _ = handle.stop_tx.send(true);
        handle.join.abort();
    }
}
