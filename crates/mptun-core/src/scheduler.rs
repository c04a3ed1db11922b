//! Scheduler: owns the authoritative `Target -> Backend` table, single
//! event loop reached only via channels.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::balance::{self, BalanceError, Balancer};
use crate::config::ServerConfig;
use crate::discovery::{Discovery, DiscoveryError};
use crate::healthcheck::{Healthcheck, HealthcheckError};
use crate::types::{Backend, CheckResult, Context, Target};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SchedulerBuildError {
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Healthcheck(#[from] HealthcheckError),
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum ElectError {
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error("scheduler is not running")]
    NotRunning,
}

struct ElectRequest {
    ctx: Box<dyn Context>,
    reply: oneshot::Sender<Result<Backend, BalanceError>>,
}

/// Public handle to a running Scheduler. The actual state (backend map,
/// list, discovery, healthcheck) lives inside the spawned event-loop task —
/// never exposed by reference.
pub struct Scheduler {
    elect_tx: mpsc::Sender<ElectRequest>,
    live_rx: Option<mpsc::Receiver<Vec<Backend>>>,
    stop_tx: watch::Sender<bool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// Build (but do not start) a scheduler from server config.
    pub fn build(cfg: &ServerConfig) -> Result<SchedulerBuilder, SchedulerBuildError> {
        let balancer = balance::new(&cfg.balance)?;
        let discovery_kind = cfg.discovery.kind.clone();
        let discovery_cfg = cfg.discovery.clone();
        let healthcheck_kind = cfg.healthcheck.kind.clone();
        let healthcheck_cfg = cfg.healthcheck.clone();
        Ok(SchedulerBuilder { balancer, discovery_kind, discovery_cfg, healthcheck_kind, healthcheck_cfg })
    }

    /// `TakeBackend`: RPC via the request channel, runs the balancer over
    /// the current live subset inside the loop.
    pub async fn take_backend(&self, ctx: Box<dyn Context>) -> Result<Backend, ElectError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.elect_tx
            .send(ElectRequest { ctx, reply: reply_tx })
            .await
            .map_err(|_| ElectError::NotRunning)?;
        reply_rx.await.map_err(|_| ElectError::NotRunning)?.map_err(ElectError::from)
    }

    /// Take the live-backends receiver. Every 5s it yields a snapshot of
    /// currently-live backends; the Scheduler blocks on this send if no
    /// consumer is ready (intentional backpressure).
    pub fn live_backends_rx(&mut self) -> mpsc::Receiver<Vec<Backend>> {
        self.live_rx.take().expect("live_backends_rx already taken")
    }

    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub struct SchedulerBuilder {
    balancer: Box<dyn Balancer>,
    discovery_kind: String,
    discovery_cfg: crate::config::DiscoveryConfig,
    healthcheck_kind: String,
    healthcheck_cfg: crate::config::HealthcheckConfig,
}

impl SchedulerBuilder {
    /// Starts discovery, the health-check supervisor, the event loop, and
    /// the 5s publish-live ticker.
    pub fn start(self) -> Result<Scheduler, SchedulerBuildError> {
        let discovery = Discovery::start(&self.discovery_kind, self.discovery_cfg)?;
        let mut healthcheck = Healthcheck::new(&self.healthcheck_kind, self.healthcheck_cfg)?;
        healthcheck.start();

        let (elect_tx, elect_rx) = mpsc::channel(32);
        let (live_tx, live_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_loop(self.balancer, discovery, healthcheck, elect_rx, live_tx, stop_rx));

        Ok(Scheduler { elect_tx, live_rx: Some(live_rx), stop_tx, handle: Some(handle) })
    }
}

struct BackendTable {
    order: Vec<Target>,
    by_target: HashMap<Target, Backend>,
}

impl BackendTable {
    fn new() -> Self {
        Self { order: Vec::new(), by_target: HashMap::new() }
    }

    /// Merge an incoming discovery list: surviving Targets keep their Stats
    /// identity, new Targets are inserted fresh, absent Targets are
    /// dropped. The new list defines membership.
    fn handle_backends_update(&mut self, incoming: Vec<Backend>) {
        let mut order = Vec::with_capacity(incoming.len());
        let mut by_target = HashMap::with_capacity(incoming.len());

        for backend in incoming {
            let merged = match self.by_target.remove(&backend.target) {
                Some(existing) => existing,
                None => backend,
            };
            order.push(merged.target.clone());
            by_target.insert(merged.target.clone(), merged);
        }

        self.order = order;
        self.by_target = by_target;
    }

    fn handle_check_result(&mut self, result: CheckResult) {
        match self.by_target.get_mut(&result.target) {
            Some(backend) => {
                backend.stats.live = result.live;
                backend.stats.rtt = result.rtt;
                backend.stats.loss = result.loss;
            }
            None => warn!(target = %result.target, "check result for unknown target, ignoring"),
        }
    }

    fn targets(&self) -> Vec<Target> {
        self.order.clone()
    }

    fn all(&self) -> Vec<Backend> {
        self.order.iter().filter_map(|t| self.by_target.get(t)).cloned().collect()
    }

    fn live(&self) -> Vec<Backend> {
        self.all().into_iter().filter(|b| b.stats.live).collect()
    }
}

async fn run_loop(
    balancer: Box<dyn Balancer>,
    mut discovery: Discovery,
    mut healthcheck: Healthcheck,
    mut elect_rx: mpsc::Receiver<ElectRequest>,
    live_tx: mpsc::Sender<Vec<Backend>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!("starting scheduler");
    let mut table = BackendTable::new();
    let mut publish_ticker = tokio::time::interval(PUBLISH_INTERVAL);
    publish_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            backends = discovery.recv() => {
                match backends {
                    Some(backends) => {
                        table.handle_backends_update(backends);
                        let _ = healthcheck.in_tx().send(table.targets()).await;
                        // Publish right away too, not just on the next tick, so the
                        // session layer doesn't sit without any live backend for up
                        // to a full PUBLISH_INTERVAL after startup or a membership
                        // change. The periodic tick below still runs independently
                        // for churn from healthcheck results between discoveries.
                        let _ = live_tx.send(table.live()).await;
                    }
                    None => {
                        // discovery source closed; table stays as-is.
                    }
                }
            }

            Some(result) = healthcheck.recv() => {
                table.handle_check_result(result);
            }

            Some(req) = elect_rx.recv() => {
                let live = table.live();
                let result = balancer.elect(req.ctx.as_ref(), &live);
                let _ = req.reply.send(result);
            }

            _ = publish_ticker.tick() => {
                if live_tx.send(table.live()).await.is_err() {
                    // no consumer left; keep running, next tick retries.
                }
            }

            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!("stopping scheduler");
                    discovery.stop();
                    healthcheck.stop().await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UdpContext;

    fn backend(host: &str, port: u16, live: bool) -> Backend {
        let mut b = Backend::new(Target::new(host, port));
        b.stats.live = live;
        b
    }

    #[test]
    fn merge_preserves_stats_identity_for_survivors() {
        let mut table = BackendTable::new();
        let mut seeded = backend("10.0.0.1", 9001, true);
        seeded.stats.rtt = Duration::from_millis(42);
        table.handle_backends_update(vec![seeded]);

        // Discovery refresh re-describes the same target fresh (Live unset).
        table.handle_backends_update(vec![backend("10.0.0.1", 9001, false)]);

        let b = table.by_target.get(&Target::new("10.0.0.1", 9001)).unwrap();
        assert!(b.stats.live, "stats must be preserved, not reset, across refresh");
        assert_eq!(b.stats.rtt, Duration::from_millis(42));
    }

    #[test]
    fn dropped_targets_are_removed() {
        let mut table = BackendTable::new();
        table.handle_backends_update(vec![backend("a", 1, true), backend("b", 1, true)]);
        table.handle_backends_update(vec![backend("a", 1, true)]);
        assert_eq!(table.targets(), vec![Target::new("a", 1)]);
    }

    #[test]
    fn unknown_check_result_is_ignored() {
        let mut table = BackendTable::new();
        table.handle_backends_update(vec![backend("a", 1, false)]);
        table.handle_check_result(CheckResult {
            target: Target::new("ghost", 1),
            live: true,
            rtt: Duration::ZERO,
            loss: 0.0,
        });
        assert!(!table.by_target.get(&Target::new("a", 1)).unwrap().stats.live);
    }

    #[tokio::test]
    async fn roundrobin_two_backends_separate_cursors() {
        let cfg = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            balance: "roundrobin".to_string(),
            discovery: crate::config::DiscoveryConfig {
                kind: "static".to_string(),
                static_list: vec!["10.0.0.1:9001".to_string(), "10.0.0.2:9001".to_string()],
            },
            healthcheck: crate::config::HealthcheckConfig {
                kind: "none".to_string(),
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(1),
                count: 1,
                loss: 1.0,
                rtt: Duration::from_secs(1),
            },
        };

        let mut scheduler = Scheduler::build(&cfg).unwrap().start().unwrap();
        // allow the discovery->scheduler->healthcheck handoff to settle.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ctx_a = || Box::new(UdpContext { remote_addr: "127.0.0.1:1".parse().unwrap() });
        let ctx_b = || Box::new(UdpContext { remote_addr: "127.0.0.1:2".parse().unwrap() });

        let first = scheduler.take_backend(ctx_a()).await.unwrap();
        let second = scheduler.take_backend(ctx_a()).await.unwrap();
        let third = scheduler.take_backend(ctx_b()).await.unwrap();

        assert_eq!(first.target.to_string(), "10.0.0.1:9001");
        assert_eq!(second.target.to_string(), "10.0.0.2:9001");
        assert_eq!(third.target.to_string(), "10.0.0.1:9001");

        scheduler.stop().await;
    }
}
