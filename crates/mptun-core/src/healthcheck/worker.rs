//! Per-target healthcheck worker. Ticks every `cfg.interval`, spawning a
//! probe each tick so a slow probe can't stall the ticker; windows outcomes
//! until `passes + fails == cfg.count`, then emits one smoothed CheckResult
//! and resets.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::ping;
use crate::config::HealthcheckConfig;
use crate::types::{CheckResult, Target};

pub struct Worker {
    target: Target,
    cfg: HealthcheckConfig,
    out: mpsc::Sender<CheckResult>,
    stop_rx: watch::Receiver<bool>,
}

/// Accumulator for one probe window.
#[derive(Default)]
struct Window {
    passes: u32,
    fails: u32,
    rtt_sum: Duration,
}

impl Window {
    fn record(&mut self, outcome: &ping::ProbeOutcome) {
        if outcome.live {
            self.passes += 1;
            self.rtt_sum += outcome.rtt;
        } else {
            self.fails += 1;
        }
    }

    fn total(&self) -> u32 {
        self.passes + self.fails
    }

    /// Compute the smoothed verdict and reset. `cfg.loss`/`cfg.rtt`
    /// thresholds are inclusive on failure.
    fn finish(&mut self, target: &Target, cfg: &HealthcheckConfig) -> CheckResult {
        let total = self.total().max(1);
        let loss = self.fails as f64 / total as f64;
        let avg_rtt = if self.passes > 0 {
            self.rtt_sum / self.passes
        } else {
            Duration::ZERO
        };
        let live = loss < cfg.loss && avg_rtt <= cfg.rtt;

        *self = Window::default();

        CheckResult { target: target.clone(), live, rtt: avg_rtt, loss }
    }
}

impl Worker {
    pub fn new(
        target: Target,
        cfg: HealthcheckConfig,
        out: mpsc::Sender<CheckResult>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self { target, cfg, out, stop_rx }
    }

    /// Run until stopped. `cfg.kind == "none"` never gets here — the
    /// supervisor doesn't spawn workers for it.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let (probe_tx, mut probe_rx) = mpsc::channel::<ping::ProbeOutcome>(4);
        let mut window = Window::default();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let target = self.target.clone();
                    let timeout = self.cfg.timeout;
                    let tx = probe_tx.clone();
                    tokio::spawn(async move {
                        let outcome = ping::probe(&target, timeout).await;
                        let _ = tx.send(outcome).await;
                    });
                }

                Some(outcome) = probe_rx.recv() => {
                    window.record(&outcome);
                    if window.total() >= self.cfg.count {
                        let result = window.finish(&self.target, &self.cfg);
                        debug!(target = %self.target, live = result.live, loss = result.loss, "healthcheck window complete");
                        match self.out.try_send(result) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::warn!(target = %self.target, "healthcheck output channel full, discarding result");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => return,
                        }
                    }
                }

                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
