// =============================================================================
// Service Scheduler (C12)
// =============================================================================
//
// One concurrent task per registered monitor. Overruns skip the next tick
// rather than queueing it (`MissedTickBehavior::Skip`); shutdown is
// cooperative via a `CancellationToken` checked between ticks, never
// mid-tick.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::calendar::{Calendar, Phase};

/// Declarative registration of one monitor: its cadence and the market
/// phase(s) it is eligible to run in.
pub struct MonitorSpec {
    pub name: &'static str,
    pub cadence: std::time::Duration,
    pub eligible_phases: &'static [Phase],
}

/// Owns the cancellation token shared by every spawned monitor task.
pub struct Scheduler {
    calendar: Arc<Calendar>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(calendar: Arc<Calendar>) -> Self {
        Self { calendar, cancel: CancellationToken::new(), handles: Vec::new() }
    }

    /// Spawn `run_tick` on `spec`'s cadence, gated by its eligible phases.
    /// `run_tick` is called once per eligible tick and MUST complete any
    /// in-flight cache write before returning — cancellation is only
    /// observed between calls.
    pub fn register<F, Fut>(&mut self, spec: MonitorSpec, mut run_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let calendar = self.calendar.clone();
        let cancel = self.cancel.clone();
        let name = spec.name;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(spec.cadence);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(monitor = name, "scheduler stopping monitor at safe point");
                        break;
                    }
                    tick_at = interval.tick() => {
                        let _ = tick_at;
                        let phase = calendar.phase(chrono::Utc::now());
                        if !spec.eligible_phases.contains(&phase) {
                            continue;
                        }
                        let started = tokio::time::Instant::now();
                        run_tick().await;
                        let elapsed = started.elapsed();
                        if elapsed > spec.cadence {
                            warn!(monitor = name, elapsed_ms = elapsed.as_millis() as u64, cadence_ms = spec.cadence.as_millis() as u64, "monitor tick overran cadence, next tick will be skipped");
                        }
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Signal every registered monitor to stop at its next safe point, then
    /// wait for all of them to finish their in-flight tick.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "monitor task panicked during shutdown");
            }
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
