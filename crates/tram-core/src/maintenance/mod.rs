//! Background maintenance: the decay -> promotion -> tuning -> report cycle.
//!
//! All three engines run sequentially inside one task on a fixed interval;
//! cycles never overlap. Cancellation is checked between sub-steps, never
//! mid-write.

mod decay;
mod promotion;
mod tuning;

pub use decay::{DecayEngine, DecayOutcome, TierTtls, LAST_DECAY_RUN_KEY};
pub use promotion::{PromotionEngine, PromotionOutcome};
pub use tuning::{
    current_threshold, ParameterState, TuningAdjustment, TuningEngine, PARAM_IMPORTANCE_THRESHOLD,
};

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::profiles::ProfileResolver;
use crate::report::Reporter;
use crate::storage::Store;

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub demoted: usize,
    pub promoted: usize,
    pub adjustment: Option<TuningAdjustment>,
    /// True when cancellation stopped the cycle between sub-steps
    pub interrupted: bool,
}

/// Owns the three engines and the reporter for the background cycle
pub struct MaintenanceEngine {
    store: Arc<Store>,
    decay: DecayEngine,
    promotion: PromotionEngine,
    tuning: TuningEngine,
    reporter: Arc<Reporter>,
    interval: StdDuration,
}

impl MaintenanceEngine {
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<ProfileResolver>,
        config: Arc<Config>,
        reporter: Arc<Reporter>,
    ) -> Self {
        let interval = StdDuration::from_secs(config.maintenance.interval_hours * 3600);
        Self {
            decay: DecayEngine::new(store.clone(), resolver.clone(), config.clone()),
            promotion: PromotionEngine::new(store.clone(), resolver),
            tuning: TuningEngine::new(store.clone(), config),
            store,
            reporter,
            interval,
        }
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Run one full cycle: Decay -> Promotion -> Tuning -> report.
    /// Engine failures are logged; a failing sub-step does not abort the
    /// remaining ones.
    pub async fn run_cycle(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        match self.decay.run(now) {
            Ok(outcome) => report.demoted = outcome.demoted,
            Err(e) => tracing::warn!("decay cycle failed: {e}"),
        }

        if cancel.is_cancelled() {
            report.interrupted = true;
            return report;
        }

        match self.promotion.run(now) {
            Ok(outcome) => report.promoted = outcome.promoted,
            Err(e) => tracing::warn!("promotion cycle failed: {e}"),
        }

        if cancel.is_cancelled() {
            report.interrupted = true;
            return report;
        }

        match self.tuning.run(now) {
            Ok(Some(adjustment)) => {
                self.reporter.report(&adjustment).await;
                report.adjustment = Some(adjustment);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("tuning cycle failed: {e}"),
        }

        tracing::info!(
            "maintenance cycle complete: {} demoted, {} promoted, adjustment: {}",
            report.demoted,
            report.promoted,
            report.adjustment.is_some()
        );
        report
    }

    /// Whether a startup catch-up cycle is due per `meta.last_decay_run`
    pub fn catch_up_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let last = self
            .store
            .meta_get(LAST_DECAY_RUN_KEY)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Ok(match last {
            Some(last) => (now - last).num_seconds() >= self.interval.as_secs() as i64,
            None => true,
        })
    }

    /// Scheduler loop: catch-up cycle when due, then one cycle per interval.
    /// On cancellation the pending reporter batch is flushed before return.
    pub async fn run_scheduler(&self, cancel: CancellationToken) {
        match self.catch_up_due(Utc::now()) {
            Ok(true) => {
                self.run_cycle(Utc::now(), &cancel).await;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("could not read last decay run: {e}"),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    self.run_cycle(Utc::now(), &cancel).await;
                }
            }
        }

        self.reporter.flush().await;
    }
}

// ============================================================================
// TESTS
// ============================================================================
