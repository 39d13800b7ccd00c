//! Reporter: turns tuning adjustments into notifications.
//!
//! `on-change` delivers immediately. `daily-summary` and `weekly-summary`
//! batch adjustments in memory and deliver one summary when the local
//! calendar day (or ISO week, Monday start) advances, or on `flush()`.
//! Delivery failures fall back to the log and never propagate.

mod channel;

pub use channel::{build_channel, Channel, LogChannel, NoneChannel, ReportMessage, WebhookChannel};

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Local, Utc};

use crate::config::{ReportFrequency, ReportingConfig};
use crate::maintenance::TuningAdjustment;
use crate::storage::TierCounts;

/// Batching period identity in local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodKey {
    Day(chrono::NaiveDate),
    Week(i32, u32),
}

/// Formats and delivers (or batches) tuning notifications
pub struct Reporter {
    enabled: bool,
    frequency: ReportFrequency,
    include_metrics: bool,
    channel: Box<dyn Channel>,
    pending: Mutex<Vec<TuningAdjustment>>,
    period: Mutex<Option<PeriodKey>>,
}

impl Reporter {
    /// Build from config, resolving the channel from the environment
    pub fn from_config(config: &ReportingConfig) -> Self {
        Self::with_channel(config, build_channel(config.channel))
    }

    /// Build with an explicit channel (used by tests and embedders)
    pub fn with_channel(config: &ReportingConfig, channel: Box<dyn Channel>) -> Self {
        Self {
            enabled: config.enabled,
            frequency: config.frequency,
            include_metrics: config.include_metrics,
            channel,
            pending: Mutex::new(Vec::new()),
            period: Mutex::new(None),
        }
    }

    /// Number of adjustments waiting in the current batch
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Report one adjustment according to the configured frequency
    pub async fn report(&self, adjustment: &TuningAdjustment) {
        if !self.enabled {
            return;
        }
        match self.frequency {
            ReportFrequency::OnChange => {
                let message = format_adjustment(adjustment, self.include_metrics);
                self.deliver(message).await;
            }
            ReportFrequency::DailySummary | ReportFrequency::WeeklySummary => {
                let key = self.period_key(adjustment.applied_at);
                let rollover = {
                    let period = self.period.lock().expect("reporter lock");
                    matches!(*period, Some(previous) if previous != key)
                };
                if rollover {
                    self.flush().await;
                }
                {
                    let mut pending = self.pending.lock().expect("reporter lock");
                    pending.push(adjustment.clone());
                }
                *self.period.lock().expect("reporter lock") = Some(key);
            }
        }
    }

    /// Deliver any pending batch now
    pub async fn flush(&self) {
        let batch: Vec<TuningAdjustment> = {
            let mut pending = self.pending.lock().expect("reporter lock");
            std::mem::take(&mut *pending)
        };
        *self.period.lock().expect("reporter lock") = None;
        if batch.is_empty() {
            return;
        }
        let message = format_summary(&batch, self.frequency, self.include_metrics);
        self.deliver(message).await;
    }

    fn period_key(&self, at: DateTime<Utc>) -> PeriodKey {
        let local = at.with_timezone(&Local);
        match self.frequency {
            ReportFrequency::WeeklySummary => {
                let week = local.iso_week();
                PeriodKey::Week(week.year(), week.week())
            }
            _ => PeriodKey::Day(local.date_naive()),
        }
    }

    async fn deliver(&self, message: ReportMessage) {
        if let Err(e) = self.channel.deliver(&message).await {
            tracing::warn!(
                "{} channel delivery failed ({e}), falling back to log",
                self.channel.name()
            );
            tracing::info!(target: "tram::report", "{}", message.render());
        }
    }
}

fn tier_stats_block(counts: &TierCounts) -> String {
    format!(
        "Tier sizes: HOT {} | WARM {} | COLD {} | ARCHIVE {}",
        counts.hot, counts.warm, counts.cold, counts.archive
    )
}

/// Format a single adjustment notification
pub fn format_adjustment(adjustment: &TuningAdjustment, include_metrics: bool) -> ReportMessage {
    let subject = format!(
        "{} adjusted: {:.2} -> {:.2}",
        adjustment.parameter, adjustment.old_value, adjustment.new_value
    );
    let mut body = format!(
        "Parameter: {}\nChange: {:.2} -> {:.2}\nReason: {}\nTime: {}",
        adjustment.parameter,
        adjustment.old_value,
        adjustment.new_value,
        adjustment.reason,
        adjustment.applied_at.to_rfc3339(),
    );
    if include_metrics {
        body.push('\n');
        body.push_str(&tier_stats_block(&adjustment.tier_counts));
    }
    ReportMessage { subject, body }
}

/// Format a batched summary notification
pub fn format_summary(
    batch: &[TuningAdjustment],
    frequency: ReportFrequency,
    include_metrics: bool,
) -> ReportMessage {
    let label = match frequency {
        ReportFrequency::WeeklySummary => "Weekly",
        _ => "Daily",
    };
    let subject = format!("{label} tuning summary: {} change(s)", batch.len());

    let mut body = String::new();
    for adjustment in batch {
        body.push_str(&format!(
            "{} {}: {:.2} -> {:.2} ({})\n",
            adjustment.applied_at.to_rfc3339(),
            adjustment.parameter,
            adjustment.old_value,
            adjustment.new_value,
            adjustment.reason,
        ));
    }
    if include_metrics {
        if let Some(last) = batch.last() {
            body.push_str(&tier_stats_block(&last.tier_counts));
        }
    }
    ReportMessage { subject, body }
}

// ============================================================================
// TESTS
// ============================================================================
