//! Tuning engine: steers the importance threshold to keep the HOT tier
//! inside its target band.
//!
//! Each tunable parameter is a small state machine: `Free`, or `Locked`
//! while the latest non-reverted tuning-log entry is a user override whose
//! `user_override_until` lies in the future. The engine only acts when
//! tuning is enabled, the mode allows automation, and the parameter is free.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::TuningSource;
use crate::storage::{NewTuningEntry, Store, TierCounts};

/// The one tunable parameter so far
pub const PARAM_IMPORTANCE_THRESHOLD: &str = "importanceThreshold";

const KNOWN_PARAMETERS: &[&str] = &[PARAM_IMPORTANCE_THRESHOLD];

/// Lock state of a tunable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterState {
    Free,
    Locked(DateTime<Utc>),
}

/// One applied adjustment, handed to the reporter
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningAdjustment {
    pub parameter: String,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: String,
    pub tier_counts: TierCounts,
    pub applied_at: DateTime<Utc>,
}

/// Current value of the importance threshold: the latest non-reverted
/// tuning entry, or the configured default when none exists.
pub fn current_threshold(store: &Store, config: &Config) -> Result<f64> {
    let latest = store.tuning_latest(PARAM_IMPORTANCE_THRESHOLD)?;
    Ok(latest
        .and_then(|entry| entry.new_value.as_f64())
        .unwrap_or(config.injection.min_score))
}

/// Observes tier sizes and adjusts the importance threshold
pub struct TuningEngine {
    store: Arc<Store>,
    config: Arc<Config>,
}

impl TuningEngine {
    pub fn new(store: Arc<Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    fn require_known(parameter: &str) -> Result<()> {
        if KNOWN_PARAMETERS.contains(&parameter) {
            Ok(())
        } else {
            Err(Error::IllegalState(format!(
                "unknown tuning parameter: {parameter:?}"
            )))
        }
    }

    /// Lock state derived from the latest non-reverted entry
    pub fn parameter_state(&self, parameter: &str, now: DateTime<Utc>) -> Result<ParameterState> {
        Self::require_known(parameter)?;
        let latest = self.store.tuning_latest(parameter)?;
        match latest {
            Some(entry) if entry.source == TuningSource::User => match entry.user_override_until {
                Some(until) if until > now => Ok(ParameterState::Locked(until)),
                _ => Ok(ParameterState::Free),
            },
            _ => Ok(ParameterState::Free),
        }
    }

    pub fn current_value(&self, parameter: &str) -> Result<f64> {
        Self::require_known(parameter)?;
        current_threshold(&self.store, &self.config)
    }

    /// Lock a parameter against auto-adjustment until `until`
    pub fn lock(&self, parameter: &str, until: DateTime<Utc>) -> Result<TuningLogHandle> {
        Self::require_known(parameter)?;
        if until <= Utc::now() {
            return Err(Error::InvalidInput(format!(
                "lock expiry must be in the future: {until}"
            )));
        }
        let current = self.current_value(parameter)?;
        let entry = self.store.tuning_append(&NewTuningEntry {
            parameter: parameter.to_string(),
            old_value: serde_json::json!(current),
            new_value: serde_json::json!(current),
            reason: "locked by user".to_string(),
            source: TuningSource::User,
            user_override_until: Some(until),
        })?;
        Ok(TuningLogHandle { entry_id: entry.id })
    }

    /// Release a lock. IllegalState when the parameter is not locked.
    pub fn unlock(&self, parameter: &str, now: DateTime<Utc>) -> Result<()> {
        match self.parameter_state(parameter, now)? {
            ParameterState::Free => Err(Error::IllegalState(format!(
                "parameter {parameter:?} is not locked"
            ))),
            ParameterState::Locked(_) => {
                let current = self.current_value(parameter)?;
                self.store.tuning_append(&NewTuningEntry {
                    parameter: parameter.to_string(),
                    old_value: serde_json::json!(current),
                    new_value: serde_json::json!(current),
                    reason: "unlocked by user".to_string(),
                    source: TuningSource::User,
                    user_override_until: None,
                })?;
                Ok(())
            }
        }
    }

    /// One tuning pass: nudge the threshold when HOT is outside its band.
    ///
    /// Returns the adjustment made, if any. A no-op when tuning is disabled,
    /// the mode is manual/disabled, the parameter is locked, or the
    /// threshold is already at its bound.
    pub fn run(&self, now: DateTime<Utc>) -> Result<Option<TuningAdjustment>> {
        let tuning = &self.config.tuning;
        if !tuning.enabled || !tuning.mode.allows_auto() {
            return Ok(None);
        }
        if let ParameterState::Locked(until) =
            self.parameter_state(PARAM_IMPORTANCE_THRESHOLD, now)?
        {
            tracing::debug!("importance threshold locked until {until}, skipping");
            return Ok(None);
        }

        let counts = self.store.tier_counts(false)?;
        let hot = counts.hot;
        let current = self.current_value(PARAM_IMPORTANCE_THRESHOLD)?;

        let (new_value, reason) = if hot > tuning.hot_target.max {
            (
                (current + tuning.step).min(tuning.max_bound),
                format!(
                    "HOT tier at {hot}, above target max {}; raising threshold",
                    tuning.hot_target.max
                ),
            )
        } else if hot < tuning.hot_target.min {
            (
                (current - tuning.step).max(tuning.min_bound),
                format!(
                    "HOT tier at {hot}, below target min {}; lowering threshold",
                    tuning.hot_target.min
                ),
            )
        } else {
            return Ok(None);
        };

        if (new_value - current).abs() < f64::EPSILON {
            // Already pinned at a bound
            return Ok(None);
        }

        self.store.tuning_append(&NewTuningEntry {
            parameter: PARAM_IMPORTANCE_THRESHOLD.to_string(),
            old_value: serde_json::json!(current),
            new_value: serde_json::json!(new_value),
            reason: reason.clone(),
            source: TuningSource::Auto,
            user_override_until: None,
        })?;

        tracing::info!(
            "tuned {PARAM_IMPORTANCE_THRESHOLD}: {current:.2} -> {new_value:.2} ({reason})"
        );

        Ok(Some(TuningAdjustment {
            parameter: PARAM_IMPORTANCE_THRESHOLD.to_string(),
            old_value: current,
            new_value,
            reason,
            tier_counts: counts,
            applied_at: now,
        }))
    }
}

/// Reference to an appended tuning-log row
#[derive(Debug, Clone, Copy)]
pub struct TuningLogHandle {
    pub entry_id: i64,
}

// ============================================================================
// TESTS
// ============================================================================
