//! Reporter end-to-end: daily batching, flush, and the maintenance cycle
//! feeding adjustments into it.

use std::sync::Arc;

use chrono::Utc;
use tram_e2e_tests::{seed_hot, test_engine, RecordingChannel};
use tram_core::{
    ChannelKind, ReportFrequency, ReportingConfig, Reporter, TierCounts, TuningAdjustment,
    PARAM_IMPORTANCE_THRESHOLD,
};

fn daily_config() -> ReportingConfig {
    ReportingConfig {
        enabled: true,
        channel: ChannelKind::Log,
        frequency: ReportFrequency::DailySummary,
        include_metrics: true,
    }
}

fn adjustment(old: f64, new: f64) -> TuningAdjustment {
    TuningAdjustment {
        parameter: PARAM_IMPORTANCE_THRESHOLD.to_string(),
        old_value: old,
        new_value: new,
        reason: "HOT tier at 60, above target max 50; raising threshold".to_string(),
        tier_counts: TierCounts {
            hot: 60,
            warm: 0,
            cold: 0,
            archive: 0,
        },
        applied_at: Utc::now(),
    }
}

#[tokio::test]
async fn daily_summary_batches_two_changes() {
    let (delivered, channel) = RecordingChannel::new();
    let reporter = Reporter::with_channel(&daily_config(), Box::new(channel));

    reporter.report(&adjustment(0.30, 0.35)).await;
    reporter.report(&adjustment(0.35, 0.40)).await;

    // Same calendar day: nothing delivered yet
    assert_eq!(delivered.lock().unwrap().len(), 0);
    assert_eq!(reporter.pending_count(), 2);

    reporter.flush().await;

    let messages = delivered.lock().unwrap();
    assert_eq!(messages.len(), 1);
    let rendered = messages[0].render();
    assert!(rendered.contains("Daily"));
    assert!(rendered.contains("2 change(s)"));
    drop(messages);
    assert_eq!(reporter.pending_count(), 0);
}

#[tokio::test]
async fn on_change_delivers_each_adjustment() {
    let (delivered, channel) = RecordingChannel::new();
    let config = ReportingConfig {
        frequency: ReportFrequency::OnChange,
        ..daily_config()
    };
    let reporter = Reporter::with_channel(&config, Box::new(channel));

    reporter.report(&adjustment(0.30, 0.35)).await;
    reporter.report(&adjustment(0.35, 0.40)).await;

    let messages = delivered.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].subject.contains(PARAM_IMPORTANCE_THRESHOLD));
    assert!(messages[0].body.contains("Tier sizes: HOT 60"));
}

#[tokio::test]
async fn maintenance_cycle_reports_through_the_channel() {
    let (_dir, engine) = test_engine();
    seed_hot(&engine, 60);

    let (delivered, channel) = RecordingChannel::new();
    let config = ReportingConfig {
        frequency: ReportFrequency::OnChange,
        ..daily_config()
    };
    let reporter = Arc::new(Reporter::with_channel(&config, Box::new(channel)));
    let maintenance = engine.maintenance_with_reporter(reporter);

    let cancel = tokio_util::sync::CancellationToken::new();
    let report = maintenance.run_cycle(Utc::now(), &cancel).await;
    assert!(report.adjustment.is_some());

    let messages = delivered.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].subject.contains("0.30 -> 0.35"));
}

#[tokio::test]
async fn flush_with_nothing_pending_delivers_nothing() {
    let (delivered, channel) = RecordingChannel::new();
    let reporter = Reporter::with_channel(&daily_config(), Box::new(channel));
    reporter.flush().await;
    assert!(delivered.lock().unwrap().is_empty());
}
