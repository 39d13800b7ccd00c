//! Decay engine end-to-end: the 73-hour HOT demotion scenario, pinned
//! immunity, idempotence, and cycle ordering.

use chrono::{DateTime, Duration, Utc};
use tram_e2e_tests::{seed_memory, test_engine};
use tram_core::{AuditAction, Memory, Tier, LAST_DECAY_RUN_KEY};

fn stale_hot(idle_hours: i64) -> Memory {
    let now = Utc::now();
    let mut memory = Memory::new("release checklist for the payments service");
    memory.tier = Tier::Hot;
    memory.created_at = now - Duration::hours(idle_hours + 1);
    memory.last_accessed_at = now - Duration::hours(idle_hours);
    memory
}

#[test]
fn hot_memory_idle_73h_demotes_to_warm() {
    let (_dir, engine) = test_engine();
    let memory = stale_hot(73);
    seed_memory(&engine, &memory);

    let now = Utc::now();
    let outcome = engine.decay_engine().run(now).unwrap();
    assert_eq!(outcome.demoted, 1);

    let demoted = engine.store().get_memory(&memory.id).unwrap().unwrap();
    assert_eq!(demoted.tier, Tier::Warm);

    let audit = engine.store().query_audit(&memory.id).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Demote);
    assert_eq!(audit[0].old_value.as_ref().unwrap()["tier"], "HOT");
    assert_eq!(audit[0].new_value.as_ref().unwrap()["tier"], "WARM");

    let last_run: DateTime<Utc> = engine
        .store()
        .meta_get(LAST_DECAY_RUN_KEY)
        .unwrap()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(last_run, now);
}

#[test]
fn fresh_memory_survives_decay() {
    let (_dir, engine) = test_engine();
    let memory = stale_hot(1);
    seed_memory(&engine, &memory);

    engine.decay_engine().run(Utc::now()).unwrap();
    assert_eq!(
        engine.store().get_memory(&memory.id).unwrap().unwrap().tier,
        Tier::Hot
    );
}

#[test]
fn pinned_memory_never_demotes() {
    let (_dir, engine) = test_engine();
    let mut memory = stale_hot(24 * 400);
    memory.pinned = true;
    seed_memory(&engine, &memory);

    engine.decay_engine().run(Utc::now()).unwrap();
    assert_eq!(
        engine.store().get_memory(&memory.id).unwrap().unwrap().tier,
        Tier::Hot
    );
    assert!(engine.store().query_audit(&memory.id).unwrap().is_empty());
}

#[test]
fn second_run_without_access_is_a_no_op() {
    let (_dir, engine) = test_engine();
    // A year idle: cascades HOT -> WARM -> COLD -> ARCHIVE in one run
    let memory = stale_hot(24 * 365);
    seed_memory(&engine, &memory);

    let now = Utc::now();
    let decay = engine.decay_engine();
    let first = decay.run(now).unwrap();
    assert_eq!(first.demoted, 3);
    assert_eq!(
        engine.store().get_memory(&memory.id).unwrap().unwrap().tier,
        Tier::Archive
    );

    let second = decay.run(now).unwrap();
    assert_eq!(second.demoted, 0);
    assert_eq!(engine.store().query_audit(&memory.id).unwrap().len(), 3);
}

#[tokio::test]
async fn cycle_runs_decay_then_promotion() {
    let (_dir, engine) = test_engine();
    let now = Utc::now();

    // Stale HOT memory: decays to WARM
    let stale = stale_hot(80);
    seed_memory(&engine, &stale);

    // Heavily used COLD memory: promotes to WARM in the same cycle
    let mut loved = Memory::new("battle-tested retry helper docs");
    loved.tier = Tier::Cold;
    loved.use_count = 10;
    loved.created_at = now - Duration::days(60);
    loved.last_accessed_at = now - Duration::hours(2);
    loved.use_days = (0..5)
        .map(|i| (now - Duration::days(i)).date_naive())
        .collect();
    seed_memory(&engine, &loved);

    let maintenance = engine.maintenance();
    let cancel = tokio_util_token();
    let report = maintenance.run_cycle(now, &cancel).await;
    assert_eq!(report.demoted, 1);
    assert_eq!(report.promoted, 1);

    assert_eq!(
        engine.store().get_memory(&stale.id).unwrap().unwrap().tier,
        Tier::Warm
    );
    assert_eq!(
        engine.store().get_memory(&loved.id).unwrap().unwrap().tier,
        Tier::Warm
    );
}

fn tokio_util_token() -> tokio_util::sync::CancellationToken {
    tokio_util::sync::CancellationToken::new()
}
