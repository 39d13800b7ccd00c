//! Tuning engine end-to-end: the 60-HOT-memories adjustment scenario with
//! lock and unlock.

use chrono::{Duration, Utc};
use tram_e2e_tests::{seed_hot, test_engine};
use tram_core::{TuningSource, PARAM_IMPORTANCE_THRESHOLD};

#[test]
fn locked_parameter_blocks_adjustment_until_unlocked() {
    let (_dir, engine) = test_engine();
    // Default hot target band is {min: 10, max: 50}
    seed_hot(&engine, 60);

    let tuning = engine.tuning_engine();
    let now = Utc::now();

    tuning
        .lock(PARAM_IMPORTANCE_THRESHOLD, now + Duration::days(7))
        .unwrap();

    // Locked: no auto adjustment
    assert!(tuning.run(now).unwrap().is_none());

    tuning.unlock(PARAM_IMPORTANCE_THRESHOLD, now).unwrap();

    // Unlocked: one adjustment of +0.05 from the 0.30 default
    let adjustment = tuning.run(now).unwrap().unwrap();
    assert_eq!(adjustment.parameter, PARAM_IMPORTANCE_THRESHOLD);
    assert!((adjustment.old_value - 0.30).abs() < 1e-9);
    assert!((adjustment.new_value - 0.35).abs() < 1e-9);
    assert!(adjustment.new_value <= 0.9);

    let latest = engine
        .store()
        .tuning_latest(PARAM_IMPORTANCE_THRESHOLD)
        .unwrap()
        .unwrap();
    assert_eq!(latest.source, TuningSource::Auto);
}

#[test]
fn expired_lock_releases_automatically() {
    let (_dir, engine) = test_engine();
    seed_hot(&engine, 60);

    let tuning = engine.tuning_engine();
    let now = Utc::now();

    tuning
        .lock(PARAM_IMPORTANCE_THRESHOLD, now + Duration::minutes(30))
        .unwrap();
    assert!(tuning.run(now).unwrap().is_none());

    // Past the override window, adjustments resume
    let later = now + Duration::hours(1);
    assert!(tuning.run(later).unwrap().is_some());
}

#[test]
fn adjustments_accumulate_and_respect_the_max_bound() {
    let (_dir, engine) = test_engine();
    seed_hot(&engine, 60);

    let tuning = engine.tuning_engine();
    let now = Utc::now();

    // 0.30 -> 0.90 in 0.05 steps is 12 adjustments; further runs are no-ops
    for _ in 0..12 {
        assert!(tuning.run(now).unwrap().is_some());
    }
    assert!((tuning.current_value(PARAM_IMPORTANCE_THRESHOLD).unwrap() - 0.9).abs() < 1e-9);
    assert!(tuning.run(now).unwrap().is_none());
}

#[test]
fn in_band_hot_tier_needs_no_tuning() {
    let (_dir, engine) = test_engine();
    seed_hot(&engine, 25);
    assert!(engine.tuning_engine().run(Utc::now()).unwrap().is_none());
}
