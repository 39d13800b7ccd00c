//! Auto-recall hook end-to-end: budgets, feedback density, session keys.

use std::time::Duration;

use tram_e2e_tests::{seed_hot, test_engine_with};
use tram_core::{Config, RequestContext, SessionType, TierBudgets};

async fn wait_for_feedback(engine: &tram_core::Engine, expected: usize) {
    for _ in 0..100 {
        if engine.store().count_feedback().unwrap() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "feedback rows never arrived: have {}, want {expected}",
        engine.store().count_feedback().unwrap()
    );
}

fn hot_only_config() -> Config {
    let mut config = Config::default();
    config.injection.max_items = 5;
    config.injection.budgets = Some(TierBudgets::new(0, 100, 0, 0, 0));
    config
}

#[tokio::test]
async fn density_is_injected_over_considered() {
    let (_dir, engine) = test_engine_with(hot_only_config());
    seed_hot(&engine, 10);

    let ctx = RequestContext {
        session_key: Some("sess-density".into()),
        ..Default::default()
    };
    let result = engine
        .before_agent_start("hot seeded memory", &ctx)
        .await
        .unwrap();
    assert_eq!(result.memories_injected, 5);

    wait_for_feedback(&engine, 5).await;
    let rows = engine.store().feedback_for_session("sess-density").unwrap();
    assert_eq!(rows.len(), 5);
    for row in &rows {
        // 5 injected out of 10 considered
        assert!((row.injection_density - 0.5).abs() < 1e-9);
        assert_eq!(row.access_frequency, 0);
        assert_eq!(row.session_key, "sess-density");
    }
}

#[tokio::test]
async fn missing_session_key_records_unknown() {
    let (_dir, engine) = test_engine_with(hot_only_config());
    seed_hot(&engine, 3);

    engine
        .before_agent_start("hot seeded memory", &RequestContext::default())
        .await
        .unwrap();

    wait_for_feedback(&engine, 3).await;
    let rows = engine.store().feedback_for_session("unknown").unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn injected_memories_get_access_stats() {
    let (_dir, engine) = test_engine_with(hot_only_config());
    let ids = seed_hot(&engine, 4);

    engine
        .before_agent_start("hot seeded memory", &RequestContext::default())
        .await
        .unwrap();

    let mut touched = 0;
    for id in &ids {
        let memory = engine.store().get_memory(id).unwrap().unwrap();
        if memory.use_count > 0 {
            assert_eq!(memory.use_days.len(), 1);
            touched += 1;
        }
    }
    assert_eq!(touched, 4);
}

#[tokio::test]
async fn cron_sessions_do_not_inject() {
    let (_dir, engine) = test_engine_with(hot_only_config());
    seed_hot(&engine, 3);

    let ctx = RequestContext {
        session_type: SessionType::Cron,
        ..Default::default()
    };
    let result = engine
        .before_agent_start("hot seeded memory", &ctx)
        .await
        .unwrap();
    assert_eq!(result.memories_injected, 0);
    assert!(result.prepend_context.is_none());
    assert_eq!(engine.store().count_feedback().unwrap(), 0);
}

#[tokio::test]
async fn cancellation_before_writes_leaves_no_mutations() {
    let (_dir, engine) = test_engine_with(hot_only_config());
    let ids = seed_hot(&engine, 3);

    let ctx = RequestContext::default();
    ctx.cancellation.cancel();
    let result = engine
        .before_agent_start("hot seeded memory", &ctx)
        .await
        .unwrap();
    assert_eq!(result.memories_injected, 0);

    for id in &ids {
        assert_eq!(engine.store().get_memory(id).unwrap().unwrap().use_count, 0);
    }
    assert_eq!(engine.store().count_feedback().unwrap(), 0);
}

#[tokio::test]
async fn subsequent_recall_bumps_latest_feedback_row() {
    let (_dir, engine) = test_engine_with(hot_only_config());
    seed_hot(&engine, 2);

    engine
        .before_agent_start("hot seeded memory", &RequestContext::default())
        .await
        .unwrap();
    wait_for_feedback(&engine, 2).await;

    let recalled = engine
        .recall("hot seeded memory", &tram_core::RecallOptions::default())
        .unwrap();
    assert!(!recalled.is_empty());

    let bumped = recalled
        .iter()
        .filter(|m| {
            engine
                .store()
                .latest_feedback(&m.id)
                .unwrap()
                .map(|f| f.access_frequency)
                .unwrap_or(0)
                == 1
        })
        .count();
    assert_eq!(bumped, recalled.len());
}
