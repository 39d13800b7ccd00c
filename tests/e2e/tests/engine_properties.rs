//! Universal properties across the engine surface: recall visibility,
//! allocator accounting, scoring bounds, pin semantics, profiles.

use chrono::{Duration, Utc};
use tram_e2e_tests::{seed_memory, test_engine, TestEmbedder};
use tram_core::{
    Allocator, Candidate, Embedder, Error, Memory, ProfileKind, ProfileScope, RecallOptions,
    RequestContext, Scorer, StoreInput, Tier, TierBudgets, TuneRequest,
};

#[test]
fn default_recall_never_returns_archive_or_forgotten() {
    let (_dir, engine) = test_engine();
    let now = Utc::now();

    let mut visible = Memory::new("visible deployment fact");
    visible.tier = Tier::Warm;
    seed_memory(&engine, &visible);

    let mut archived = Memory::new("archived deployment fact");
    archived.tier = Tier::Archive;
    archived.created_at = now - Duration::days(300);
    archived.last_accessed_at = now - Duration::days(200);
    seed_memory(&engine, &archived);

    let mut forgotten = Memory::new("forgotten deployment fact");
    forgotten.do_not_inject = true;
    seed_memory(&engine, &forgotten);

    let results = engine
        .recall("deployment fact", &RecallOptions { limit: 10, ..Default::default() })
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, visible.id);

    // include_archive widens the set
    let with_archive = engine
        .recall(
            "deployment fact",
            &RecallOptions {
                limit: 10,
                include_archive: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(with_archive.len(), 2);

    // Scores always land in [0, 1]
    for memory in with_archive {
        assert!((0.0..=1.0).contains(&memory.score));
    }
}

#[test]
fn tier_filter_restricts_recall() {
    let (_dir, engine) = test_engine();
    let mut hot = Memory::new("tiered search subject alpha");
    hot.tier = Tier::Hot;
    seed_memory(&engine, &hot);
    let mut cold = Memory::new("tiered search subject beta");
    cold.tier = Tier::Cold;
    seed_memory(&engine, &cold);

    let results = engine
        .recall(
            "tiered search subject",
            &RecallOptions {
                limit: 10,
                tier: Some(Tier::Cold),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, cold.id);
}

#[test]
fn pinned_memory_survives_decay_and_scores_full_recency() {
    let (_dir, engine) = test_engine();
    let now = Utc::now();

    let mut memory = Memory::new("pinned architectural decision record");
    memory.tier = Tier::Hot;
    memory.created_at = now - Duration::days(500);
    memory.last_accessed_at = now - Duration::days(400);
    seed_memory(&engine, &memory);

    engine.pin(&memory.id).unwrap();
    engine.decay_engine().run(now).unwrap();
    assert_eq!(
        engine.store().get_memory(&memory.id).unwrap().unwrap().tier,
        Tier::Hot
    );

    let explanation = engine.explain(&memory.id, None).unwrap();
    assert_eq!(explanation.breakdown.recency_component, 1.0);
    assert!(explanation.breakdown.eligible);
}

#[test]
fn pin_unpin_state_machine() {
    let (_dir, engine) = test_engine();
    let mut memory = Memory::new("cold but valuable");
    memory.tier = Tier::Archive;
    seed_memory(&engine, &memory);

    // Pinning an ARCHIVE memory promotes it to WARM
    let pinned = engine.pin(&memory.id).unwrap();
    assert_eq!(pinned.tier, Tier::Warm);
    assert!(pinned.pinned);

    assert!(matches!(engine.pin(&memory.id), Err(Error::IllegalState(_))));
    engine.unpin(&memory.id).unwrap();
    assert!(matches!(engine.unpin(&memory.id), Err(Error::IllegalState(_))));
}

#[test]
fn allocator_accounting_holds_for_arbitrary_mixes() {
    let allocator = Allocator::new(Scorer::default());
    let now = Utc::now();

    let mut candidates = Vec::new();
    for (i, tier) in [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Archive]
        .iter()
        .cycle()
        .take(40)
        .enumerate()
    {
        let mut memory = Memory::new(format!("candidate {i}"));
        memory.tier = *tier;
        memory.pinned = i % 7 == 0;
        memory.do_not_inject = i % 11 == 0;
        memory.created_at = now - Duration::hours(i as i64 + 1);
        memory.last_accessed_at = now - Duration::hours(i as i64);
        candidates.push(Candidate {
            memory,
            similarity: (i as f64 % 10.0) / 10.0,
        });
    }

    for max_items in [0, 1, 5, 12] {
        let allocation = allocator.allocate(
            candidates.clone(),
            max_items,
            &TierBudgets::new(20, 40, 20, 20, 0),
            now,
        );
        assert_eq!(
            allocation.breakdown.selected_total(),
            allocation.selected.len()
        );
        assert!(allocation.selected.len() <= max_items);
        assert_eq!(allocation.breakdown.total_considered, 40);

        // Ordered by composite score descending
        for window in allocation.selected.windows(2) {
            assert!(window[0].score >= window[1].score);
        }

        // Never a forgotten memory in the result
        assert!(allocation.selected.iter().all(|c| !c.memory.do_not_inject));
    }
}

#[test]
fn embedder_similarity_semantics() {
    let a = TestEmbedder.embed("the exact same sentence").unwrap();
    let b = TestEmbedder.embed("the exact same sentence").unwrap();
    let unrelated = TestEmbedder.embed("qwerty zxcvb plumbus").unwrap();
    let zero = vec![0.0_f32; tram_e2e_tests::TEST_DIMENSIONS];

    let identical = tram_core::cosine_similarity(&a, &b);
    assert!((identical - 1.0).abs() < 1e-2);

    let distant = tram_core::normalized_similarity(&a, &unrelated);
    assert!(distant < 0.3);

    let zeroed = tram_core::cosine_similarity(&zero, &a);
    assert_eq!(zeroed, 0.0);
    assert!(!zeroed.is_nan());
}

#[tokio::test]
async fn session_tune_changes_budgets_for_recall_hook() {
    let (_dir, engine) = test_engine();
    let ctx = RequestContext::default();

    // narrow = pinned 70 / hot 20 / warm 10 / cold 0: WARM-only stores stop
    // being injected once the warm bucket rounds to zero slots
    engine
        .tune(
            &TuneRequest {
                retrieval: Some("narrow".into()),
                scope: ProfileScope::Session,
                ..Default::default()
            },
            &ctx,
        )
        .unwrap();
    assert_eq!(engine.resolver().resolve_retrieval(None).name, "narrow");

    // Decay/promotion at session scope stays forbidden
    for (kind, name) in [(ProfileKind::Decay, "casual"), (ProfileKind::Promotion, "fair")] {
        let request = match kind {
            ProfileKind::Decay => TuneRequest {
                decay: Some(name.into()),
                ..Default::default()
            },
            _ => TuneRequest {
                promotion: Some(name.into()),
                ..Default::default()
            },
        };
        assert!(matches!(
            engine.tune(&request, &ctx),
            Err(Error::InvalidInput(_))
        ));
    }

    // Global scope works and can persist
    engine
        .tune(
            &TuneRequest {
                promotion: Some("demanding".into()),
                scope: ProfileScope::Global,
                persist: true,
                ..Default::default()
            },
            &ctx,
        )
        .unwrap();
    assert_eq!(engine.resolver().resolve_promotion(None).value.uses, 5);
}

#[test]
fn use_count_invariant_holds_under_access() {
    let (_dir, engine) = test_engine();
    let outcome = engine
        .store_memory(StoreInput::new("invariant check memory"))
        .unwrap();

    let now = Utc::now();
    for _ in 0..5 {
        engine
            .store()
            .record_access(&[outcome.id().to_string()], now)
            .unwrap();
    }
    let memory = engine.store().get_memory(outcome.id()).unwrap().unwrap();
    assert_eq!(memory.use_count, 5);
    assert!(memory.use_count >= memory.use_days.len() as i64);
    assert!(memory.created_at <= memory.last_accessed_at);
}
