//! Forget/restore lifecycle: soft-forget hides, restore brings back,
//! hard-forget cascades.

use tram_e2e_tests::test_engine;
use tram_core::{AuditAction, Error, ForgetTarget, RecallOptions, StoreInput};

#[test]
fn forgotten_memory_is_hidden_from_default_recall() {
    let (_dir, engine) = test_engine();
    let outcome = engine
        .store_memory(StoreInput::new("Temporary note about auth"))
        .unwrap();

    assert_eq!(engine.recall("auth", &RecallOptions::default()).unwrap().len(), 1);

    engine
        .forget(ForgetTarget::Id(outcome.id().to_string()), false)
        .unwrap();

    // Hidden with default options
    assert!(engine.recall("auth", &RecallOptions::default()).unwrap().is_empty());

    // Visible when asked for, flagged as forgotten
    let with_forgotten = engine
        .recall(
            "auth",
            &RecallOptions {
                include_forgotten: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(with_forgotten.len(), 1);
    assert!(with_forgotten[0].forgotten);

    // An audit entry recorded the forget
    let audit = engine.store().query_audit(outcome.id()).unwrap();
    assert!(audit.iter().any(|e| e.action == AuditAction::Forget));
}

#[test]
fn restore_round_trip() {
    let (_dir, engine) = test_engine();
    let outcome = engine
        .store_memory(StoreInput::new("The VPN config lives in ops vault"))
        .unwrap();

    engine
        .forget(ForgetTarget::Id(outcome.id().to_string()), false)
        .unwrap();
    engine.restore(outcome.id()).unwrap();

    let results = engine.recall("vpn config", &RecallOptions::default()).unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].forgotten);

    let audit = engine.store().query_audit(outcome.id()).unwrap();
    let actions: Vec<AuditAction> = audit.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Forget, AuditAction::Restore]);
}

#[test]
fn restore_of_active_memory_is_illegal() {
    let (_dir, engine) = test_engine();
    let outcome = engine.store_memory(StoreInput::new("never forgotten")).unwrap();
    assert!(matches!(
        engine.restore(outcome.id()),
        Err(Error::IllegalState(_))
    ));
}

#[test]
fn forget_by_query_targets_best_match() {
    let (_dir, engine) = test_engine();
    engine
        .store_memory(StoreInput::new("Kafka consumer lag alert threshold"))
        .unwrap();
    let keeper = engine
        .store_memory(StoreInput::new("Grafana dashboard for deploy metrics"))
        .unwrap();

    let forgotten_id = engine
        .forget(ForgetTarget::Query("kafka consumer lag".into()), false)
        .unwrap();
    assert_ne!(forgotten_id, keeper.id());
    assert!(engine.recall("kafka", &RecallOptions::default()).unwrap().is_empty());
    assert_eq!(engine.recall("grafana", &RecallOptions::default()).unwrap().len(), 1);
}

#[test]
fn hard_forget_cascades_satellites() {
    let (_dir, engine) = test_engine();
    let outcome = engine
        .store_memory(StoreInput::new("scratch buffer to purge"))
        .unwrap();
    let id = outcome.id().to_string();

    engine.forget(ForgetTarget::Id(id.clone()), true).unwrap();

    assert!(engine.store().get_memory(&id).unwrap().is_none());
    assert!(engine.store().get_vector(&id).unwrap().is_none());
    assert!(engine.store().query_audit(&id).unwrap().is_empty());

    // Forgetting a missing memory is NotFound
    assert!(matches!(
        engine.forget(ForgetTarget::Id(id), false),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn forget_unknown_query_is_not_found() {
    let (_dir, engine) = test_engine();
    assert!(matches!(
        engine.forget(ForgetTarget::Query("completely unrelated topic".into()), false),
        Err(Error::NotFound(_))
    ));
}
