//! Store path end-to-end: creation, duplicate suppression, input validation.

use tram_e2e_tests::test_engine;
use tram_core::{Error, MemoryType, StoreInput, StoreOutcome, Tier};

#[test]
fn duplicate_text_returns_existing_id() {
    let (_dir, engine) = test_engine();

    let first = engine
        .store_memory(StoreInput::new("Machine learning is a subset of AI"))
        .unwrap();
    let first_id = first.id().to_string();
    assert!(!first.is_duplicate());

    let second = engine
        .store_memory(StoreInput::new("Machine learning is a subset of AI"))
        .unwrap();
    match second {
        StoreOutcome::Existing { id, similarity } => {
            assert_eq!(id, first_id);
            assert!(similarity >= 0.95);
        }
        StoreOutcome::Created { .. } => panic!("expected duplicate detection"),
    }

    // Only one row exists
    assert_eq!(engine.store().count_memories().unwrap(), 1);
}

#[test]
fn unrelated_text_is_not_a_duplicate() {
    let (_dir, engine) = test_engine();
    engine
        .store_memory(StoreInput::new("Machine learning is a subset of AI"))
        .unwrap();
    let other = engine
        .store_memory(StoreInput::new("Sourdough needs a mature starter"))
        .unwrap();
    assert!(!other.is_duplicate());
    assert_eq!(engine.store().count_memories().unwrap(), 2);
}

#[test]
fn explicit_fields_are_stored() {
    let (_dir, engine) = test_engine();
    let outcome = engine
        .store_memory(StoreInput {
            tier: Some(Tier::Cold),
            memory_type: MemoryType::Procedural,
            importance: 0.8,
            pinned: true,
            category: Some("ops".into()),
            source: Some("runbook.md".into()),
            ..StoreInput::new("Rotate the signing keys quarterly")
        })
        .unwrap();

    let memory = engine.store().get_memory(outcome.id()).unwrap().unwrap();
    assert_eq!(memory.tier, Tier::Cold);
    assert_eq!(memory.memory_type, MemoryType::Procedural);
    assert!(memory.pinned);
    assert_eq!(memory.category.as_deref(), Some("ops"));
    assert_eq!(memory.source.as_deref(), Some("runbook.md"));
    assert_eq!(memory.use_count, 0);
    assert!(memory.use_days.is_empty());
}

#[test]
fn invalid_inputs_are_rejected() {
    let (_dir, engine) = test_engine();

    assert!(matches!(
        engine.store_memory(StoreInput::new("   ")),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        engine.store_memory(StoreInput {
            importance: 1.5,
            ..StoreInput::new("overeager")
        }),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn vector_is_persisted_with_the_memory() {
    let (_dir, engine) = test_engine();
    let outcome = engine
        .store_memory(StoreInput::new("embedded alongside the row"))
        .unwrap();
    let vector = engine.store().get_vector(outcome.id()).unwrap().unwrap();
    assert_eq!(vector.len(), tram_e2e_tests::TEST_DIMENSIONS);
}
