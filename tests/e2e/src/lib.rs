//! Shared harness for the end-to-end tests: a deterministic embedder and
//! engine construction helpers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tram_core::{Channel, Config, Embedder, Engine, Memory, ReportMessage, Result, Tier};

/// Dimensions of the test embedder
pub const TEST_DIMENSIONS: usize = 64;

/// Deterministic bag-of-tokens embedder.
///
/// Each token bumps one hash-selected dimension; the vector is then
/// L2-normalized. Identical text embeds identically (cosine 1.0) and texts
/// with disjoint vocabulary are nearly orthogonal, which makes similarity
/// thresholds in the engine exercisable without a real model.
pub struct TestEmbedder;

impl Embedder for TestEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; TEST_DIMENSIONS];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() % TEST_DIMENSIONS as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }

    fn model_id(&self) -> &str {
        "test/bag-of-tokens"
    }
}

/// Engine over a fresh temp database with default config
pub fn test_engine() -> (TempDir, Engine) {
    test_engine_with(Config::default())
}

/// Engine over a fresh temp database with the given config
pub fn test_engine_with(mut config: Config) -> (TempDir, Engine) {
    let dir = TempDir::new().expect("temp dir");
    config.db_path = Some(dir.path().join("tram.db"));
    let engine = Engine::new(config, Arc::new(TestEmbedder)).expect("engine");
    (dir, engine)
}

/// Insert a memory row directly (bypassing dedup), indexing its vector so
/// retrieval can see it.
pub fn seed_memory(engine: &Engine, memory: &Memory) {
    engine.store().insert_memory(memory).expect("insert");
    let vector = TestEmbedder.embed(&memory.text).expect("embed");
    engine
        .store()
        .put_vector(&memory.id, &vector, "test/bag-of-tokens")
        .expect("vector");
    engine.reload_vectors().expect("index reload");
}

/// Seed `count` HOT memories with distinct texts
pub fn seed_hot(engine: &Engine, count: usize) -> Vec<String> {
    let ids: Vec<String> = (0..count)
        .map(|i| {
            let mut memory = Memory::new(format!("hot seeded memory number {i}"));
            memory.tier = Tier::Hot;
            engine.store().insert_memory(&memory).expect("insert");
            let vector = TestEmbedder.embed(&memory.text).expect("embed");
            engine
                .store()
                .put_vector(&memory.id, &vector, "test/bag-of-tokens")
                .expect("vector");
            memory.id
        })
        .collect();
    engine.reload_vectors().expect("index reload");
    ids
}

/// Channel that records every delivered message
pub struct RecordingChannel {
    pub delivered: Arc<Mutex<Vec<ReportMessage>>>,
}

impl RecordingChannel {
    pub fn new() -> (Arc<Mutex<Vec<ReportMessage>>>, Self) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        (
            delivered.clone(),
            Self { delivered },
        )
    }
}

#[async_trait::async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, message: &ReportMessage) -> Result<()> {
        self.delivered.lock().expect("channel lock").push(message.clone());
        Ok(())
    }
}
