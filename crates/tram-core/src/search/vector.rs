//! Vector index over memory embeddings.
//!
//! Persists blobs through the shared [`Store`] and keeps an in-memory vector
//! table for exhaustive cosine search. When the `vector-search` feature is
//! enabled and a native HNSW index can be created, searches go through it
//! instead; the exhaustive path remains the fallback whenever the native
//! index is unavailable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::embeddings::normalized_similarity;
use crate::error::{Error, Result};
use crate::storage::Store;

#[cfg(feature = "vector-search")]
use std::sync::Mutex;

#[cfg(feature = "vector-search")]
const HNSW_CONNECTIVITY: usize = 16;
#[cfg(feature = "vector-search")]
const HNSW_EXPANSION_ADD: usize = 128;
#[cfg(feature = "vector-search")]
const HNSW_EXPANSION_SEARCH: usize = 64;

// ============================================================================
// NATIVE HNSW WRAPPER (feature = "vector-search")
// ============================================================================

#[cfg(feature = "vector-search")]
struct NativeIndex {
    index: usearch::Index,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

#[cfg(feature = "vector-search")]
impl NativeIndex {
    fn create(dimensions: usize) -> Option<Self> {
        let options = usearch::IndexOptions {
            dimensions,
            metric: usearch::MetricKind::Cos,
            quantization: usearch::ScalarKind::F32,
            connectivity: HNSW_CONNECTIVITY,
            expansion_add: HNSW_EXPANSION_ADD,
            expansion_search: HNSW_EXPANSION_SEARCH,
            multi: false,
        };
        match usearch::Index::new(&options) {
            Ok(index) => Some(Self {
                index,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                next_id: 0,
            }),
            Err(e) => {
                tracing::warn!("native vector index unavailable, using exhaustive search: {e}");
                None
            }
        }
    }

    fn add(&mut self, key: &str, vector: &[f32]) -> std::result::Result<(), String> {
        if let Some(&existing) = self.key_to_id.get(key) {
            self.index.remove(existing).map_err(|e| e.to_string())?;
            self.reserve_for(self.index.size() + 1)?;
            self.index.add(existing, vector).map_err(|e| e.to_string())?;
            return Ok(());
        }

        // usearch requires reserve() before add()
        self.reserve_for(self.index.size() + 1)?;

        let id = self.next_id;
        self.next_id += 1;
        self.index.add(id, vector).map_err(|e| e.to_string())?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    fn reserve_for(&self, needed: usize) -> std::result::Result<(), String> {
        if needed > self.index.capacity() {
            let new_capacity = std::cmp::max(self.index.capacity() * 2, 16).max(needed);
            self.index.reserve(new_capacity).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> std::result::Result<(), String> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index.remove(id).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> std::result::Result<Vec<(String, f32)>, String> {
        if self.index.size() == 0 {
            return Ok(vec![]);
        }
        let matches = self.index.search(query, k).map_err(|e| e.to_string())?;
        let mut results = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(string_key) = self.id_to_key.get(key) {
                let similarity = (1.0 - distance).clamp(0.0, 1.0);
                results.push((string_key.clone(), similarity));
            }
        }
        Ok(results)
    }
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// Per-memory embedding index with top-k cosine search
pub struct VectorIndex {
    store: Arc<Store>,
    dimensions: usize,
    model: String,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    #[cfg(feature = "vector-search")]
    native: Option<Mutex<NativeIndex>>,
}

impl VectorIndex {
    pub fn new(store: Arc<Store>, dimensions: usize, model: impl Into<String>) -> Self {
        Self {
            store,
            dimensions,
            model: model.into(),
            vectors: RwLock::new(HashMap::new()),
            #[cfg(feature = "vector-search")]
            native: NativeIndex::create(dimensions).map(Mutex::new),
        }
    }

    /// Load every stored vector into the index; returns the count loaded.
    /// Blobs whose length does not match the configured dimensions are
    /// skipped (a model change requires re-embedding).
    pub fn load(&self) -> Result<usize> {
        let stored = self.store.all_vectors()?;
        let mut loaded = 0;

        for (memory_id, vector) in stored {
            if vector.len() != self.dimensions {
                tracing::warn!(
                    "skipping vector for {memory_id}: {} dims, index expects {}",
                    vector.len(),
                    self.dimensions
                );
                continue;
            }
            self.insert_in_memory(&memory_id, vector);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn insert_in_memory(&self, memory_id: &str, vector: Vec<f32>) {
        #[cfg(feature = "vector-search")]
        if let Some(native) = &self.native {
            if let Ok(mut guard) = native.lock() {
                if let Err(e) = guard.add(memory_id, &vector) {
                    tracing::warn!("native index add failed for {memory_id}: {e}");
                }
            }
        }
        if let Ok(mut map) = self.vectors.write() {
            map.insert(memory_id.to_string(), vector);
        }
    }

    /// Store (or replace) a memory's vector, persisting the blob
    pub fn put(&self, memory_id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::InvalidInput(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        self.store.put_vector(memory_id, vector, &self.model)?;
        self.insert_in_memory(memory_id, vector.to_vec());
        Ok(())
    }

    /// Fetch a memory's vector from the in-memory table, falling back to the
    /// store for rows not yet loaded
    pub fn get(&self, memory_id: &str) -> Result<Option<Vec<f32>>> {
        if let Ok(map) = self.vectors.read() {
            if let Some(vector) = map.get(memory_id) {
                return Ok(Some(vector.clone()));
            }
        }
        self.store.get_vector(memory_id)
    }

    /// Remove a memory's vector; idempotent
    pub fn delete(&self, memory_id: &str) -> Result<()> {
        self.store.delete_vector(memory_id)?;
        #[cfg(feature = "vector-search")]
        if let Some(native) = &self.native {
            if let Ok(mut guard) = native.lock() {
                if let Err(e) = guard.remove(memory_id) {
                    tracing::warn!("native index remove failed for {memory_id}: {e}");
                }
            }
        }
        if let Ok(mut map) = self.vectors.write() {
            map.remove(memory_id);
        }
        Ok(())
    }

    /// Top-k ids by cosine similarity, similarities clamped to [0, 1]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dimensions {
            return Err(Error::InvalidInput(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        if k == 0 {
            return Ok(vec![]);
        }

        #[cfg(feature = "vector-search")]
        if let Some(native) = &self.native {
            if let Ok(guard) = native.lock() {
                match guard.search(query, k) {
                    Ok(results) => return Ok(results),
                    Err(e) => {
                        tracing::warn!("native search failed, using exhaustive fallback: {e}");
                    }
                }
            }
        }

        Ok(self.exhaustive_search(query, k))
    }

    /// Linear scan over the in-memory table
    fn exhaustive_search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let Ok(map) = self.vectors.read() else {
            return vec![];
        };
        let mut scored: Vec<(String, f32)> = map
            .iter()
            .map(|(id, vector)| (id.clone(), normalized_similarity(query, vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.vectors.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============================================================================
// TESTS
// ============================================================================
