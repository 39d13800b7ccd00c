//! Local embedding generation with fastembed (ONNX-based).
//!
//! No external API calls; the model downloads once into the platform cache
//! directory and runs locally.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::error::{Error, Result};

use super::Embedder;

/// Dimensions produced by the default local model
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 384;

/// Default local model identifier
pub const LOCAL_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Maximum text length for embedding (truncated beyond this)
const MAX_TEXT_LENGTH: usize = 8192;

static EMBEDDING_MODEL_RESULT: OnceLock<std::result::Result<Mutex<TextEmbedding>, String>> =
    OnceLock::new();

/// Cache directory for fastembed model files.
/// Honors FASTEMBED_CACHE_PATH, then the platform cache directory.
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "tram", "tram") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("failed to create embedding cache dir {:?}: {}", cache, e);
        }

        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false)
            .with_cache_dir(cache);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize embedding model: {e}"))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|_| Error::ResourceUnavailable("embedding model lock poisoned".to_string())),
        Err(err) => Err(Error::ResourceUnavailable(err.clone())),
    }
}

/// fastembed-backed [`Embedder`]. The model initializes lazily on first use;
/// call [`LocalEmbedder::init`] at startup to surface download/init errors
/// early.
pub struct LocalEmbedder {
    _private: (),
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Force model initialization, returning any init error
    pub fn init(&self) -> Result<()> {
        get_model().map(|_| ())
    }

    /// Whether the model is ready for use
    pub fn is_ready(&self) -> bool {
        get_model().is_ok()
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }

        let mut model = get_model()?;

        let text = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| Error::ResourceUnavailable(format!("embedding failed: {e}")))?;

        embeddings
            .pop()
            .ok_or_else(|| Error::ResourceUnavailable("no embedding generated".to_string()))
    }

    fn dimensions(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSIONS
    }

    fn model_id(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }
}
