//! Host hook contract types and helpers.
//!
//! The host agent runtime fires two entry points: `before_agent_start`
//! (auto-recall/injection) and `agent_end` (auto-capture), both implemented
//! on [`crate::engine::Engine`]. This module holds the request context the
//! host threads through, key-term extraction for search strings, and the
//! detached feedback writer.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::memory::InjectionFeedback;
use crate::storage::Store;

/// Session key recorded when the host provides none
pub const UNKNOWN_SESSION_KEY: &str = "unknown";

/// Most key terms extracted from a prompt
const MAX_KEY_TERMS: usize = 20;

/// Feedback rows queued before the recorder starts shedding
const FEEDBACK_QUEUE_DEPTH: usize = 256;

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Kind of host session firing the hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Main,
    Cron,
    Spawned,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Main => "main",
            SessionType::Cron => "cron",
            SessionType::Spawned => "spawned",
        }
    }

    pub fn parse_name(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(SessionType::Main),
            "cron" => Ok(SessionType::Cron),
            "spawned" => Ok(SessionType::Spawned),
            other => Err(Error::InvalidInput(format!("unknown session type: {other:?}"))),
        }
    }
}

/// Per-invocation state threaded through the hook handlers; never stored in
/// process-wide variables
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_key: Option<String>,
    pub session_type: SessionType,
    pub agent_id: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    /// Host-side cancellation; checked before any store writes
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn session_key_or_unknown(&self) -> &str {
        self.session_key.as_deref().unwrap_or(UNKNOWN_SESSION_KEY)
    }
}

/// Result of `before_agent_start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionResult {
    /// Context block to prepend to the agent prompt, when anything matched
    pub prepend_context: Option<String>,
    pub memories_injected: usize,
    pub context_included: bool,
}

/// One event from the host's `agent_end` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Input for `agent_end`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEndInput {
    pub events: Vec<AgentEvent>,
}

impl AgentEndInput {
    /// Candidate memory text: the last event carrying non-empty text
    pub fn candidate_text(&self) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .filter_map(|event| event.text.as_deref())
            .map(str::trim)
            .find(|text| !text.is_empty())
    }
}

// ============================================================================
// KEY TERM EXTRACTION
// ============================================================================

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "and", "any", "are", "because", "been", "but", "can",
    "could", "did", "does", "for", "from", "had", "has", "have", "how", "into", "its", "just",
    "like", "more", "most", "not", "now", "only", "other", "our", "out", "over", "should", "some",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "was",
    "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

/// Extract search terms from a prompt: lowercase, split on
/// whitespace/punctuation, drop stop words, short (<3) and purely numeric
/// tokens, dedupe preserving order, cap at 20.
pub fn extract_key_terms(prompt: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut terms = Vec::new();

    for token in prompt.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 3 {
            continue;
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if STOP_WORDS.contains(&token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            terms.push(token.to_string());
            if terms.len() >= MAX_KEY_TERMS {
                break;
            }
        }
    }
    terms
}

// ============================================================================
// FEEDBACK RECORDER
// ============================================================================

/// Detached feedback writer with a bounded queue: the recall hook's response
/// latency stays independent of store write latency. When the queue is full
/// the batch is shed (and logged) rather than blocking the hook.
pub struct FeedbackRecorder {
    tx: mpsc::Sender<Vec<InjectionFeedback>>,
}

impl FeedbackRecorder {
    /// Spawn the writer task. Requires a running tokio runtime.
    pub fn spawn(store: Arc<Store>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<InjectionFeedback>>(FEEDBACK_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for feedback in batch {
                    if let Err(e) = store.append_feedback(&feedback) {
                        tracing::warn!("feedback write failed for {}: {e}", feedback.memory_id);
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queue a batch without waiting for the write
    pub fn enqueue(&self, batch: Vec<InjectionFeedback>) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.tx.try_send(batch) {
            tracing::warn!("feedback queue full, dropping batch: {e}");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
