use crate::config::Metric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl DocumentRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub(crate) fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub record: DocumentRecord,
    pub score: f32,
}

/// A query vector plus the match list search attaches to it.
///
/// Matches already present when `search` is called are carried over and
/// merged with the fresh candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub matches: Vec<Match>,
}

impl QueryDocument {
    #[must_use]
    pub const fn new(vector: Vec<f32>) -> Self {
        Self {
            id: None,
            vector,
            matches: Vec::new(),
        }
    }

    #[must_use]
    pub fn match_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.record.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

impl SearchOptions {
    #[must_use]
    pub const fn top_k(top_k: usize) -> Self {
        Self { top_k }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub id: String,
    pub reason: String,
}

/// Per-item outcome of a mutation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_found: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
}

impl MutationReport {
    pub(crate) fn reject(&mut self, id: impl Into<String>, reason: impl ToString) {
        self.rejected.push(Rejection {
            id: id.into(),
            reason: reason.to_string(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub dimension: usize,
    pub metric: Metric,
    pub index_key: String,
    pub total_vectors: usize,
    pub live: usize,
    pub tombstoned: usize,
    pub buffered: usize,
    pub needs_rebuild: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub documents: usize,
    pub reclaimed_vectors: usize,
    pub drained_buffer: usize,
}
