use crate::config::Metric;
use crate::distance;
use crate::types::{DocumentRecord, Match};
use std::collections::HashMap;

struct Buffered {
    record: DocumentRecord,
    prepared: Vec<f32>,
}

/// Brute-force overlay for documents whose current vector is not in the engine.
///
/// Every rebuild drains it, so it is kept unindexed.
pub struct WriteBuffer {
    metric: Metric,
    entries: HashMap<String, Buffered>,
}

impl WriteBuffer {
    #[must_use]
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            entries: HashMap::new(),
        }
    }

    /// Inserts or replaces by document id.
    pub fn put(&mut self, record: DocumentRecord) {
        let prepared = distance::prepared(self.metric, &record.vector);
        self.entries
            .insert(record.id.clone(), Buffered { record, prepared });
    }

    pub fn remove(&mut self, document_id: &str) -> bool {
        self.entries.remove(document_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, document_id: &str) -> bool {
        self.entries.contains_key(document_id)
    }

    /// Scores every buffered vector against `query`, best first.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Match> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let query = distance::prepared(self.metric, query);
        let mut scored: Vec<(&Buffered, f32)> = self
            .entries
            .values()
            .map(|entry| {
                (
                    entry,
                    distance::distance(self.metric, &query, &entry.prepared),
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| a.0.record.id.cmp(&b.0.record.id))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(entry, score)| Match {
                record: entry.record.clone(),
                score,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
