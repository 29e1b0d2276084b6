use annex_index::{
    DocumentRecord, IndexConfig, IndexError, KvStore, Match, MutableIndex, QueryDocument,
    SearchOptions,
};
use annex_protocol::{
    CommandAction, CommandRequest, CommandResponse, DeletePayload, ErrorEnvelope, GetOutput,
    GetPayload, IndexPayload, SearchOutput, SearchPayload, UpdatePayload, WireDocument, WireMatch,
    WireQuery,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;

/// Executes protocol requests against one index.
pub struct CommandHandler {
    index: MutableIndex<KvStore>,
}

impl CommandHandler {
    /// Opens the store and rebuilds the engine from its documents.
    pub fn open(config: IndexConfig, store: KvStore) -> annex_index::Result<Self> {
        Ok(Self {
            index: MutableIndex::open(config, store)?,
        })
    }

    pub const fn index(&self) -> &MutableIndex<KvStore> {
        &self.index
    }

    pub fn execute(&self, request: CommandRequest) -> CommandResponse {
        let started = Instant::now();
        let action = request.action;
        let response = match self.dispatch(&request) {
            Ok(data) => CommandResponse::ok(action, data),
            Err(err) => {
                log::warn!("action={} failed: {err:#}", action.as_str());
                CommandResponse::error(Some(action), classify_error(&err))
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::debug!("action={} done in {duration_ms}ms", action.as_str());
        response.with_duration_ms(duration_ms)
    }

    fn dispatch(&self, request: &CommandRequest) -> anyhow::Result<Value> {
        match request.action {
            CommandAction::Index => {
                let payload: IndexPayload = request.payload()?;
                let report = self.index.insert(into_records(payload.documents))?;
                to_data(&report)
            }
            CommandAction::Update => {
                let payload: UpdatePayload = request.payload()?;
                let report = self.index.update(into_records(payload.documents))?;
                to_data(&report)
            }
            CommandAction::Delete => {
                let payload: DeletePayload = request.payload()?;
                let report = self.index.delete(payload.ids.as_slice())?;
                to_data(&report)
            }
            CommandAction::Get => {
                let payload: GetPayload = request.payload()?;
                let record = self
                    .index
                    .get(&payload.id)?
                    .ok_or(IndexError::NotFound(payload.id))?;
                to_data(&GetOutput {
                    document: into_wire(record),
                })
            }
            CommandAction::Search => {
                let payload: SearchPayload = request.payload()?;
                let mut queries: Vec<QueryDocument> =
                    payload.queries.into_iter().map(into_query).collect();
                self.index
                    .search(&mut queries, SearchOptions::top_k(payload.top_k))?;
                to_data(&SearchOutput {
                    queries: queries.into_iter().map(into_wire_query).collect(),
                })
            }
            CommandAction::Stats => to_data(&self.index.stats()?),
            CommandAction::Rebuild => to_data(&self.index.rebuild()?),
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> anyhow::Result<Value> {
    serde_json::to_value(value).map_err(Into::into)
}

/// Maps a failed request onto the wire error envelope.
pub fn classify_error(err: &anyhow::Error) -> ErrorEnvelope {
    let message = format!("{err:#}");
    if let Some(index_err) = err.downcast_ref::<IndexError>() {
        let (details, hint) = match index_err {
            IndexError::ShapeMismatch { expected, actual } => (
                Some(json!({ "expected": expected, "actual": actual })),
                Some(format!("Vectors must have exactly {expected} components.")),
            ),
            IndexError::NotFound(_) => (
                None,
                Some("No document has this id; use action=index to add it.".to_string()),
            ),
            IndexError::Engine(_) => (
                None,
                Some("Run action=rebuild to restore the engine from the store.".to_string()),
            ),
            _ => (None, None),
        };
        return ErrorEnvelope {
            code: index_err.code().to_string(),
            message,
            details,
            hint,
        };
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return ErrorEnvelope {
            code: "invalid_argument".to_string(),
            message,
            details: None,
            hint: Some("Check the payload shape for this action.".to_string()),
        };
    }
    ErrorEnvelope {
        code: "internal".to_string(),
        message,
        details: None,
        hint: None,
    }
}

fn into_records(documents: Vec<WireDocument>) -> Vec<DocumentRecord> {
    documents.into_iter().map(into_record).collect()
}

fn into_record(document: WireDocument) -> DocumentRecord {
    DocumentRecord {
        id: document.id,
        vector: document.vector,
        payload: document.payload,
    }
}

fn into_wire(record: DocumentRecord) -> WireDocument {
    WireDocument {
        id: record.id,
        vector: record.vector,
        payload: record.payload,
    }
}

fn into_query(query: WireQuery) -> QueryDocument {
    QueryDocument {
        id: query.id,
        vector: query.vector,
        matches: query
            .matches
            .into_iter()
            .map(|m| Match {
                record: into_record(m.document),
                score: m.score,
            })
            .collect(),
    }
}

fn into_wire_query(query: QueryDocument) -> WireQuery {
    WireQuery {
        id: query.id,
        vector: query.vector,
        matches: query
            .matches
            .into_iter()
            .map(|m| WireMatch {
                document: into_wire(m.record),
                score: m.score,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annex_index::Metric;
    use pretty_assertions::assert_eq;

    fn handler() -> CommandHandler {
        CommandHandler::open(IndexConfig::new(2, Metric::L2), KvStore::in_memory()).unwrap()
    }

    fn request(raw: Value) -> CommandRequest {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn index_then_search_returns_nearest_first() {
        let handler = handler();
        let indexed = handler.execute(request(json!({
            "action": "index",
            "payload": {"documents": [
                {"id": "near", "vector": [1.0, 0.0], "payload": {"title": "near"}},
                {"id": "far", "vector": [5.0, 5.0]}
            ]}
        })));
        assert!(indexed.is_ok());
        assert_eq!(indexed.data["inserted"], json!(["near", "far"]));

        let response = handler.execute(request(json!({
            "action": "search",
            "payload": {"queries": [{"id": "q", "vector": [1.0, 0.1]}], "top_k": 1}
        })));
        assert!(response.is_ok(), "{:?}", response.error);
        let output: SearchOutput = serde_json::from_value(response.data).unwrap();
        assert_eq!(output.queries.len(), 1);
        assert_eq!(output.queries[0].id.as_deref(), Some("q"));
        assert_eq!(output.queries[0].matches.len(), 1);
        assert_eq!(output.queries[0].matches[0].document.id, "near");
        assert_eq!(output.queries[0].matches[0].document.payload["title"], "near");
    }

    #[test]
    fn omitted_top_k_uses_index_default() {
        assert_eq!(
            annex_protocol::DEFAULT_TOP_K,
            SearchOptions::default().top_k
        );

        let handler = handler();
        let documents: Vec<Value> = (0..annex_index::DEFAULT_TOP_K + 3)
            .map(|i| json!({"id": format!("d{i}"), "vector": [i as f32, 0.0]}))
            .collect();
        let indexed = handler.execute(request(json!({
            "action": "index",
            "payload": {"documents": documents}
        })));
        assert!(indexed.is_ok());

        let response = handler.execute(request(json!({
            "action": "search",
            "payload": {"queries": [{"vector": [0.0, 0.0]}]}
        })));
        let output: SearchOutput = serde_json::from_value(response.data).unwrap();
        assert_eq!(output.queries[0].matches.len(), annex_index::DEFAULT_TOP_K);
    }

    #[test]
    fn shape_mismatch_maps_to_error_code() {
        let response = handler().execute(request(json!({
            "action": "search",
            "payload": {"queries": [{"vector": [1.0, 0.0, 0.0]}]}
        })));
        assert!(!response.is_ok());
        let error = response.error.unwrap();
        assert_eq!(error.code, "shape_mismatch");
        assert_eq!(error.details, Some(json!({"expected": 2, "actual": 3})));
        assert_eq!(response.meta.action, Some(CommandAction::Search));
    }

    #[test]
    fn malformed_payload_is_invalid_argument() {
        let response = handler().execute(request(json!({
            "action": "delete",
            "payload": {"id": "a"}
        })));
        assert_eq!(response.error.unwrap().code, "invalid_argument");
    }

    #[test]
    fn per_item_outcomes_stay_in_data() {
        let handler = handler();
        let response = handler.execute(request(json!({
            "action": "update",
            "payload": {"documents": [{"id": "ghost", "vector": [0.0, 1.0]}]}
        })));
        assert!(response.is_ok());
        assert_eq!(response.data["not_found"], json!(["ghost"]));

        let got = handler.execute(request(json!({"action": "get", "payload": {"id": "ghost"}})));
        assert!(!got.is_ok());
        assert_eq!(got.error.unwrap().code, "not_found");
    }

    #[test]
    fn stats_reflect_tombstones_until_rebuild() {
        let handler = handler();
        handler.execute(request(json!({
            "action": "index",
            "payload": {"documents": [
                {"id": "a", "vector": [1.0, 0.0]},
                {"id": "b", "vector": [0.0, 1.0]}
            ]}
        })));
        handler.execute(request(json!({"action": "delete", "payload": {"ids": ["a"]}})));

        let stats = handler.execute(request(json!({"action": "stats"})));
        assert_eq!(stats.data["tombstoned"], 1);
        assert_eq!(stats.data["live"], 1);

        let rebuilt = handler.execute(request(json!({"action": "rebuild"})));
        assert_eq!(rebuilt.data["reclaimed_vectors"], 1);
        let stats = handler.execute(request(json!({"action": "stats"})));
        assert_eq!(stats.data["total_vectors"], 1);
        assert_eq!(stats.data["tombstoned"], 0);
    }
}
