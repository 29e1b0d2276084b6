use crate::config::IndexConfig;
use crate::distance;
use crate::engine::{build_engine, stack_rows, AnnEngine, Neighbor};
use crate::error::{IndexError, Result};
use crate::offset_map::OffsetMap;
use crate::store::{DocumentStore, Transaction};
use crate::types::{
    DocumentRecord, IndexStats, Match, MutationReport, QueryDocument, RebuildReport,
    SearchOptions,
};
use crate::write_buffer::WriteBuffer;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Rows appended per engine call while rebuilding from the store.
const REBUILD_BATCH: usize = 1024;

/// Produces empty engines; called at construction and on every rebuild.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn AnnEngine> + Send + Sync>;

struct IndexState {
    engine: Box<dyn AnnEngine>,
    offsets: OffsetMap,
    buffer: WriteBuffer,
    needs_rebuild: bool,
}

/// Full CRUD over an append-only ANN engine backed by a document store.
///
/// Mutations and rebuilds hold the state write lock for their whole duration,
/// so offsets are always assigned in the engine's physical append order.
/// Searches share the read lock.
pub struct MutableIndex<S: DocumentStore> {
    config: Arc<IndexConfig>,
    engines: EngineFactory,
    store: S,
    state: RwLock<IndexState>,
}

impl<S: DocumentStore> MutableIndex<S> {
    /// Validates `config` and starts with an empty engine. The store is not read.
    pub fn new(config: IndexConfig, store: S) -> Result<Self> {
        let family = config.validate()?;
        let engine_config = config.clone();
        let engines: EngineFactory = Arc::new(move || build_engine(&engine_config, family));
        Self::with_engine_factory(config, store, engines)
    }

    /// Uses engines from `engines` instead of the family named by the index key.
    pub fn with_engine_factory(
        config: IndexConfig,
        store: S,
        engines: EngineFactory,
    ) -> Result<Self> {
        config.validate()?;
        let engine = engines();
        if engine.dimension() != config.dimension || engine.metric() != config.metric {
            return Err(IndexError::Config(format!(
                "engine is {}-d {} but the index is configured {}-d {}",
                engine.dimension(),
                engine.metric(),
                config.dimension,
                config.metric
            )));
        }
        let state = IndexState {
            engine,
            offsets: OffsetMap::new(),
            buffer: WriteBuffer::new(config.metric),
            needs_rebuild: false,
        };
        Ok(Self {
            config: Arc::new(config),
            engines,
            store,
            state: RwLock::new(state),
        })
    }

    /// Like [`MutableIndex::new`], then rebuilds the engine from the store's contents.
    pub fn open(config: IndexConfig, store: S) -> Result<Self> {
        let index = Self::new(config, store)?;
        index.rebuild()?;
        Ok(index)
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Inserts new documents. Ids that already exist are treated as updates.
    pub fn insert(&self, docs: Vec<DocumentRecord>) -> Result<MutationReport> {
        let mut report = MutationReport::default();
        if docs.is_empty() {
            return Ok(report);
        }

        let mut state = self.state.write()?;
        let mut fresh = Vec::new();
        let mut replaced = Vec::new();
        {
            let mut txn = self.store.begin(true)?;
            for doc in docs {
                if let Err(err) = self.check_record(&doc) {
                    log::warn!("Rejecting document {}: {err}", doc.id);
                    report.reject(doc.id, err);
                    continue;
                }
                let bytes = doc.encode()?;
                if txn.put(doc.id.as_bytes(), &bytes, false)? {
                    fresh.push(doc);
                } else if txn.replace(doc.id.as_bytes(), &bytes)? {
                    replaced.push(doc);
                }
            }
            txn.commit()?;
        }

        if !replaced.is_empty() {
            log::debug!("{} existing ids routed to update", replaced.len());
        }
        for doc in replaced {
            report.updated.push(doc.id.clone());
            state.buffer.put(doc);
        }

        self.append(&mut state, fresh, &mut report)?;
        log::info!(
            "Indexed {} documents ({} updated, {} rejected). Total vectors: {}",
            report.inserted.len(),
            report.updated.len(),
            report.rejected.len(),
            state.engine.total_count()
        );
        Ok(report)
    }

    /// Replaces existing records and overlays them in the write buffer.
    ///
    /// Unknown ids are reported in `not_found`; the rest of the batch proceeds.
    pub fn update(&self, docs: Vec<DocumentRecord>) -> Result<MutationReport> {
        let mut report = MutationReport::default();
        if docs.is_empty() {
            return Ok(report);
        }

        let mut state = self.state.write()?;
        let mut replaced = Vec::new();
        {
            let mut txn = self.store.begin(true)?;
            for doc in docs {
                if let Err(err) = self.check_record(&doc) {
                    log::warn!("Rejecting update for {}: {err}", doc.id);
                    report.reject(doc.id, err);
                    continue;
                }
                let bytes = doc.encode()?;
                if txn.replace(doc.id.as_bytes(), &bytes)? {
                    replaced.push(doc);
                } else {
                    log::warn!("Can not update missing document {}", doc.id);
                    report.not_found.push(doc.id);
                }
            }
            txn.commit()?;
        }

        for doc in replaced {
            report.updated.push(doc.id.clone());
            state.buffer.put(doc);
        }
        log::info!(
            "Updated {} documents; write buffer holds {}",
            report.updated.len(),
            state.buffer.len()
        );
        Ok(report)
    }

    /// Deletes documents. Their engine vectors stay in place, tombstoned.
    pub fn delete<I: AsRef<str>>(&self, ids: &[I]) -> Result<MutationReport> {
        let mut report = MutationReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        let mut state = self.state.write()?;
        let mut removed = Vec::new();
        {
            let mut txn = self.store.begin(true)?;
            for id in ids {
                let id = id.as_ref();
                if txn.delete(id.as_bytes())? {
                    removed.push(id.to_string());
                } else {
                    log::warn!("Can not delete missing document {id}");
                    report.not_found.push(id.to_string());
                }
            }
            txn.commit()?;
        }

        for id in removed {
            let tombstoned = state.offsets.tombstone(&id);
            let unbuffered = state.buffer.remove(&id);
            if !tombstoned && !unbuffered {
                log::debug!("Deleted {id} had neither a live offset nor a buffered copy");
            }
            report.deleted.push(id);
        }
        log::info!(
            "Deleted {} documents ({} tombstoned offsets)",
            report.deleted.len(),
            state.offsets.tombstoned_count()
        );
        Ok(report)
    }

    /// Attaches the `top_k` best matches to every query.
    ///
    /// Matches already attached to a query are carried over into the merge.
    pub fn search(&self, queries: &mut [QueryDocument], options: SearchOptions) -> Result<()> {
        let top_k = options.top_k;
        if top_k == 0 {
            return Err(IndexError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }
        if queries.is_empty() {
            return Ok(());
        }
        for query in queries.iter() {
            self.check_dimension(&query.vector)?;
        }

        let metric = self.config.metric;
        let prepared: Vec<Vec<f32>> = queries
            .iter()
            .map(|query| distance::prepared(metric, &query.vector))
            .collect();

        let state = self.state.read()?;
        let expand_k = top_k
            .saturating_mul(2)
            .saturating_add(state.offsets.tombstoned_count());
        let ann_hits = self.ann_candidates(&state, &prepared, top_k, expand_k)?;

        let txn = self.store.begin(false)?;
        for ((query, vector), hits) in queries.iter_mut().zip(&prepared).zip(ann_hits) {
            let carried = std::mem::take(&mut query.matches);
            let mut merged: HashMap<String, Match> = HashMap::new();

            for (id, score) in hits {
                match fetch(&txn, &id)? {
                    Some(record) => {
                        merged.insert(id, Match { record, score });
                    }
                    None => log::warn!("Live offset for {id} has no stored record"),
                }
            }

            if !state.buffer.is_empty() {
                for hit in state.buffer.search(vector, top_k) {
                    merged.insert(hit.record.id.clone(), hit);
                }
            }

            for prior in carried {
                let id = prior.record.id.as_str();
                if merged.contains_key(id)
                    || state.buffer.contains(id)
                    || !state.offsets.is_live_id(id)
                {
                    continue;
                }
                merged.insert(id.to_string(), prior);
            }

            let mut ranked: Vec<Match> = merged.into_values().collect();
            ranked.sort_by(|a, b| {
                a.score
                    .total_cmp(&b.score)
                    .then_with(|| a.record.id.cmp(&b.record.id))
            });
            ranked.truncate(top_k);
            query.matches = ranked;
        }

        log::debug!(
            "Searched {} queries (top_k={top_k}, expand_k={expand_k}, buffered={})",
            queries.len(),
            state.buffer.len()
        );
        Ok(())
    }

    pub fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        // Shared guard: never observe a batch between store commit and buffer update.
        let _state = self.state.read()?;
        let txn = self.store.begin(false)?;
        fetch(&txn, document_id)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let state = self.state.read()?;
        Ok(IndexStats {
            dimension: self.config.dimension,
            metric: self.config.metric,
            index_key: self.config.index_key.clone(),
            total_vectors: state.engine.total_count(),
            live: state.offsets.live_count(),
            tombstoned: state.offsets.tombstoned_count(),
            buffered: state.buffer.len(),
            needs_rebuild: state.needs_rebuild,
        })
    }

    /// Reconstructs engine and offsets from the store and drains the buffer.
    ///
    /// The new state is built completely before it replaces the old one; on
    /// error the previous state stays in service.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let mut state = self.state.write()?;
        let fresh = self.build_state()?;

        let documents = fresh.offsets.total_assigned();
        let report = RebuildReport {
            documents,
            reclaimed_vectors: state.engine.total_count().saturating_sub(documents),
            drained_buffer: state.buffer.len(),
        };
        *state = fresh;

        log::info!(
            "Rebuilt index from store: {} documents, {} stale vectors reclaimed",
            report.documents,
            report.reclaimed_vectors
        );
        Ok(report)
    }

    fn build_state(&self) -> Result<IndexState> {
        let mut state = self.empty_state();
        let mut ids: Vec<String> = Vec::with_capacity(REBUILD_BATCH);
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(REBUILD_BATCH);

        for (key, value) in self.store.scan()? {
            let record = DocumentRecord::decode(&value)?;
            if key != record.id.as_bytes() {
                return Err(IndexError::Storage(format!(
                    "record {} is stored under a different key",
                    record.id
                )));
            }
            self.check_dimension(&record.vector)?;
            rows.push(distance::prepared(self.config.metric, &record.vector));
            ids.push(record.id);

            if rows.len() == REBUILD_BATCH {
                append_rows(&mut state, &ids, &rows, self.config.dimension)?;
                ids.clear();
                rows.clear();
            }
        }
        if !rows.is_empty() {
            append_rows(&mut state, &ids, &rows, self.config.dimension)?;
        }
        Ok(state)
    }

    fn append(
        &self,
        state: &mut IndexState,
        docs: Vec<DocumentRecord>,
        report: &mut MutationReport,
    ) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = docs.iter().map(|doc| doc.id.clone()).collect();
        let rows: Vec<Vec<f32>> = docs
            .iter()
            .map(|doc| distance::prepared(self.config.metric, &doc.vector))
            .collect();

        match append_rows(state, &ids, &rows, self.config.dimension) {
            Ok(()) => {
                report.inserted.extend(ids);
                Ok(())
            }
            Err(err) => {
                // The records are already committed; keep them searchable until a rebuild.
                log::error!(
                    "Engine append failed for {} committed documents, parking them in the write buffer: {err}",
                    docs.len()
                );
                state.needs_rebuild = true;
                for doc in docs {
                    state.buffer.put(doc);
                }
                Err(err)
            }
        }
    }

    fn ann_candidates(
        &self,
        state: &IndexState,
        prepared: &[Vec<f32>],
        top_k: usize,
        expand_k: usize,
    ) -> Result<Vec<Vec<(String, f32)>>> {
        let mut out = vec![Vec::new(); prepared.len()];
        let total = state.engine.total_count();
        if total == 0 {
            return Ok(out);
        }

        let mut pending: Vec<usize> = (0..prepared.len()).collect();
        let mut k = expand_k.min(total);
        loop {
            let rows: Vec<Vec<f32>> = pending.iter().map(|&i| prepared[i].clone()).collect();
            let batch = stack_rows(&rows, self.config.dimension)?;
            let results = state.engine.search(batch.view(), k)?;

            let mut underfilled = Vec::new();
            for (&query_idx, neighbors) in pending.iter().zip(results) {
                let returned = neighbors.len();
                let live: Vec<(String, f32)> = neighbors
                    .into_iter()
                    .filter_map(|neighbor| resolve(state, neighbor))
                    .collect();
                if live.len() < top_k && returned == k && k < total {
                    underfilled.push(query_idx);
                }
                out[query_idx] = live;
            }

            if underfilled.is_empty() {
                break;
            }
            k = k.saturating_mul(2).min(total);
            log::debug!(
                "{} queries under-filled after tombstone filtering, retrying with k={k}",
                underfilled.len()
            );
            pending = underfilled;
        }
        Ok(out)
    }

    fn empty_state(&self) -> IndexState {
        IndexState {
            engine: (self.engines)(),
            offsets: OffsetMap::new(),
            buffer: WriteBuffer::new(self.config.metric),
            needs_rebuild: false,
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(IndexError::ShapeMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn check_record(&self, doc: &DocumentRecord) -> Result<()> {
        if doc.id.is_empty() {
            return Err(IndexError::InvalidArgument(
                "document id must not be empty".to_string(),
            ));
        }
        self.check_dimension(&doc.vector)?;
        if doc.vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::InvalidArgument(format!(
                "vector of {} contains non-finite values",
                doc.id
            )));
        }
        Ok(())
    }
}

/// Appends prepared rows and binds their offsets. Ids are checked first so a
/// rejected batch never reaches the engine.
fn append_rows(
    state: &mut IndexState,
    ids: &[String],
    rows: &[Vec<f32>],
    dimension: usize,
) -> Result<()> {
    let start = state.engine.total_count();
    state.offsets.check_batch(ids, start)?;
    let batch = stack_rows(rows, dimension)?;
    let range = state.engine.add(batch.view())?;
    if range.len() != ids.len() {
        state.needs_rebuild = true;
        return Err(IndexError::Engine(format!(
            "engine appended {} vectors for {} documents",
            range.len(),
            ids.len()
        )));
    }
    state.offsets.assign_batch(ids, range.start)?;
    Ok(())
}

fn resolve(state: &IndexState, neighbor: Neighbor) -> Option<(String, f32)> {
    if !state.offsets.is_live(neighbor.offset) {
        return None;
    }
    let id = state.offsets.document_id(neighbor.offset)?;
    if state.buffer.contains(id) {
        return None;
    }
    Some((id.to_string(), neighbor.distance))
}

fn fetch<T: Transaction>(txn: &T, document_id: &str) -> Result<Option<DocumentRecord>> {
    txn.get(document_id.as_bytes())?
        .map(|bytes| DocumentRecord::decode(&bytes))
        .transpose()
        .map_err(IndexError::from)
}
