//! # Annex Index
//!
//! Full CRUD semantics over an append-only nearest-neighbor engine.
//!
//! ## Features
//!
//! - **Soft deletes** via per-offset tombstones
//! - **Updates** through an in-memory write buffer that overrides stale engine vectors
//! - **Reconciled search** merging engine hits, buffered documents and carried-over matches
//! - **Rebuild** from the document store to reclaim tombstoned space
//!
//! ## Architecture
//!
//! ```text
//! insert/update/delete
//!     │
//!     ├──> DocumentStore (authoritative records, transactional)
//!     │
//!     ├──> AnnEngine (append-only: Flat | IVF<n>,Flat | HNSW<m>)
//!     │      └─> OffsetMap (offset <-> id, tombstones)
//!     │
//!     └──> WriteBuffer (updated documents, brute force)
//!
//! search = engine (over-fetched, tombstones dropped)
//!        + write buffer (authoritative)
//!        + carried-over matches
//!        ──> top_k by ascending distance
//! ```
//!
//! ## Example
//!
//! ```
//! use annex_index::{
//!     DocumentRecord, IndexConfig, KvStore, Metric, MutableIndex, QueryDocument, SearchOptions,
//! };
//!
//! # fn main() -> annex_index::Result<()> {
//! let index = MutableIndex::open(IndexConfig::new(2, Metric::Cosine), KvStore::in_memory())?;
//! index.insert(vec![
//!     DocumentRecord::new("a", vec![1.0, 0.0]),
//!     DocumentRecord::new("b", vec![0.0, 1.0]),
//! ])?;
//!
//! let mut queries = vec![QueryDocument::new(vec![1.0, 0.0])];
//! index.search(&mut queries, SearchOptions::top_k(1))?;
//! assert_eq!(queries[0].match_ids(), vec!["a"]);
//! # Ok(())
//! # }
//! ```

mod config;
mod distance;
pub mod engine;
mod error;
mod index;
mod offset_map;
pub mod store;
mod types;
mod write_buffer;

pub use config::{
    IndexConfig, IndexFamily, Metric, DEFAULT_DIMENSION, DEFAULT_EF_CONSTRUCTION,
    DEFAULT_EF_SEARCH, DEFAULT_HNSW_LINKS, DEFAULT_INDEX_KEY, DEFAULT_NPROBE,
};
pub use distance::normalize;
pub use engine::{AnnEngine, FlatEngine, HnswEngine, IvfEngine, Neighbor};
pub use error::{IndexError, Result};
pub use index::{EngineFactory, MutableIndex};
pub use offset_map::OffsetMap;
pub use store::{DocumentStore, KvStore, KvTransaction, Scan, Transaction};
pub use types::{
    DocumentRecord, IndexStats, Match, MutationReport, QueryDocument, RebuildReport, Rejection,
    SearchOptions, DEFAULT_TOP_K,
};
pub use write_buffer::WriteBuffer;
