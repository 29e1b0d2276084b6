use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_DIMENSION: usize = 256;
pub const DEFAULT_INDEX_KEY: &str = "Flat";
pub const DEFAULT_NPROBE: usize = 8;
pub const DEFAULT_HNSW_LINKS: usize = 32;
pub const DEFAULT_EF_CONSTRUCTION: usize = 80;
pub const DEFAULT_EF_SEARCH: usize = 20;
const MAX_HNSW_LINKS: usize = 256;

/// Distance metric shared by the ANN engine and the write buffer.
///
/// Every score produced by the index is a distance: lower is better.
/// `InnerProduct` reports the negated inner product and `Cosine` reports
/// `1 - cos`, computed as an inner product over L2-normalized vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    L2,
    InnerProduct,
    #[default]
    Cosine,
}

impl Metric {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::InnerProduct => "inner_product",
            Self::Cosine => "cosine",
        }
    }

    /// Whether vectors must be L2-normalized before they reach an engine.
    #[must_use]
    pub const fn normalizes(self) -> bool {
        matches!(self, Self::Cosine)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = IndexError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "inner_product" | "ip" => Ok(Self::InnerProduct),
            "cosine" => Ok(Self::Cosine),
            other => Err(IndexError::Config(format!(
                "unknown metric '{other}' (expected l2, inner_product or cosine)"
            ))),
        }
    }
}

/// Engine family selected by the index key, e.g. `Flat`, `IVF64,Flat` or `HNSW32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFamily {
    Flat,
    Ivf { nlist: usize },
    Hnsw { links: usize },
}

impl IndexFamily {
    pub fn parse(key: &str) -> Result<Self> {
        let normalized = key.trim();
        if normalized.eq_ignore_ascii_case("flat") {
            return Ok(Self::Flat);
        }

        let upper = normalized.to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("IVF") {
            let (nlist, tail) = rest.split_once(',').unwrap_or((rest, "FLAT"));
            if tail.trim() != "FLAT" {
                return Err(IndexError::Config(format!(
                    "unsupported IVF encoding '{}' in index key '{key}'",
                    tail.trim()
                )));
            }
            let nlist = nlist.trim().parse::<usize>().map_err(|_| {
                IndexError::Config(format!("invalid IVF list count in index key '{key}'"))
            })?;
            if nlist == 0 {
                return Err(IndexError::Config(format!(
                    "IVF list count must be positive in index key '{key}'"
                )));
            }
            return Ok(Self::Ivf { nlist });
        }

        if let Some(rest) = upper.strip_prefix("HNSW") {
            let (links, tail) = rest.split_once(',').unwrap_or((rest, "FLAT"));
            if tail.trim() != "FLAT" {
                return Err(IndexError::Config(format!(
                    "unsupported HNSW storage '{}' in index key '{key}'",
                    tail.trim()
                )));
            }
            let links = match links.trim() {
                "" => DEFAULT_HNSW_LINKS,
                raw => raw.parse::<usize>().map_err(|_| {
                    IndexError::Config(format!("invalid HNSW link count in index key '{key}'"))
                })?,
            };
            if !(2..=MAX_HNSW_LINKS).contains(&links) {
                return Err(IndexError::Config(format!(
                    "HNSW link count must be within 2..={MAX_HNSW_LINKS} in index key '{key}'"
                )));
            }
            return Ok(Self::Hnsw { links });
        }

        Err(IndexError::Config(format!(
            "unsupported index key '{key}' (expected Flat, IVF<n>,Flat or HNSW<m>)"
        )))
    }
}

/// Immutable index configuration. Validate once, then share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_index_key")]
    pub index_key: String,
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

fn default_index_key() -> String {
    DEFAULT_INDEX_KEY.to_string()
}

const fn default_nprobe() -> usize {
    DEFAULT_NPROBE
}

const fn default_ef_construction() -> usize {
    DEFAULT_EF_CONSTRUCTION
}

const fn default_ef_search() -> usize {
    DEFAULT_EF_SEARCH
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            metric: Metric::default(),
            index_key: default_index_key(),
            nprobe: DEFAULT_NPROBE,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_index_key(mut self, key: impl Into<String>) -> Self {
        self.index_key = key.into();
        self
    }

    #[must_use]
    pub const fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Candidate list sizes used while building and searching an HNSW graph.
    #[must_use]
    pub const fn with_hnsw_ef(mut self, ef_construction: usize, ef_search: usize) -> Self {
        self.ef_construction = ef_construction;
        self.ef_search = ef_search;
        self
    }

    /// Checks every field and resolves the engine family.
    pub fn validate(&self) -> Result<IndexFamily> {
        if self.dimension == 0 {
            return Err(IndexError::Config("dimension must be positive".to_string()));
        }
        if self.nprobe == 0 {
            return Err(IndexError::Config("nprobe must be positive".to_string()));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(IndexError::Config(
                "ef_construction and ef_search must be positive".to_string(),
            ));
        }
        IndexFamily::parse(&self.index_key)
    }
}
