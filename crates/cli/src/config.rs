use annex_index::{IndexConfig, Metric};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk configuration (`annex.toml`).
///
/// ```toml
/// store = "data/annex.json"
///
/// [index]
/// dimension = 384
/// metric = "cosine"
/// index_key = "IVF64,Flat"
/// nprobe = 8
/// # HNSW keys only
/// ef_construction = 80
/// ef_search = 20
/// ```
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub store: Option<PathBuf>,
    #[serde(default)]
    pub index: IndexSection,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IndexSection {
    pub dimension: Option<usize>,
    pub metric: Option<Metric>,
    pub index_key: Option<String>,
    pub nprobe: Option<usize>,
    pub ef_construction: Option<usize>,
    pub ef_search: Option<usize>,
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| anyhow!("Config parse error: {err}"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }
}

/// Values given on the command line. They win over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub store: Option<PathBuf>,
    pub dimension: Option<usize>,
    pub metric: Option<String>,
    pub index_key: Option<String>,
    pub nprobe: Option<usize>,
    pub ef_construction: Option<usize>,
    pub ef_search: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub index: IndexConfig,
    /// `None` keeps documents in memory for the lifetime of the process.
    pub store: Option<PathBuf>,
}

pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<ResolvedConfig> {
    let defaults = IndexConfig::default();
    let metric = match overrides.metric {
        Some(raw) => raw
            .parse::<Metric>()
            .map_err(|err| anyhow!("--metric: {err}"))?,
        None => file.index.metric.unwrap_or(defaults.metric),
    };
    let dimension = overrides
        .dimension
        .or(file.index.dimension)
        .unwrap_or(defaults.dimension);
    let index = IndexConfig::new(dimension, metric)
        .with_index_key(
            overrides
                .index_key
                .or(file.index.index_key)
                .unwrap_or(defaults.index_key),
        )
        .with_nprobe(
            overrides
                .nprobe
                .or(file.index.nprobe)
                .unwrap_or(defaults.nprobe),
        )
        .with_hnsw_ef(
            overrides
                .ef_construction
                .or(file.index.ef_construction)
                .unwrap_or(defaults.ef_construction),
            overrides
                .ef_search
                .or(file.index.ef_search)
                .unwrap_or(defaults.ef_search),
        );
    index.validate().context("Invalid index configuration")?;

    Ok(ResolvedConfig {
        index,
        store: overrides.store.or(file.store),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flags_override_file_values() {
        let file = FileConfig::parse(
            r#"
            store = "from-file.json"

            [index]
            dimension = 8
            metric = "l2"
            index_key = "IVF4,Flat"
            "#,
        )
        .unwrap();
        let resolved = resolve(
            file,
            Overrides {
                dimension: Some(3),
                metric: Some("ip".to_string()),
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.index.dimension, 3);
        assert_eq!(resolved.index.metric, Metric::InnerProduct);
        assert_eq!(resolved.index.index_key, "IVF4,Flat");
        assert_eq!(resolved.store, Some(PathBuf::from("from-file.json")));
    }

    #[test]
    fn hnsw_settings_come_from_file_and_flags() {
        let file = FileConfig::parse(
            "[index]\nindex_key = \"HNSW16\"\nef_construction = 120\nef_search = 40\n",
        )
        .unwrap();
        let resolved = resolve(
            file,
            Overrides {
                ef_search: Some(64),
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.index.index_key, "HNSW16");
        assert_eq!(resolved.index.ef_construction, 120);
        assert_eq!(resolved.index.ef_search, 64);
    }

    #[test]
    fn defaults_fill_missing_values() {
        let resolved = resolve(FileConfig::default(), Overrides::default()).unwrap();
        assert_eq!(resolved.index, IndexConfig::default());
        assert_eq!(resolved.store, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = FileConfig::parse("[index]\ndimensions = 3\n").unwrap_err();
        assert!(err.to_string().contains("dimensions"), "{err}");
    }

    #[test]
    fn unsupported_index_key_fails_resolution() {
        let err = resolve(
            FileConfig::default(),
            Overrides {
                index_key: Some("PQ16".to_string()),
                ..Overrides::default()
            },
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("PQ16"), "{err:#}");
    }
}
