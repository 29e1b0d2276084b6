//! Transactional document store seam plus the bundled ordered KV implementation.

use crate::error::{IndexError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

pub const KV_STORE_SCHEMA_VERSION: u32 = 1;

/// A scoped store transaction. Dropping it without `commit` aborts.
pub trait Transaction {
    /// Returns `true` when the key was newly inserted. With `overwrite == false`
    /// an existing key is left untouched and `false` is returned.
    fn put(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> Result<bool>;

    /// Returns `true` when the key existed and was replaced.
    fn replace(&mut self, key: &[u8], value: &[u8]) -> Result<bool>;

    /// Returns `true` when the key existed.
    fn delete(&mut self, key: &[u8]) -> Result<bool>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn commit(self) -> Result<()>;
}

pub trait DocumentStore: Send + Sync {
    type Txn<'a>: Transaction
    where
        Self: 'a;

    fn begin(&self, write: bool) -> Result<Self::Txn<'_>>;

    /// A finite pass over every committed entry, ordered by key.
    fn scan(&self) -> Result<Scan>;
}

/// Snapshot iterator returned by [`DocumentStore::scan`].
pub struct Scan {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Scan {
    #[must_use]
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for Scan {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedKvStore {
    schema_version: u32,
    entries: BTreeMap<String, String>,
}

/// Ordered key-value store with serialized write transactions.
///
/// When opened from a path, each commit rewrites the JSON file atomically
/// (temp file + rename) before the new state becomes visible.
pub struct KvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl KvStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
            path: None,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            load_entries(&path)?
        } else {
            BTreeMap::new()
        };
        log::info!("Opened document store at {:?} ({} entries)", path, data.len());
        Ok(Self {
            data: RwLock::new(data),
            writer: Mutex::new(()),
            path: Some(path),
        })
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.data.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn apply(&self, pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<()> {
        let mut next = self.data.read()?.clone();
        for (key, value) in pending {
            match value {
                Some(value) => next.insert(key, value),
                None => next.remove(&key),
            };
        }
        if let Some(path) = &self.path {
            persist_entries(path, &next)?;
        }
        *self.data.write()? = next;
        Ok(())
    }
}

impl DocumentStore for KvStore {
    type Txn<'a> = KvTransaction<'a>;

    fn begin(&self, write: bool) -> Result<KvTransaction<'_>> {
        let writer = if write {
            Some(self.writer.lock()?)
        } else {
            None
        };
        Ok(KvTransaction {
            store: self,
            writer,
            pending: BTreeMap::new(),
        })
    }

    fn scan(&self) -> Result<Scan> {
        let data = self.data.read()?;
        Ok(Scan::new(
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))
    }
}

pub struct KvTransaction<'a> {
    store: &'a KvStore,
    writer: Option<MutexGuard<'a, ()>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl KvTransaction<'_> {
    fn ensure_writable(&self) -> Result<()> {
        if self.writer.is_none() {
            return Err(IndexError::Storage(
                "write attempted in a read-only transaction".to_string(),
            ));
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl Transaction for KvTransaction<'_> {
    fn put(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> Result<bool> {
        self.ensure_writable()?;
        let existed = self.exists(key)?;
        if existed && !overwrite {
            return Ok(false);
        }
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(!existed)
    }

    fn replace(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        if !self.exists(key)? {
            return Ok(false);
        }
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(true)
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        if !self.exists(key)? {
            return Ok(false);
        }
        self.pending.insert(key.to_vec(), None);
        Ok(true)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.store.data.read()?.get(key).cloned())
    }

    fn commit(mut self) -> Result<()> {
        if self.writer.is_none() || self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        self.store.apply(pending)
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let bytes = std::fs::read(path)?;
    let persisted: PersistedKvStore = serde_json::from_slice(&bytes)?;
    if persisted.schema_version != KV_STORE_SCHEMA_VERSION {
        return Err(IndexError::Storage(format!(
            "Unsupported document store schema_version {} (expected {KV_STORE_SCHEMA_VERSION})",
            persisted.schema_version
        )));
    }

    let mut out = BTreeMap::new();
    for (key, value) in persisted.entries {
        let key = STANDARD
            .decode(key)
            .map_err(|err| IndexError::Storage(format!("corrupt key in {path:?}: {err}")))?;
        let value = STANDARD
            .decode(value)
            .map_err(|err| IndexError::Storage(format!("corrupt value in {path:?}: {err}")))?;
        out.insert(key, value);
    }
    Ok(out)
}

fn persist_entries(path: &Path, entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let persisted = PersistedKvStore {
        schema_version: KV_STORE_SCHEMA_VERSION,
        entries: entries
            .iter()
            .map(|(k, v)| (STANDARD.encode(k), STANDARD.encode(v)))
            .collect(),
    };
    let bytes = serde_json::to_vec_pretty(&persisted)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_without_overwrite_reports_existing_key() {
        let store = KvStore::in_memory();
        let mut txn = store.begin(true).unwrap();
        assert!(txn.put(b"a", b"1", false).unwrap());
        assert!(!txn.put(b"a", b"2", false).unwrap());
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
        txn.commit().unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn dropped_transaction_aborts() {
        let store = KvStore::in_memory();
        {
            let mut txn = store.begin(true).unwrap();
            txn.put(b"a", b"1", true).unwrap();
        }
        assert!(store.is_empty().unwrap());

        let txn = store.begin(false).unwrap();
        assert_eq!(txn.get(b"a").unwrap(), None);
    }

    #[test]
    fn replace_and_delete_require_existing_key() {
        let store = KvStore::in_memory();
        let mut txn = store.begin(true).unwrap();
        assert!(!txn.replace(b"a", b"1").unwrap());
        assert!(!txn.delete(b"a").unwrap());
        txn.put(b"a", b"1", false).unwrap();
        assert!(txn.replace(b"a", b"2").unwrap());
        assert!(txn.delete(b"a").unwrap());
        assert!(txn.put(b"a", b"3", false).unwrap());
        txn.commit().unwrap();

        let keys: Vec<Vec<u8>> = store.scan().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec()]);
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let store = KvStore::in_memory();
        let mut txn = store.begin(false).unwrap();
        assert!(matches!(
            txn.put(b"a", b"1", true),
            Err(IndexError::Storage(_))
        ));
    }

    #[test]
    fn file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("docs").join("store.json");

        let store = KvStore::open(&path).unwrap();
        let mut txn = store.begin(true).unwrap();
        txn.put(b"alpha", b"{\"x\":1}", false).unwrap();
        txn.put(b"beta", b"\x00\xff", false).unwrap();
        txn.commit().unwrap();
        drop(store);

        let reopened = KvStore::open(&path).unwrap();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = reopened.scan().unwrap().collect();
        assert_eq!(
            entries,
            vec![
                (b"alpha".to_vec(), b"{\"x\":1}".to_vec()),
                (b"beta".to_vec(), b"\x00\xff".to_vec()),
            ]
        );
    }
}
