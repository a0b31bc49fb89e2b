use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use super::types::{StoredEntry, Summary};
use crate::arch::Architecture;
use crate::hash::Fingerprint;

pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt index file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Fingerprint -> newest-first list of summaries, at most `capacity` long.
///
/// Reads share the lock; `append` takes it exclusively, so appends are
/// linearizable. The backing file, if any, is rewritten while the write lock
/// is held so disk order matches memory order.
pub struct CacheIndex {
    capacity: usize,
    path: Option<PathBuf>,
    entries: RwLock<HashMap<Fingerprint, Vec<Summary>>>,
}

impl CacheIndex {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Loads `path` if it exists, migrating single-summary entries to lists.
    pub fn open(path: PathBuf, capacity: usize) -> Result<Self, IndexError> {
        let capacity = capacity.max(1);
        let mut entries = HashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
            let stored: HashMap<Fingerprint, StoredEntry> =
                serde_json::from_str(&raw).map_err(|source| IndexError::Parse {
                    path: path.clone(),
                    source,
                })?;
            for (fp, entry) in stored {
                let mut list = entry.into_vec();
                list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                list.truncate(capacity);
                entries.insert(fp, list);
            }
            tracing::info!("loaded index with {} fingerprints from {}", entries.len(), path.display());
        }
        Ok(Self {
            capacity,
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Whether any completed task exists for `fp`, and how many are retained.
    pub fn exists(&self, fp: &Fingerprint) -> (bool, usize) {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let count = map.get(fp).map_or(0, Vec::len);
        (count > 0, count)
    }

    pub fn latest(&self, fp: &Fingerprint, arch: Option<Architecture>) -> Option<Summary> {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        map.get(fp)?
            .iter()
            .find(|s| arch.map_or(true, |a| s.declared_architecture == a))
            .cloned()
    }

    /// Inserts at the front and evicts the oldest beyond capacity. The
    /// in-memory update always happens; a persistence failure is returned
    /// for the caller to log.
    pub fn append(&self, fp: &Fingerprint, summary: Summary) -> Result<(), IndexError> {
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let list = map.entry(fp.clone()).or_default();
        list.insert(0, summary);
        list.truncate(self.capacity);
        self.persist(&map)
    }

    pub fn all(&self) -> BTreeMap<Fingerprint, Vec<Summary>> {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn persist(&self, map: &HashMap<Fingerprint, Vec<Summary>>) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| IndexError::Io {
            path: path.clone(),
            source,
        };
        let ordered: BTreeMap<&Fingerprint, &Vec<Summary>> = map.iter().collect();
        let body = serde_json::to_vec_pretty(&ordered).map_err(|source| IndexError::Parse {
            path: path.clone(),
            source,
        })?;
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
