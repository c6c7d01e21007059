//! Persistent cache of remote identities and content fingerprints.
//!
//! One store per top-level collection, backed by a JSON file. The store has
//! no sync logic of its own: it maps a [`NodePath`] to the [`CacheEntry`]
//! recorded after that node's last successful sync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::contract::RemoteRef;
use crate::error::CacheError;
use crate::node::NodePath;
use crate::synchronise::SyncMode;

const CACHE_VERSION: u32 = 1;

/// What the engine remembers about one synced node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub remote_id: RemoteRef,
    /// Row parent identity, for datasets only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_id: Option<RemoteRef>,
    /// Absent for folders, and for datasets whose rows have not all synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub mode: SyncMode,
}

impl CacheEntry {
    pub fn new(remote_id: RemoteRef, mode: SyncMode) -> Self {
        CacheEntry {
            remote_id,
            rows_id: None,
            fingerprint: None,
            mode,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_rows(mut self, rows_id: RemoteRef) -> Self {
        self.rows_id = Some(rows_id);
        self
    }
}

#[derive(Serialize)]
struct CacheFileOut<'a> {
    version: u32,
    entries: &'a BTreeMap<NodePath, CacheEntry>,
}

#[derive(Deserialize)]
struct CacheFileIn {
    #[serde(default)]
    entries: BTreeMap<String, serde_json::Value>,
}

/// Keyed store of [`CacheEntry`] values.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    file: Option<PathBuf>,
    entries: BTreeMap<NodePath, CacheEntry>,
}

impl CacheStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        CacheStore::default()
    }

    /// Load the store backing `file`.
    ///
    /// A missing file yields an empty store. An unparseable file is treated
    /// as empty, and an individual malformed entry is dropped on its own.
    pub fn load(file: impl AsRef<Path>) -> Result<Self, CacheError> {
        let file = file.as_ref().to_path_buf();
        let raw = match fs::read_to_string(&file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(cache = %file.display(), "[CACHE] No cache file yet, starting empty");
                return Ok(CacheStore {
                    file: Some(file),
                    entries: BTreeMap::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let parsed: CacheFileIn = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(cache = %file.display(), error = %e, "[CACHE] Unreadable cache file, treating as empty");
                return Ok(CacheStore {
                    file: Some(file),
                    entries: BTreeMap::new(),
                });
            }
        };

        let mut entries = BTreeMap::new();
        for (key, value) in parsed.entries {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) => {
                    entries.insert(NodePath::from(key.as_str()), entry);
                }
                Err(e) => {
                    warn!(path = %key, error = %e, "[CACHE] Dropping malformed cache entry");
                }
            }
        }
        info!(cache = %file.display(), entries = entries.len(), "[CACHE] Loaded cache");
        Ok(CacheStore {
            file: Some(file),
            entries,
        })
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn get(&self, path: &NodePath) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    pub fn put(&mut self, path: NodePath, entry: CacheEntry) {
        debug!(path = %path, remote_id = %entry.remote_id, "[CACHE] put");
        self.entries.insert(path, entry);
    }

    /// Remove `path` and every entry beneath it. Returns how many went.
    pub fn remove_prefix(&mut self, path: &NodePath) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !path.contains(k.as_str()));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &CacheEntry)> {
        self.entries.iter()
    }

    /// Flush to disk atomically. In-memory stores do nothing.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let dir = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let body = serde_json::to_string_pretty(&CacheFileOut {
            version: CACHE_VERSION,
            entries: &self.entries,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.flush()?;
        tmp.persist(file)?;
        info!(cache = %file.display(), entries = self.entries.len(), "[CACHE] Saved cache");
        Ok(())
    }
}
