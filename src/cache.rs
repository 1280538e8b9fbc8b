//! Persistent cache of discovered call-sites.
//!
//! Scanning every method body of a large binary is the expensive part of an instrumentation
//! pass. The [`CacheStore`] remembers, per (binary, mutator), which methods contained a
//! call-site the last time the binary was scanned, together with the binary's last-modified
//! timestamp. A later pass whose binary still carries the same timestamp (within a tolerance)
//! only re-resolves those methods instead of scanning again.
//!
//! Cached entries only name methods; the scanner looks each of them up again inside the
//! freshly loaded module.
//!
//! The store can be persisted as a JSON document. A missing or unreadable document degrades
//! to an empty store, which simply causes full scans.
//!
//! # Examples
//!
//! ```rust
//! use std::time::{Duration, SystemTime};
//! use mutscope::cache::{CacheEntry, CacheStore};
//!
//! let mut cache = CacheStore::new(Duration::from_secs(5));
//! let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
//! cache.store("Game.dll", "Game.Mover.Update()", CacheEntry::new(stamp, "Game.dll", vec![]));
//!
//! assert!(cache.lookup_valid("Game.dll", "Game.Mover.Update()", stamp).is_some());
//! let rebuilt = stamp + Duration::from_secs(60);
//! assert!(cache.lookup_valid("Game.dll", "Game.Mover.Update()", rebuilt).is_none());
//! ```

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Format version of the persisted cache document.
const CACHE_FORMAT_VERSION: u32 = 1;

/// Key of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Path of the scanned binary
    pub binary_path: PathBuf,
    /// Full name of the mutator that was searched for
    pub mutator: String,
}

impl CacheKey {
    /// Creates a key.
    pub fn new(binary_path: impl Into<PathBuf>, mutator: &str) -> Self {
        CacheKey {
            binary_path: binary_path.into(),
            mutator: mutator.to_string(),
        }
    }
}

/// A method that contained a call-site, by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachedMethod {
    /// Full name of the declaring type
    pub type_name: String,
    /// Full method name, see [`crate::il::MethodIdentity::full_name`]
    pub full_method_name: String,
}

/// Call-sites of one mutator in one binary, as of a given binary timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Last-modified time of the binary when it was scanned
    pub binary_timestamp: SystemTime,
    /// Path of the scanned binary
    pub binary_path: PathBuf,
    /// Methods that contained at least one call-site
    pub methods: Vec<CachedMethod>,
}

impl CacheEntry {
    /// Creates an entry.
    pub fn new(
        binary_timestamp: SystemTime,
        binary_path: impl Into<PathBuf>,
        methods: Vec<CachedMethod>,
    ) -> Self {
        CacheEntry {
            binary_timestamp,
            binary_path: binary_path.into(),
            methods,
        }
    }

    /// Returns `true` if the entry was recorded for a binary with timestamp `current`.
    #[must_use]
    pub fn is_valid_for(&self, current: SystemTime, tolerance: Duration) -> bool {
        let difference = match current.duration_since(self.binary_timestamp) {
            Ok(ahead) => ahead,
            Err(behind) => behind.duration(),
        };
        difference <= tolerance
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: CacheKey,
    entry: CacheEntry,
}

#[derive(Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    entries: Vec<PersistedEntry>,
}

/// In-memory call-site cache with optional JSON persistence.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,
    tolerance: Duration,
}

impl CacheStore {
    /// Creates an empty store with the given timestamp tolerance.
    #[must_use]
    pub fn new(tolerance: Duration) -> Self {
        CacheStore {
            entries: HashMap::new(),
            tolerance,
        }
    }

    /// Loads a persisted store.
    ///
    /// A missing file yields an empty store. A file that cannot be read or parsed also yields
    /// an empty store, after logging a warning.
    #[must_use]
    pub fn load(path: &Path, tolerance: Duration) -> Self {
        let mut store = CacheStore::new(tolerance);

        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("No call-site cache at '{}'", path.display());
                return store;
            }
            Err(error) => {
                warn!("Unable to read call-site cache '{}': {}", path.display(), error);
                return store;
            }
        };

        match serde_json::from_str::<PersistedCache>(&data) {
            Ok(persisted) if persisted.version == CACHE_FORMAT_VERSION => {
                store.entries = persisted
                    .entries
                    .into_iter()
                    .map(|e| (e.key, e.entry))
                    .collect();
                debug!(
                    "Loaded {} call-site cache entries from '{}'",
                    store.entries.len(),
                    path.display()
                );
            }
            Ok(persisted) => {
                warn!(
                    "Ignoring call-site cache '{}' with unsupported version {}",
                    path.display(),
                    persisted.version
                );
            }
            Err(error) => {
                warn!("Ignoring corrupt call-site cache '{}': {}", path.display(), error);
            }
        }

        store
    }

    /// Writes the store to `path` as JSON.
    ///
    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut entries: Vec<PersistedEntry> = self
            .entries
            .iter()
            .map(|(key, entry)| PersistedEntry {
                key: key.clone(),
                entry: entry.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (&a.key.binary_path, &a.key.mutator).cmp(&(&b.key.binary_path, &b.key.mutator))
        });

        let document = PersistedCache {
            version: CACHE_FORMAT_VERSION,
            entries,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }

    /// Returns the entry for (binary, mutator) regardless of staleness.
    #[must_use]
    pub fn lookup(&self, binary_path: impl AsRef<Path>, mutator: &str) -> Option<&CacheEntry> {
        self.entries
            .get(&CacheKey::new(binary_path.as_ref(), mutator))
    }

    /// Returns the entry for (binary, mutator) if it was recorded for `current_timestamp`.
    #[must_use]
    pub fn lookup_valid(
        &self,
        binary_path: impl AsRef<Path>,
        mutator: &str,
        current_timestamp: SystemTime,
    ) -> Option<&CacheEntry> {
        self.lookup(binary_path, mutator)
            .filter(|entry| entry.is_valid_for(current_timestamp, self.tolerance))
    }

    /// Inserts or replaces the entry for (binary, mutator).
    pub fn store(&mut self, binary_path: impl Into<PathBuf>, mutator: &str, entry: CacheEntry) {
        self.entries.insert(CacheKey::new(binary_path, mutator), entry);
    }

    /// Removes every entry recorded for `binary_path`, returning how many were removed.
    pub fn invalidate(&mut self, binary_path: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.binary_path != binary_path);
        before - self.entries.len()
    }

    /// The timestamp tolerance used by [`CacheStore::lookup_valid`].
    #[must_use]
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
