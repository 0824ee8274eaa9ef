//! Persistence adapter over two key-value tiers.
//!
//! The durable tier survives restarts (file-backed in production), the
//! session tier lives only as long as the process. Neither tier offers
//! transactions across keys.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persisted key names.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "ww_access_token";
    pub const REFRESH_TOKEN: &str = "ww_refresh_token";
    pub const USER: &str = "ww_user";
    /// Durable tier only.
    pub const REMEMBER_ME: &str = "ww_remember_me";

    pub const ALL: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, USER, REMEMBER_ME];
}

/// Storage horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Survives process restarts.
    Durable,
    /// Discarded when the process ends.
    Session,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Durable, Tier::Session];

    pub fn name(self) -> &'static str {
        match self {
            Tier::Durable => "durable",
            Tier::Session => "session",
        }
    }
}

/// A single flat key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Uniform get/set/remove over a named tier.
pub trait PersistenceAdapter: Send + Sync {
    fn get(&self, tier: Tier, key: &str) -> Result<Option<String>>;
    fn set(&self, tier: Tier, key: &str, value: &str) -> Result<()>;
    fn remove(&self, tier: Tier, key: &str) -> Result<()>;
}

/// In-process store. Backs the session tier and doubles as a test fake.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// JSON-file store for the durable tier.
///
/// The whole map is rewritten on every mutation. A failed write leaves the
/// in-memory view unchanged so it never diverges from disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    ///
    /// An unreadable file starts the store empty. A file that does not parse
    /// is moved aside to `<name>.corrupt` first.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            Self::load(&path)
        } else {
            BTreeMap::new()
        };

        tracing::debug!("Opened durable storage at {:?}", path);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to read storage file {:?}, starting empty: {}", path, e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(e) => {
                let aside = path.with_extension("json.corrupt");
                tracing::warn!(
                    "Storage file {:?} is corrupt, moving it to {:?}: {}",
                    path,
                    aside,
                    e
                );
                if let Err(e) = fs::rename(path, &aside) {
                    tracing::warn!("Failed to move corrupt storage file aside: {}", e);
                }
                BTreeMap::new()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }

        let json = serde_json::to_string_pretty(entries).context("Failed to serialize storage")?;
        fs::write(&self.path, json).context("Failed to write storage file")?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());

        if let Err(e) = self.flush(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.flush(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

/// Two [`KeyValueStore`]s exposed as one [`PersistenceAdapter`].
#[derive(Clone)]
pub struct TieredStorage {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl TieredStorage {
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, session }
    }

    /// Both tiers in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Durable tier backed by a JSON file, session tier in memory.
    pub fn with_durable_file(path: impl Into<PathBuf>) -> Result<Self> {
        let durable = FileStore::open(path)?;
        Ok(Self::new(Arc::new(durable), Arc::new(MemoryStore::new())))
    }

    fn store(&self, tier: Tier) -> &dyn KeyValueStore {
        match tier {
            Tier::Durable => self.durable.as_ref(),
            Tier::Session => self.session.as_ref(),
        }
    }
}

impl PersistenceAdapter for TieredStorage {
    fn get(&self, tier: Tier, key: &str) -> Result<Option<String>> {
        self.store(tier).get(key)
    }

    fn set(&self, tier: Tier, key: &str, value: &str) -> Result<()> {
        self.store(tier).set(key, value)
    }

    fn remove(&self, tier: Tier, key: &str) -> Result<()> {
        self.store(tier).remove(key)
    }
}

impl std::fmt::Debug for TieredStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStorage").finish_non_exhaustive()
    }
}
