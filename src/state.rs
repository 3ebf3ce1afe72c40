//! Durable state tracking for applied resources
//!
//! The state store is the diff baseline for planning and the single durable
//! owner of per-address records. The executor is the only writer, and writes
//! land record-by-record so a crash mid-apply leaves an address-granular
//! account of what actually changed. Per-address compare-and-set on the
//! version token makes two concurrent runs fail fast with a conflict rather
//! than silently overwriting each other.

use crate::error::{EngineError, EngineResult};
use crate::graph::Address;
use crate::manifest::AttrMap;
use crate::traits::FileSystem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Last-applied record for one resource address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Provider resource kind
    pub kind: String,

    /// Identifier assigned by the remote API
    pub remote_id: String,

    /// The materialized attributes as applied (the diff baseline)
    pub inputs: AttrMap,

    /// Committed attributes including provider-computed ones (e.g. id)
    pub attributes: AttrMap,

    /// Dependencies at apply time; destroy ordering for removed definitions
    /// is derived from these
    #[serde(default)]
    pub depends_on: Vec<Address>,

    /// Logical version/lock token, bumped on every commit
    pub version: u64,

    /// Timestamp of the last successful commit
    pub updated_at: DateTime<Utc>,
}

/// Durable record store keyed by resource address
pub trait StateStore: Send + Sync {
    /// Verify the store is reachable and parseable
    fn ping(&self) -> EngineResult<()>;

    /// Read all records
    fn snapshot(&self) -> EngineResult<BTreeMap<Address, StateRecord>>;

    /// Read one record
    fn get(&self, address: &Address) -> EngineResult<Option<StateRecord>>;

    /// Write one record with compare-and-set on the version token
    ///
    /// `expected_version` None means the record must not exist yet (first
    /// create); Some(v) means the stored version must equal v. The stored
    /// record gets version v+1 (or 1) and a fresh timestamp.
    fn commit(
        &self,
        address: &Address,
        record: StateRecord,
        expected_version: Option<u64>,
    ) -> EngineResult<StateRecord>;

    /// Remove one record, checking the version token
    fn remove(&self, address: &Address, expected_version: u64) -> EngineResult<()>;
}

/// On-disk state document
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    format_version: u32,
    #[serde(default)]
    records: BTreeMap<Address, StateRecord>,
}

const FORMAT_VERSION: u32 = 1;

/// File-backed state store (a single JSON document)
///
/// Every operation is a read-modify-write of the whole document under an
/// internal mutex; per-address atomicity comes from the version tokens.
pub struct FileStateStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Write an empty state document if none exists yet
    pub fn init_empty(&self) -> EngineResult<()> {
        let _guard = self.lock.lock().unwrap();
        if self.fs.exists(&self.path) {
            return Ok(());
        }
        self.save(&StateDocument {
            format_version: FORMAT_VERSION,
            records: BTreeMap::new(),
        })
    }

    fn load(&self) -> EngineResult<StateDocument> {
        if !self.fs.exists(&self.path) {
            return Ok(StateDocument {
                format_version: FORMAT_VERSION,
                records: BTreeMap::new(),
            });
        }

        let contents = self
            .fs
            .read_to_string(&self.path)
            .map_err(|e| EngineError::StateUnreachable(e.to_string()))?;

        serde_json::from_str(&contents).map_err(|e| {
            EngineError::StateUnreachable(format!("corrupt state file {:?}: {}", self.path, e))
        })
    }

    fn save(&self, doc: &StateDocument) -> EngineResult<()> {
        let contents = serde_json::to_string_pretty(doc)
            .map_err(|e| EngineError::StateUnreachable(e.to_string()))?;
        self.fs
            .write(&self.path, &contents)
            .map_err(|e| EngineError::StateUnreachable(e.to_string()))
    }

    fn check_version(
        address: &Address,
        existing: Option<&StateRecord>,
        expected: Option<u64>,
    ) -> EngineResult<()> {
        let actual = existing.map(|r| r.version);
        if actual != expected {
            return Err(EngineError::Conflict {
                address: address.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn ping(&self) -> EngineResult<()> {
        let _guard = self.lock.lock().unwrap();
        self.load().map(|_| ())
    }

    fn snapshot(&self) -> EngineResult<BTreeMap<Address, StateRecord>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.load()?.records)
    }

    fn get(&self, address: &Address) -> EngineResult<Option<StateRecord>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.load()?.records.get(address).cloned())
    }

    fn commit(
        &self,
        address: &Address,
        mut record: StateRecord,
        expected_version: Option<u64>,
    ) -> EngineResult<StateRecord> {
        let _guard = self.lock.lock().unwrap();
        let mut doc = self.load()?;

        Self::check_version(address, doc.records.get(address), expected_version)?;

        record.version = expected_version.unwrap_or(0) + 1;
        record.updated_at = Utc::now();
        doc.records.insert(address.clone(), record.clone());
        self.save(&doc)?;

        Ok(record)
    }

    fn remove(&self, address: &Address, expected_version: u64) -> EngineResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut doc = self.load()?;

        Self::check_version(address, doc.records.get(address), Some(expected_version))?;

        doc.records.remove(address);
        self.save(&doc)
    }
}

/// In-memory state store for tests
#[cfg(test)]
pub struct MemoryStateStore {
    records: std::sync::RwLock<BTreeMap<Address, StateRecord>>,
}

#[cfg(test)]
impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            records: std::sync::RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_records(records: BTreeMap<Address, StateRecord>) -> Self {
        Self {
            records: std::sync::RwLock::new(records),
        }
    }
}

#[cfg(test)]
impl StateStore for MemoryStateStore {
    fn ping(&self) -> EngineResult<()> {
        Ok(())
    }

    fn snapshot(&self) -> EngineResult<BTreeMap<Address, StateRecord>> {
        Ok(self.records.read().unwrap().clone())
    }

    fn get(&self, address: &Address) -> EngineResult<Option<StateRecord>> {
        Ok(self.records.read().unwrap().get(address).cloned())
    }

    fn commit(
        &self,
        address: &Address,
        mut record: StateRecord,
        expected_version: Option<u64>,
    ) -> EngineResult<StateRecord> {
        let mut records = self.records.write().unwrap();
        FileStateStore::check_version(address, records.get(address), expected_version)?;

        record.version = expected_version.unwrap_or(0) + 1;
        record.updated_at = Utc::now();
        records.insert(address.clone(), record.clone());
        Ok(record)
    }

    fn remove(&self, address: &Address, expected_version: u64) -> EngineResult<()> {
        let mut records = self.records.write().unwrap();
        FileStateStore::check_version(address, records.get(address), Some(expected_version))?;
        records.remove(address);
        Ok(())
    }
}

/// Build a fresh record for a commit (version/timestamp are set by the store)
pub fn new_record(
    kind: &str,
    remote_id: &str,
    inputs: AttrMap,
    attributes: AttrMap,
    depends_on: Vec<Address>,
) -> StateRecord {
    StateRecord {
        kind: kind.to_string(),
        remote_id: remote_id.to_string(),
        inputs,
        attributes,
        depends_on,
        version: 0,
        updated_at: Utc::now(),
    }
}
