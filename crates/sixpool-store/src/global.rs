//! The global pool: every verified address for the current prefix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sixpool_models::GlobalAddrRecord;

use crate::error::StoreResult;
use crate::persist::{read_json, write_json_atomic};

/// File name of the global pool document under the data root.
pub const GLOBAL_DB_FILE: &str = "ipv6_global_addrs.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct GlobalDoc {
    prefix: Option<String>,
    addrs: HashMap<String, GlobalAddrRecord>,
}

/// Durable set of verified addresses plus the current prefix.
///
/// One mutex guards the whole document. It is held across `save`/`load`
/// file I/O as well; saves are rare and the document is small, so brief
/// blocking under the lock is the simpler correct choice.
pub struct GlobalPool {
    path: PathBuf,
    inner: Mutex<GlobalDoc>,
}

impl GlobalPool {
    /// Open the pool at `<db_root>/ipv6_global_addrs.json`, loading any
    /// existing document. Missing or malformed documents start empty.
    pub fn open(db_root: impl AsRef<Path>) -> Self {
        let path = db_root.as_ref().join(GLOBAL_DB_FILE);
        let doc: GlobalDoc = read_json(&path).unwrap_or_default();
        debug!(
            path = %path.display(),
            addrs = doc.addrs.len(),
            "opened global pool"
        );
        Self {
            path,
            inner: Mutex::new(doc),
        }
    }

    /// Admit an address. Returns false when it was already present.
    pub fn add(&self, addr: &str) -> bool {
        let mut doc = self.inner.lock().unwrap();
        if doc.addrs.contains_key(addr) {
            return false;
        }
        doc.addrs
            .insert(addr.to_string(), GlobalAddrRecord::new(addr));
        true
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.inner.lock().unwrap().addrs.contains_key(addr)
    }

    /// All admitted addresses, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.inner.lock().unwrap().addrs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_prefix(&self, prefix: &str) {
        self.inner.lock().unwrap().prefix = Some(prefix.to_string());
    }

    pub fn prefix(&self) -> Option<String> {
        self.inner.lock().unwrap().prefix.clone()
    }

    /// Persist the document.
    pub fn save(&self) -> StoreResult<()> {
        let doc = self.inner.lock().unwrap();
        write_json_atomic(&self.path, &*doc)
    }

    /// Reload the document from disk, replacing in-memory state.
    pub fn load(&self) {
        let loaded: GlobalDoc = read_json(&self.path).unwrap_or_default();
        *self.inner.lock().unwrap() = loaded;
    }

    /// Drop every address (the prefix is kept) and persist the empty set.
    pub fn flush(&self) -> StoreResult<()> {
        {
            let mut doc = self.inner.lock().unwrap();
            doc.addrs.clear();
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_deduplicating() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = GlobalPool::open(dir.path());

        assert!(pool.add("2001:db8::1"));
        assert!(!pool.add("2001:db8::1"));
        assert!(pool.add("2001:db8::2"));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("2001:db8::1"));
        assert!(!pool.contains("2001:db8::3"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let pool = GlobalPool::open(dir.path());
            pool.set_prefix("2001:db8:1:2");
            pool.add("2001:db8:1:2::1");
            pool.add("2001:db8:1:2::2");
            pool.save().unwrap();
        }

        let reopened = GlobalPool::open(dir.path());
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.prefix().as_deref(), Some("2001:db8:1:2"));
        let mut addrs = reopened.list();
        addrs.sort();
        assert_eq!(addrs, vec!["2001:db8:1:2::1", "2001:db8:1:2::2"]);
    }

    #[test]
    fn test_flush_clears_memory_and_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = GlobalPool::open(dir.path());
        pool.set_prefix("2001:db8:1:2");
        pool.add("2001:db8:1:2::1");
        pool.save().unwrap();

        pool.flush().unwrap();
        assert_eq!(pool.len(), 0);

        // The persisted document must also be empty.
        let reopened = GlobalPool::open(dir.path());
        assert_eq!(reopened.len(), 0);
        // Prefix survives a flush.
        assert_eq!(reopened.prefix().as_deref(), Some("2001:db8:1:2"));
    }

    #[test]
    fn test_corrupt_document_loads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(GLOBAL_DB_FILE), "{{{ nope").unwrap();

        let pool = GlobalPool::open(dir.path());
        assert_eq!(pool.len(), 0);
        // A save overwrites the corrupt file.
        pool.add("2001:db8::1");
        pool.save().unwrap();
        let reopened = GlobalPool::open(dir.path());
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_persisted_document_shape() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = GlobalPool::open(dir.path());
        pool.set_prefix("2001:db8:1:2");
        pool.add("2001:db8:1:2::1");
        pool.save().unwrap();

        let raw = std::fs::read_to_string(dir.path().join(GLOBAL_DB_FILE)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["prefix"], "2001:db8:1:2");
        assert_eq!(doc["addrs"]["2001:db8:1:2::1"]["addr"], "2001:db8:1:2::1");
        assert!(doc["addrs"]["2001:db8:1:2::1"]["created_at"].is_string());
    }
}
