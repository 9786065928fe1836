//! Per-tenant mirrors of the global pool.
//!
//! A mirror holds one record per address with the tenant's own lease
//! state. Membership always follows the global pool via
//! [`Mirror::sync_from_global`]; lease state is the mirror's alone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sixpool_models::{AddrReport, AddrStatus, MirrorAddrRecord, MirrorStats};

use crate::error::StoreResult;
use crate::persist::{read_json, write_json_atomic};

/// Directory under the data root holding one document per tenant.
pub const MIRROR_DB_DIR: &str = "ipv6_mirrors";

#[derive(Debug, Serialize, Deserialize)]
struct MirrorDoc {
    dbname: String,
    addrs: HashMap<String, MirrorAddrRecord>,
}

/// One tenant's lease view over the global pool.
pub struct Mirror {
    dbname: String,
    path: PathBuf,
    inner: Mutex<HashMap<String, MirrorAddrRecord>>,
}

impl Mirror {
    /// Open the mirror for `dbname` at
    /// `<db_root>/ipv6_mirrors/<dbname>.json`, loading any existing
    /// document. Missing or malformed documents start empty.
    pub fn open(db_root: impl AsRef<Path>, dbname: impl Into<String>) -> Self {
        let dbname = dbname.into();
        let path = db_root
            .as_ref()
            .join(MIRROR_DB_DIR)
            .join(format!("{dbname}.json"));
        let addrs = read_json::<MirrorDoc>(&path)
            .map(|doc| doc.addrs)
            .unwrap_or_default();
        debug!(dbname = %dbname, addrs = addrs.len(), "opened mirror");
        Self {
            dbname,
            path,
            inner: Mutex::new(addrs),
        }
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Reconcile membership with the global pool.
    ///
    /// Addresses new to the mirror are admitted as fresh `Idle` records;
    /// addresses the global pool no longer holds are dropped; everything
    /// else keeps its lease state untouched.
    pub fn sync_from_global(&self, globals: &[String]) {
        let mut addrs = self.inner.lock().unwrap();

        for addr in globals {
            if !addrs.contains_key(addr) {
                addrs.insert(addr.clone(), MirrorAddrRecord::new(addr.clone()));
            }
        }

        addrs.retain(|addr, _| globals.iter().any(|g| g == addr));
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == AddrStatus::Idle)
            .count()
    }

    /// Lease some idle address: transition it to `Using`, stamp the lease
    /// time, bump its use counter, and return it. Selection order is
    /// whatever the map yields. Returns `None` when nothing is idle.
    pub fn acquire_idle(&self) -> Option<String> {
        let mut addrs = self.inner.lock().unwrap();
        let addr = addrs
            .iter()
            .find(|(_, r)| r.status == AddrStatus::Idle)
            .map(|(addr, _)| addr.clone())?;
        if let Some(record) = addrs.get_mut(&addr) {
            record.mark_used();
        }
        Some(addr)
    }

    /// Apply a client report. Unknown addresses are silently ignored: the
    /// client may be racing a prefix change that just removed the record,
    /// and there is nothing useful to tell it.
    pub fn release(&self, report: &AddrReport) {
        let mut addrs = self.inner.lock().unwrap();
        if let Some(record) = addrs.get_mut(&report.addr) {
            record.status = report.status;
        }
    }

    pub fn stats(&self) -> MirrorStats {
        let addrs = self.inner.lock().unwrap();
        let mut stats = MirrorStats {
            dbname: self.dbname.clone(),
            total: addrs.len(),
            idle: 0,
            using: 0,
            unusable: 0,
        };
        for record in addrs.values() {
            match record.status {
                AddrStatus::Idle => stats.idle += 1,
                AddrStatus::Using => stats.using += 1,
                AddrStatus::Unusable => stats.unusable += 1,
            }
        }
        stats
    }

    /// Persist the document.
    pub fn save(&self) -> StoreResult<()> {
        let addrs = self.inner.lock().unwrap();
        let doc = MirrorDoc {
            dbname: self.dbname.clone(),
            addrs: addrs.clone(),
        };
        write_json_atomic(&self.path, &doc)
    }

    /// Reload the document from disk, replacing in-memory state.
    pub fn load(&self) {
        let addrs = read_json::<MirrorDoc>(&self.path)
            .map(|doc| doc.addrs)
            .unwrap_or_default();
        *self.inner.lock().unwrap() = addrs;
    }

    /// Drop every record and persist the empty set.
    pub fn flush(&self) -> StoreResult<()> {
        self.inner.lock().unwrap().clear();
        self.save()
    }
}
