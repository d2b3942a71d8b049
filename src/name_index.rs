use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::{params, Connection};

use crate::error::BundleResult;

/// Decoded name-index value the bundle codec reserves as its
/// end-of-property-list sentinel (see `codec::PROPERTY_LIST_TERMINATOR`).
/// Never allocated to a real name.
pub const RESERVED_TERMINATOR_INDEX: u32 = 0xff;

/// Append-only bidirectional mapping between local name strings and small
/// positive integers (C1). Integer 0 is never issued. Once a string is
/// assigned an integer it holds forever (I5); reads of the map are cheap
/// and lock-free on the happy path, writes (new name allocation) take the
/// exclusive side of the lock.
#[derive(Debug, Default)]
struct NameIndexInner {
    by_name: HashMap<String, u32>,
    by_index: HashMap<u32, String>,
    next: u32,
}

#[derive(Clone)]
pub struct NameIndex {
    inner: Arc<RwLock<NameIndexInner>>,
    table: String,
}

impl NameIndex {
    /// Loads the full table into memory. Table must already exist
    /// (created by the schema bootstrapper).
    pub fn load(conn: &Connection, prefix: &str) -> BundleResult<Self> {
        let table = format!("{prefix}NAMES");
        let mut inner = NameIndexInner {
            next: 1,
            ..Default::default()
        };
        let mut stmt = conn.prepare(&format!("SELECT NAME_IDX, NAME_STR FROM {table}"))?;
        let rows = stmt.query_map([], |row| {
            let idx: u32 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok((idx, name))
        })?;
        for row in rows {
            let (idx, name) = row?;
            inner.by_index.insert(idx, name.clone());
            inner.by_name.insert(name, idx);
            if idx >= inner.next {
                inner.next = idx + 1;
            }
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            table,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn resolve(&self, index: u32) -> Option<String> {
        if index == 0 {
            return None;
        }
        self.inner.read().by_index.get(&index).cloned()
    }

    /// Returns the existing index for `name`, allocating and persisting a
    /// fresh one via `conn` if it is not yet known.
    pub fn intern(&self, conn: &Connection, name: &str) -> BundleResult<u32> {
        if let Some(idx) = self.lookup(name) {
            return Ok(idx);
        }
        let mut guard = self.inner.write();
        if let Some(idx) = guard.by_name.get(name) {
            return Ok(*idx);
        }
        let mut idx = guard.next;
        if idx == RESERVED_TERMINATOR_INDEX {
            idx += 1;
        }
        conn.execute(
            &format!("INSERT INTO {} (NAME_IDX, NAME_STR) VALUES (?1, ?2)", self.table),
            params![idx, name],
        )?;
        guard.next = idx + 1;
        guard.by_index.insert(idx, name.to_string());
        guard.by_name.insert(name.to_string(), idx);
        Ok(idx)
    }
}
