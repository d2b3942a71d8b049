//! References store (C6): CRUD over back-reference sets keyed by target
//! node id. Values are serialized as a length-prefixed sequence of
//! property ids (§4.3), mirroring the bundle store's CRUD shape exactly.

use rusqlite::{params, Connection};

use crate::config::StorageModel;
use crate::error::{BundleResult, BundleStoreError};
use crate::ids::NodeId;
use crate::keys::{key_columns, key_param, key_where, KeyParam};
use crate::model::NodeReferences;
use crate::statement_pool::StatementPool;
use crate::varint::{read_uvarint, write_uvarint};

pub struct ReferencesStore {
    pool: StatementPool,
    model: StorageModel,
    table: String,
}

impl ReferencesStore {
    pub fn new(pool: StatementPool, prefix: &str, model: StorageModel) -> Self {
        Self {
            pool,
            model,
            table: format!("{prefix}REFS"),
        }
    }

    pub fn exists_refs(&self, target: &NodeId) -> BundleResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        let found = match key_param(target, self.model) {
            KeyParam::Binary(bytes) => {
                self.pool
                    .query_row(&sql, params![bytes.to_vec()], |row| row.get::<_, i64>(0))?
            }
            KeyParam::Split(hi, lo) => {
                self.pool
                    .query_row(&sql, params![hi, lo], |row| row.get::<_, i64>(0))?
            }
        };
        Ok(found.is_some())
    }

    pub fn load_refs(&self, target: &NodeId) -> BundleResult<Option<NodeReferences>> {
        let sql = format!(
            "SELECT REFS_DATA FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        let payload: Option<Vec<u8>> = match key_param(target, self.model) {
            KeyParam::Binary(bytes) => {
                self.pool.query_row(&sql, params![bytes.to_vec()], |row| row.get(0))?
            }
            KeyParam::Split(hi, lo) => {
                self.pool.query_row(&sql, params![hi, lo], |row| row.get(0))?
            }
        };
        payload.map(|bytes| decode_refs(&bytes)).transpose()
    }

    /// Created on first non-empty write, destroyed when the set becomes
    /// empty (spec §3 "Lifecycles").
    pub fn store_refs(&self, target: &NodeId, refs: &NodeReferences, is_new: bool) -> BundleResult<()> {
        let conn = self.pool.conn().lock();
        self.store_refs_locked(&conn, target, refs, is_new)
    }

    /// Same as [`Self::store_refs`] but takes an already-locked connection,
    /// so the write driver (C7) can fold several calls into one SQLite
    /// transaction without re-entering the pool's lock (§4.4).
    pub(crate) fn store_refs_locked(
        &self,
        conn: &Connection,
        target: &NodeId,
        refs: &NodeReferences,
        is_new: bool,
    ) -> BundleResult<()> {
        if refs.is_empty() {
            return self.destroy_refs_locked(conn, target);
        }
        let encoded = encode_refs(refs);
        let cols = key_columns(self.model);
        match key_param(target, self.model) {
            KeyParam::Binary(bytes) => {
                let sql = if is_new {
                    format!("INSERT INTO {} ({cols}, REFS_DATA) VALUES (?1, ?2)", self.table)
                } else {
                    format!(
                        "UPDATE {} SET REFS_DATA = ?2 WHERE {}",
                        self.table,
                        key_where(self.model, 1)
                    )
                };
                conn.prepare_cached(&sql)?.execute(params![bytes.to_vec(), encoded])?;
            }
            KeyParam::Split(hi, lo) => {
                let sql = if is_new {
                    format!("INSERT INTO {} ({cols}, REFS_DATA) VALUES (?1, ?2, ?3)", self.table)
                } else {
                    format!(
                        "UPDATE {} SET REFS_DATA = ?3 WHERE {}",
                        self.table,
                        key_where(self.model, 1)
                    )
                };
                conn.prepare_cached(&sql)?.execute(params![hi, lo, encoded])?;
            }
        }
        Ok(())
    }

    pub(crate) fn exists_refs_locked(&self, conn: &Connection, target: &NodeId) -> BundleResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        let result: Result<i64, rusqlite::Error> = match key_param(target, self.model) {
            KeyParam::Binary(bytes) => conn
                .prepare_cached(&sql)?
                .query_row(params![bytes.to_vec()], |row| row.get(0)),
            KeyParam::Split(hi, lo) => conn
                .prepare_cached(&sql)?
                .query_row(params![hi, lo], |row| row.get(0)),
        };
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn destroy_refs(&self, target: &NodeId) -> BundleResult<()> {
        let conn = self.pool.conn().lock();
        self.destroy_refs_locked(&conn, target)
    }

    pub(crate) fn destroy_refs_locked(&self, conn: &Connection, target: &NodeId) -> BundleResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        match key_param(target, self.model) {
            KeyParam::Binary(bytes) => {
                conn.prepare_cached(&sql)?.execute(params![bytes.to_vec()])?;
            }
            KeyParam::Split(hi, lo) => {
                conn.prepare_cached(&sql)?.execute(params![hi, lo])?;
            }
        }
        Ok(())
    }
}

fn encode_refs(refs: &NodeReferences) -> Vec<u8> {
    let mut out = Vec::new();
    write_uvarint(&mut out, refs.ref_property_ids.len() as u64).expect("write to Vec never fails");
    for prop_id in &refs.ref_property_ids {
        write_uvarint(&mut out, prop_id.len() as u64).expect("write to Vec never fails");
        out.extend_from_slice(prop_id.as_bytes());
    }
    out
}

fn decode_refs(bytes: &[u8]) -> BundleResult<NodeReferences> {
    let mut cur = std::io::Cursor::new(bytes);
    let count = read_uvarint(&mut cur)?;
    let mut set = std::collections::BTreeSet::new();
    for _ in 0..count {
        let len = read_uvarint(&mut cur)?;
        let mut buf = vec![0u8; len as usize];
        std::io::Read::read_exact(&mut cur, &mut buf)
            .map_err(|e| BundleStoreError::DecodingError(format!("truncated refs entry: {e}")))?;
        set.insert(String::from_utf8(buf).map_err(|e| BundleStoreError::DecodingError(e.to_string()))?);
    }
    Ok(NodeReferences {
        ref_property_ids: set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundleStoreConfig;
    use crate::schema::bootstrap;
    use crate::statement_pool::SharedConn;
    use parking_lot::ReentrantMutex;
    use rusqlite::Connection;
    use std::str::FromStr;
    use std::sync::Arc;

    fn setup() -> ReferencesStore {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap(&conn, &BundleStoreConfig::default()).unwrap();
        let shared: SharedConn = Arc::new(ReentrantMutex::new(conn));
        ReferencesStore::new(StatementPool::new(shared), "", StorageModel::BinaryKeys)
    }

    #[test]
    fn store_then_load_round_trips() {
        let store = setup();
        let target = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        let mut refs = NodeReferences::default();
        refs.ref_property_ids.insert("a.b.0".to_string());
        refs.ref_property_ids.insert("a.c.1".to_string());
        store.store_refs(&target, &refs, true).unwrap();
        assert!(store.exists_refs(&target).unwrap());
        let loaded = store.load_refs(&target).unwrap().unwrap();
        assert_eq!(loaded, refs);
    }

    #[test]
    fn storing_empty_set_destroys_row() {
        let store = setup();
        let target = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        let mut refs = NodeReferences::default();
        refs.ref_property_ids.insert("a.b.0".to_string());
        store.store_refs(&target, &refs, true).unwrap();
        store.store_refs(&target, &NodeReferences::default(), false).unwrap();
        assert!(!store.exists_refs(&target).unwrap());
    }
}
