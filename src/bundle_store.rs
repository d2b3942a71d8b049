//! Bundle store (C5): CRUD over bundles keyed by node id.

use std::sync::Arc;

use rusqlite::{params, Connection};

use crate::blob::BlobStore;
use crate::codec;
use crate::config::StorageModel;
use crate::error::BundleResult;
use crate::ids::NodeId;
use crate::keys::{key_columns, key_param, key_where, KeyParam};
use crate::model::NodePropBundle;
use crate::statement_pool::StatementPool;

pub struct BundleStore {
    pool: StatementPool,
    model: StorageModel,
    table: String,
    min_blob_size: u32,
}

impl BundleStore {
    pub fn new(pool: StatementPool, prefix: &str, model: StorageModel, min_blob_size: u32) -> Self {
        Self {
            pool,
            model,
            table: format!("{prefix}BUNDLE"),
            min_blob_size,
        }
    }

    pub fn exists_bundle(&self, id: &NodeId) -> BundleResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        let found = match key_param(id, self.model) {
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

    /// Pre-buffers the whole payload into memory before decoding, the
    /// same way the source releases the cursor promptly rather than tying
    /// a live stream to it (§4.3 rationale).
    pub fn load_bundle(&self, id: &NodeId) -> BundleResult<Option<NodePropBundle>> {
        let sql = format!(
            "SELECT BUNDLE_DATA FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        let payload: Option<Vec<u8>> = match key_param(id, self.model) {
            KeyParam::Binary(bytes) => {
                self.pool.query_row(&sql, params![bytes.to_vec()], |row| row.get(0))?
            }
            KeyParam::Split(hi, lo) => {
                self.pool.query_row(&sql, params![hi, lo], |row| row.get(0))?
            }
        };
        match payload {
            None => Ok(None),
            Some(bytes) => {
                let mut bundle = codec::decode(&bytes)?;
                bundle.id = *id;
                Ok(Some(bundle))
            }
        }
    }

    /// Encodes `bundle` and writes it with the insert statement if
    /// `bundle.is_new`, the update statement otherwise. The new-vs-existing
    /// flag is supplied by the caller's change log, never inferred by a
    /// read-before-write (§4.3).
    pub fn store_bundle(&self, bundle: &NodePropBundle, blobs: &dyn BlobStore) -> BundleResult<()> {
        let conn = self.pool.conn().lock();
        self.store_bundle_locked(&conn, bundle, blobs)
    }

    /// Same as [`Self::store_bundle`] but takes an already-locked
    /// connection, so the write driver (C7) can fold several calls into
    /// one SQLite transaction without re-entering the pool's lock (§4.4).
    pub(crate) fn store_bundle_locked(
        &self,
        conn: &Connection,
        bundle: &NodePropBundle,
        blobs: &dyn BlobStore,
    ) -> BundleResult<()> {
        let encoded = codec::encode(bundle, self.min_blob_size, blobs)?;
        let cols = key_columns(self.model);
        match key_param(&bundle.id, self.model) {
            KeyParam::Binary(bytes) => {
                let sql = if bundle.is_new {
                    format!(
                        "INSERT INTO {} ({cols}, BUNDLE_DATA) VALUES (?1, ?2)",
                        self.table
                    )
                } else {
                    format!(
                        "UPDATE {} SET BUNDLE_DATA = ?2 WHERE {}",
                        self.table,
                        key_where(self.model, 1)
                    )
                };
                conn.prepare_cached(&sql)?.execute(params![bytes.to_vec(), encoded])?;
            }
            KeyParam::Split(hi, lo) => {
                let sql = if bundle.is_new {
                    format!(
                        "INSERT INTO {} ({cols}, BUNDLE_DATA) VALUES (?1, ?2, ?3)",
                        self.table
                    )
                } else {
                    format!(
                        "UPDATE {} SET BUNDLE_DATA = ?3 WHERE {}",
                        self.table,
                        key_where(self.model, 1)
                    )
                };
                conn.prepare_cached(&sql)?.execute(params![hi, lo, encoded])?;
            }
        }
        Ok(())
    }

    /// Deletes the bundle row and, as a follow-up step in the same
    /// transaction, removes every blob it externalized (§4.3).
    pub fn destroy_bundle(&self, bundle: &NodePropBundle, blobs: &dyn BlobStore) -> BundleResult<()> {
        let conn = self.pool.conn().lock();
        self.destroy_bundle_locked(&conn, bundle, blobs)
    }

    pub(crate) fn destroy_bundle_locked(
        &self,
        conn: &Connection,
        bundle: &NodePropBundle,
        blobs: &dyn BlobStore,
    ) -> BundleResult<()> {
        for blob_id in externalized_blob_ids(bundle) {
            blobs.remove(&blob_id)?;
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.table,
            key_where(self.model, 1)
        );
        match key_param(&bundle.id, self.model) {
            KeyParam::Binary(bytes) => {
                conn.prepare_cached(&sql)?.execute(params![bytes.to_vec()])?;
            }
            KeyParam::Split(hi, lo) => {
                conn.prepare_cached(&sql)?.execute(params![hi, lo])?;
            }
        }
        Ok(())
    }

    /// Used by the consistency checker (C9) to scan every bundle row.
    pub fn scan_all(&self) -> BundleResult<Vec<(NodeId, Vec<u8>)>> {
        let conn = self.pool.conn().lock();
        let select = format!(
            "SELECT {}, BUNDLE_DATA FROM {}",
            key_columns(self.model),
            self.table
        );
        let single_column_key = matches!(self.model, StorageModel::BinaryKeys);
        let mut stmt = conn.prepare(&select)?;
        let rows: Vec<(NodeId, Vec<u8>)> = if single_column_key {
            stmt.query_map([], |row| {
                let bytes: Vec<u8> = row.get(0)?;
                let data: Vec<u8> = row.get(1)?;
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                Ok((NodeId::from_bytes(arr), data))
            })?
            .collect::<Result<_, _>>()?
        } else {
            stmt.query_map([], |row| {
                let hi: i64 = row.get(0)?;
                let lo: i64 = row.get(1)?;
                let data: Vec<u8> = row.get(2)?;
                Ok((NodeId::from_high_low(hi as u64, lo as u64), data))
            })?
            .collect::<Result<_, _>>()?
        };
        Ok(rows)
    }
}

/// Node ids referenced by a bundle's externalized BINARY values.
pub fn externalized_blob_ids(bundle: &NodePropBundle) -> Vec<String> {
    use crate::model::{BinaryValue, Value};
    let mut out = Vec::new();
    for (_, entry) in &bundle.properties {
        for value in &entry.values {
            if let Value::Binary(BinaryValue::External(id)) = value {
                out.push(id.clone());
            }
        }
    }
    out
}

pub type SharedBundleStore = Arc<BundleStore>;
