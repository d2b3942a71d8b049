//! Lifecycle manager (C10, spec §4.6/§6): open/close discipline binding
//! together the connection, the schema, the name index, the blob backend,
//! and the two CRUD stores behind the single write driver.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::Connection;

use crate::blob::{BlobStore, DbBlobStore, FsBlobStore};
use crate::bundle_store::BundleStore;
use crate::config::BundleStoreConfig;
use crate::consistency::{self, ConsistencyReport};
use crate::error::{BundleResult, BundleStoreError};
use crate::ids::NodeId;
use crate::model::{ChangeLog, NodePropBundle, NodeReferences};
use crate::name_index::NameIndex;
use crate::refs_store::ReferencesStore;
use crate::schema::{self, bootstrap};
use crate::statement_pool::{SharedConn, StatementPool};
use crate::writer::WriteDriver;

/// The store's single entry point. Construction opens (and if needed
/// bootstraps) the backing connection; `close` is idempotent and every
/// other method fails with `NotInitialized` once it has been called.
pub struct Engine {
    conn: SharedConn,
    bundles: Arc<BundleStore>,
    refs: Arc<ReferencesStore>,
    writer: WriteDriver,
    blobs: Arc<dyn BlobStore>,
    names: NameIndex,
    fail_on_soft_errors: bool,
    closed: Mutex<bool>,
}

impl Engine {
    pub fn open(config: BundleStoreConfig) -> BundleResult<Self> {
        let conn = Connection::open(&config.url)
            .map_err(|e| BundleStoreError::ConnectionError(e.to_string()))?;
        bootstrap(&conn, &config)?;

        let prefix = schema::sanitize_prefix(&config.schema_object_prefix);
        let names = NameIndex::load(&conn, &prefix)?;

        let shared: SharedConn = Arc::new(ReentrantMutex::new(conn));
        let pool = StatementPool::new(shared.clone());
        let bundles = Arc::new(BundleStore::new(
            pool.clone(),
            &prefix,
            config.storage_model,
            config.min_blob_size,
        ));
        let refs = Arc::new(ReferencesStore::new(pool, &prefix, config.storage_model));

        let blobs: Arc<dyn BlobStore> = if config.external_blobs {
            let root = config
                .blob_fs_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("./blobs"));
            Arc::new(FsBlobStore::new(root)?)
        } else {
            Arc::new(DbBlobStore::new(shared.clone(), &prefix))
        };

        let writer = WriteDriver::new(shared.clone(), bundles.clone(), refs.clone(), blobs.clone());
        let fail_on_soft_errors = config.fail_on_soft_errors();

        let engine = Self {
            conn: shared,
            bundles,
            refs,
            writer,
            blobs,
            names,
            fail_on_soft_errors,
            closed: Mutex::new(false),
        };

        if config.consistency_check {
            let report = engine.check_consistency(config.consistency_fix)?;
            tracing::info!(
                scanned = report.scanned,
                missing_children = report.missing_children.len(),
                wrong_parents = report.wrong_parents.len(),
                missing_parents = report.missing_parents.len(),
                decode_failures = report.decode_failures.len(),
                repaired = report.repaired.len(),
                "startup consistency check complete"
            );
        }

        Ok(engine)
    }

    fn ensure_open(&self) -> BundleResult<()> {
        if *self.closed.lock() {
            return Err(BundleStoreError::NotInitialized);
        }
        Ok(())
    }

    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    pub fn exists_bundle(&self, id: &NodeId) -> BundleResult<bool> {
        self.ensure_open()?;
        self.bundles.exists_bundle(id)
    }

    pub fn load_bundle(&self, id: &NodeId) -> BundleResult<Option<NodePropBundle>> {
        self.ensure_open()?;
        self.bundles.load_bundle(id)
    }

    pub fn load_refs(&self, target: &NodeId) -> BundleResult<Option<NodeReferences>> {
        self.ensure_open()?;
        self.refs.load_refs(target)
    }

    pub fn exists_refs(&self, target: &NodeId) -> BundleResult<bool> {
        self.ensure_open()?;
        self.refs.exists_refs(target)
    }

    /// Applies a batch of mutations atomically via the write driver (C7).
    pub fn store(&self, change_log: &ChangeLog) -> BundleResult<()> {
        self.ensure_open()?;
        self.writer.store(change_log)
    }

    pub fn check_consistency(&self, repair: bool) -> BundleResult<ConsistencyReport> {
        self.ensure_open()?;
        consistency::check(
            &self.bundles,
            &self.conn,
            self.blobs.as_ref(),
            repair,
            self.fail_on_soft_errors,
        )
    }

    /// Idempotent; safe to call more than once, including implicitly via
    /// `Drop`.
    pub fn close(&self) -> BundleResult<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageModel;
    use crate::ids::QName;
    use std::str::FromStr;

    #[test]
    fn open_bootstraps_an_in_memory_store() {
        let engine = Engine::open(BundleStoreConfig::default()).unwrap();
        let id = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert!(!engine.exists_bundle(&id).unwrap());
    }

    #[test]
    fn store_then_load_through_the_engine() {
        let engine = Engine::open(BundleStoreConfig::default()).unwrap();
        let id = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        let bundle = NodePropBundle::new(id, None, QName::new(0, 1));
        let mut log = ChangeLog::default();
        log.added.push(bundle.clone());
        engine.store(&log).unwrap();

        assert!(engine.exists_bundle(&id).unwrap());
        let loaded = engine.load_bundle(&id).unwrap().unwrap();
        assert_eq!(loaded.node_type_name, bundle.node_type_name);
    }

    #[test]
    fn operations_after_close_fail() {
        let engine = Engine::open(BundleStoreConfig::default()).unwrap();
        engine.close().unwrap();
        engine.close().unwrap(); // idempotent
        let id = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert!(matches!(
            engine.exists_bundle(&id).unwrap_err(),
            BundleStoreError::NotInitialized
        ));
    }

    #[test]
    fn split_long_model_round_trips_through_the_engine() {
        let mut cfg = BundleStoreConfig::default();
        cfg.storage_model = StorageModel::SplitLong;
        let engine = Engine::open(cfg).unwrap();
        let id = NodeId::from_high_low(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        let bundle = NodePropBundle::new(id, None, QName::new(0, 1));
        let mut log = ChangeLog::default();
        log.added.push(bundle);
        engine.store(&log).unwrap();
        assert!(engine.load_bundle(&id).unwrap().is_some());
    }
}
