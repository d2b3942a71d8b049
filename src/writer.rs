//! Transactional write driver (C7, spec §4.4).
//!
//! `store` is the only path by which bundle and reference-set rows are
//! ever written; the bundle/refs stores' own `store_*`/`destroy_*` methods
//! are public for direct single-row use (tests, ad-hoc repair in C9) but a
//! multi-row change log must go through here so the whole batch commits or
//! rolls back as one unit.

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::bundle_store::BundleStore;
use crate::error::BundleResult;
use crate::model::ChangeLog;
use crate::refs_store::ReferencesStore;
use crate::statement_pool::SharedConn;

pub struct WriteDriver {
    conn: SharedConn,
    bundles: Arc<BundleStore>,
    refs: Arc<ReferencesStore>,
    blobs: Arc<dyn BlobStore>,
}

impl WriteDriver {
    pub fn new(
        conn: SharedConn,
        bundles: Arc<BundleStore>,
        refs: Arc<ReferencesStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            conn,
            bundles,
            refs,
            blobs,
        }
    }

    /// Applies `change_log` atomically: autocommit is disabled for the
    /// duration, the four kinds of mutation are applied in the fixed order
    /// deletions-before-upserts / bundles-before-refs, and any failure rolls
    /// the whole batch back rather than leaving a partial write (§4.4).
    /// A no-op change log still takes the lock but skips the transaction
    /// wrapper entirely.
    pub fn store(&self, change_log: &ChangeLog) -> BundleResult<()> {
        if change_log.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock();
        conn.execute_batch("BEGIN")?;

        let applied = self.apply(&conn, change_log);
        match applied {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                tracing::debug!(
                    removed = change_log.removed.len(),
                    upserted = change_log.added.len() + change_log.modified.len(),
                    refs = change_log.modified_refs.len() + change_log.removed_refs.len(),
                    "change log committed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %rollback_err, "rollback itself failed");
                }
                tracing::warn!(error = %e, "change log rolled back");
                Err(e)
            }
        }
    }

    fn apply(&self, conn: &rusqlite::Connection, change_log: &ChangeLog) -> BundleResult<()> {
        for bundle in &change_log.removed {
            self.bundles.destroy_bundle_locked(conn, bundle, self.blobs.as_ref())?;
        }
        for target in &change_log.removed_refs {
            self.refs.destroy_refs_locked(conn, target)?;
        }
        for bundle in change_log.added.iter().chain(change_log.modified.iter()) {
            self.bundles.store_bundle_locked(conn, bundle, self.blobs.as_ref())?;
        }
        for (target, refs) in &change_log.modified_refs {
            let is_new = !self.refs.exists_refs_locked(conn, target)?;
            self.refs.store_refs_locked(conn, target, refs, is_new)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::DbBlobStore;
    use crate::config::{BundleStoreConfig, StorageModel};
    use crate::ids::QName;
    use crate::model::{NodeReferences, PropertyEntry, PropertyType, Value};
    use crate::schema::bootstrap;
    use crate::statement_pool::StatementPool;
    use parking_lot::ReentrantMutex;
    use rusqlite::Connection;
    use std::str::FromStr;

    use crate::ids::NodeId;

    fn setup() -> (WriteDriver, Arc<BundleStore>, Arc<ReferencesStore>) {
        let conn = Connection::open_in_memory().unwrap();
        let cfg = BundleStoreConfig::default();
        bootstrap(&conn, &cfg).unwrap();
        let shared: SharedConn = Arc::new(ReentrantMutex::new(conn));
        let pool = StatementPool::new(shared.clone());
        let bundles = Arc::new(BundleStore::new(pool.clone(), "", StorageModel::BinaryKeys, cfg.min_blob_size));
        let refs = Arc::new(ReferencesStore::new(pool, "", StorageModel::BinaryKeys));
        let blobs: Arc<dyn BlobStore> = Arc::new(DbBlobStore::new(shared.clone(), ""));
        let driver = WriteDriver::new(shared, bundles.clone(), refs.clone(), blobs);
        (driver, bundles, refs)
    }

    fn sample(id: &str) -> crate::model::NodePropBundle {
        crate::model::NodePropBundle::new(NodeId::from_str(id).unwrap(), None, QName::new(0, 1))
    }

    #[test]
    fn empty_change_log_is_a_no_op() {
        let (driver, _, _) = setup();
        driver.store(&ChangeLog::default()).unwrap();
    }

    #[test]
    fn added_bundle_and_refs_commit_together() {
        let (driver, bundles, refs) = setup();
        let bundle = sample("00000000-0000-0000-0000-000000000001");
        let mut log = ChangeLog::default();
        log.added.push(bundle.clone());
        let mut nr = NodeReferences::default();
        nr.ref_property_ids.insert("a.b.0".into());
        log.modified_refs.push((bundle.id, nr.clone()));

        driver.store(&log).unwrap();

        assert!(bundles.exists_bundle(&bundle.id).unwrap());
        assert_eq!(refs.load_refs(&bundle.id).unwrap().unwrap(), nr);
    }

    #[test]
    fn failure_rolls_back_the_whole_batch() {
        let (driver, bundles, _refs) = setup();
        let mut broken = sample("00000000-0000-0000-0000-000000000002");
        broken.set_property(
            QName::new(0, 2),
            PropertyEntry::single(PropertyType::String, Value::String("ok".into())),
        );
        // is_new stays true for both, but an INSERT against an id that
        // already exists will collide on the primary key, forcing rollback.
        let mut log = ChangeLog::default();
        log.added.push(broken.clone());
        driver.store(&log).unwrap();

        let mut second = ChangeLog::default();
        let mut duplicate = broken.clone();
        duplicate.is_new = true;
        second.added.push(duplicate);
        let good = sample("00000000-0000-0000-0000-000000000003");
        second.added.push(good.clone());

        assert!(driver.store(&second).is_err());
        assert!(!bundles.exists_bundle(&good.id).unwrap());
    }

    #[test]
    fn removing_a_bundle_also_removes_its_externalized_blobs() {
        let (driver, bundles, _refs) = setup();
        let mut bundle = sample("00000000-0000-0000-0000-000000000004");
        bundle.set_property(
            QName::new(0, 9),
            PropertyEntry::single(
                PropertyType::Binary,
                Value::Binary(crate::model::BinaryValue::Inline(vec![0xAB; 8192])),
            ),
        );
        let mut add = ChangeLog::default();
        add.added.push(bundle.clone());
        driver.store(&add).unwrap();

        let loaded = bundles.load_bundle(&bundle.id).unwrap().unwrap();
        let mut remove = ChangeLog::default();
        remove.removed.push(loaded);
        driver.store(&remove).unwrap();

        assert!(!bundles.exists_bundle(&bundle.id).unwrap());
    }
}
