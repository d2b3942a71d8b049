//! Consistency checker (C9, spec §4.6).

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::bundle_store::BundleStore;
use crate::codec;
use crate::error::{BundleResult, BundleStoreError};
use crate::ids::{NodeId, QName};
use crate::statement_pool::SharedConn;

/// One occurrence of "child entry points at a bundle that doesn't exist".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingChild {
    pub owner: NodeId,
    pub child_name: QName,
    pub child_id: NodeId,
}

/// One occurrence of "a loaded child's stored parentId disagrees with the
/// bundle that lists it as a child".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongParent {
    pub child_id: NodeId,
    pub expected_parent: NodeId,
    pub actual_parent: Option<NodeId>,
}

/// One occurrence of "bundle names a non-null parentId whose row is
/// absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingParent {
    pub owner: NodeId,
    pub parent_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub id: NodeId,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub scanned: u64,
    pub missing_children: Vec<MissingChild>,
    pub wrong_parents: Vec<WrongParent>,
    pub missing_parents: Vec<MissingParent>,
    pub decode_failures: Vec<DecodeFailure>,
    pub repaired: Vec<NodeId>,
}

/// Scans every bundle row. When `repair` is set, any bundle with at least
/// one missing child entry is rewritten (via `update`, never `insert`)
/// inside its own transaction immediately after the offending entries are
/// identified — a separate transaction per bundle, never one transaction
/// for the whole scan, so a single repair failure cannot roll back
/// unrelated repairs (§4.6).
///
/// `fail_on_soft_errors` is `errorHandling`'s `'F'` flag (§6/§7): normally a
/// bundle that fails to decode is logged and recorded in
/// `decode_failures`, and the scan moves on; with the flag set, the first
/// such failure aborts the whole scan with `DecodingError` instead.
pub fn check(
    bundles: &Arc<BundleStore>,
    conn: &SharedConn,
    blobs: &dyn BlobStore,
    repair: bool,
    fail_on_soft_errors: bool,
) -> BundleResult<ConsistencyReport> {
    let rows = bundles.scan_all()?;
    let mut report = ConsistencyReport::default();

    for (id, bytes) in &rows {
        report.scanned += 1;
        // The source never populates a precomputed total; progress is
        // reported purely off the running counter.
        if report.scanned % 1000 == 0 {
            tracing::info!(scanned = report.scanned, total = 0, "consistency check progress");
        }

        let mut bundle = match codec::decode(bytes) {
            Ok(mut b) => {
                b.id = *id;
                b
            }
            Err(e) => {
                let offset = codec::failing_offset(bytes);
                if fail_on_soft_errors {
                    return Err(BundleStoreError::DecodingError(format!(
                        "bundle {id} failed to decode at offset {offset}: {e}"
                    )));
                }
                tracing::warn!(id = %id, offset, "bundle failed to decode");
                report.decode_failures.push(DecodeFailure { id: *id, offset });
                continue;
            }
        };

        let mut removed_any = false;
        let mut kept = Vec::with_capacity(bundle.child_entries.len());
        for entry in bundle.child_entries.drain(..) {
            if entry.id.is_sentinel() {
                kept.push(entry);
                continue;
            }
            match bundles.load_bundle(&entry.id)? {
                None => {
                    tracing::warn!(owner = %id, child = %entry.id, "missing child");
                    report.missing_children.push(MissingChild {
                        owner: *id,
                        child_name: entry.name,
                        child_id: entry.id,
                    });
                    if repair {
                        removed_any = true;
                        continue;
                    }
                    kept.push(entry);
                }
                Some(child_bundle) => {
                    if child_bundle.parent_id != Some(*id) {
                        tracing::warn!(
                            child = %entry.id,
                            expected_parent = %id,
                            actual_parent = ?child_bundle.parent_id,
                            "wrong parent"
                        );
                        report.wrong_parents.push(WrongParent {
                            child_id: entry.id,
                            expected_parent: *id,
                            actual_parent: child_bundle.parent_id,
                        });
                    }
                    kept.push(entry);
                }
            }
        }
        bundle.child_entries = kept;

        if let Some(parent_id) = bundle.parent_id {
            if !parent_id.is_sentinel() && !bundles.exists_bundle(&parent_id)? {
                tracing::warn!(owner = %id, parent = %parent_id, "missing parent");
                report.missing_parents.push(MissingParent {
                    owner: *id,
                    parent_id,
                });
            }
        }

        if repair && removed_any {
            bundle.is_new = false;
            let txn = conn.lock();
            txn.execute_batch("BEGIN")?;
            match bundles.store_bundle_locked(&txn, &bundle, blobs) {
                Ok(()) => {
                    txn.execute_batch("COMMIT")?;
                    report.repaired.push(*id);
                }
                Err(e) => {
                    if let Err(rollback_err) = txn.execute_batch("ROLLBACK") {
                        tracing::warn!(error = %rollback_err, "repair rollback itself failed");
                    }
                    tracing::warn!(id = %id, error = %e, "repair failed");
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::DbBlobStore;
    use crate::config::{BundleStoreConfig, StorageModel};
    use crate::model::{ChildEntry, NodePropBundle};
    use crate::schema::bootstrap;
    use crate::statement_pool::StatementPool;
    use parking_lot::ReentrantMutex;
    use rusqlite::Connection;
    use std::str::FromStr;

    fn setup() -> (Arc<BundleStore>, SharedConn, DbBlobStore) {
        let conn = Connection::open_in_memory().unwrap();
        let cfg = BundleStoreConfig::default();
        bootstrap(&conn, &cfg).unwrap();
        let shared: SharedConn = Arc::new(ReentrantMutex::new(conn));
        let pool = StatementPool::new(shared.clone());
        let bundles = Arc::new(BundleStore::new(pool, "", StorageModel::BinaryKeys, cfg.min_blob_size));
        let blobs = DbBlobStore::new(shared.clone(), "");
        (bundles, shared, blobs)
    }

    fn id(n: u8) -> NodeId {
        NodeId::from_str(&format!("00000000-0000-0000-0000-0000000000{n:02x}")).unwrap()
    }

    #[test]
    fn dangling_child_is_flagged_and_repaired() {
        let (bundles, conn, blobs) = setup();
        let mut a = NodePropBundle::new(id(1), None, QName::new(0, 1));
        a.child_entries.push(ChildEntry {
            name: QName::new(0, 5),
            id: id(2),
        });
        bundles.store_bundle(&a, &blobs).unwrap();

        let report = check(&bundles, &conn, &blobs, true, false).unwrap();
        assert_eq!(report.missing_children.len(), 1);
        assert_eq!(report.repaired, vec![id(1)]);

        let reloaded = bundles.load_bundle(&id(1)).unwrap().unwrap();
        assert!(reloaded.child_entries.is_empty());
    }

    #[test]
    fn sentinel_child_is_never_flagged() {
        let (bundles, conn, blobs) = setup();
        let mut sentinel_bytes = [0u8; 16];
        sentinel_bytes[10..16].copy_from_slice(&[0xba, 0xbe, 0xca, 0xfe, 0xba, 0xbe]);
        let mut a = NodePropBundle::new(id(1), None, QName::new(0, 1));
        a.child_entries.push(ChildEntry {
            name: QName::new(0, 5),
            id: NodeId::from_bytes(sentinel_bytes),
        });
        bundles.store_bundle(&a, &blobs).unwrap();

        let report = check(&bundles, &conn, &blobs, true, false).unwrap();
        assert!(report.missing_children.is_empty());
        assert!(report.repaired.is_empty());
    }

    #[test]
    fn wrong_parent_is_flagged_without_repair() {
        let (bundles, conn, blobs) = setup();
        let child = NodePropBundle::new(id(2), None, QName::new(0, 1));
        bundles.store_bundle(&child, &blobs).unwrap();

        let mut parent = NodePropBundle::new(id(1), None, QName::new(0, 1));
        parent.child_entries.push(ChildEntry {
            name: QName::new(0, 5),
            id: id(2),
        });
        bundles.store_bundle(&parent, &blobs).unwrap();

        let report = check(&bundles, &conn, &blobs, false, false).unwrap();
        assert_eq!(report.wrong_parents.len(), 1);
        assert_eq!(report.wrong_parents[0].child_id, id(2));
    }

    #[test]
    fn missing_parent_is_flagged() {
        let (bundles, conn, blobs) = setup();
        let mut orphan = NodePropBundle::new(id(3), Some(id(99)), QName::new(0, 1));
        orphan.is_new = true;
        bundles.store_bundle(&orphan, &blobs).unwrap();

        let report = check(&bundles, &conn, &blobs, false, false).unwrap();
        assert_eq!(report.missing_parents.len(), 1);
        assert_eq!(report.missing_parents[0].owner, id(3));
    }

    #[test]
    fn clean_store_reports_nothing() {
        let (bundles, conn, blobs) = setup();
        let a = NodePropBundle::new(id(1), None, QName::new(0, 1));
        bundles.store_bundle(&a, &blobs).unwrap();

        let report = check(&bundles, &conn, &blobs, true, false).unwrap();
        assert_eq!(report.scanned, 1);
        assert!(report.missing_children.is_empty());
        assert!(report.wrong_parents.is_empty());
        assert!(report.missing_parents.is_empty());
        assert!(report.repaired.is_empty());
    }

    #[test]
    fn fail_on_soft_errors_promotes_decode_failure() {
        let (bundles, conn, blobs) = setup();
        let good = NodePropBundle::new(id(1), None, QName::new(0, 1));
        bundles.store_bundle(&good, &blobs).unwrap();
        {
            let c = conn.lock();
            c.execute(
                "INSERT INTO BUNDLE (NODE_ID, BUNDLE_DATA) VALUES (?1, ?2)",
                rusqlite::params![id(2).as_bytes().to_vec(), vec![0xffu8; 3]],
            )
            .unwrap();
        }

        let lenient = check(&bundles, &conn, &blobs, false, false).unwrap();
        assert_eq!(lenient.decode_failures.len(), 1);

        let err = check(&bundles, &conn, &blobs, false, true).unwrap_err();
        assert!(matches!(err, BundleStoreError::DecodingError(_)));
    }
}
