//! Content-addressed blob store (C3) with two interchangeable backends.

mod db;
mod fs;

pub use db::DbBlobStore;
pub use fs::FsBlobStore;

use std::io::Read;

use crate::error::BundleResult;
use crate::ids::NodeId;

/// `put`/`get`/`remove`/`createId` contract (spec §4.2). Implementations
/// must be safe to call from behind the engine's single coarse lock (§5);
/// they do not need their own internal locking beyond what the backing
/// connection/filesystem requires.
pub trait BlobStore: Send + Sync {
    fn put(&self, id: &str, data: &[u8]) -> BundleResult<()>;

    /// Returns a lazily-consumed reader; callers own it and must drop it
    /// (closing any underlying cursor/file handle) when done.
    fn get(&self, id: &str) -> BundleResult<Box<dyn Read + Send>>;

    fn remove(&self, id: &str) -> BundleResult<bool>;

    /// Deterministic, collision-free id for `(parentNodeId, namespaceIndex,
    /// localNameIndex, valueIndex)` (P4). Sharding by parent id is
    /// intentional (§4.2 rationale).
    fn create_id(&self, parent: &NodeId, ns_idx: u32, name_idx: u32, value_idx: u32) -> String {
        format!("{parent}.{ns_idx}.{name_idx}.{value_idx}")
    }
}

#[cfg(test)]
mod contract_tests {
    use super::*;
    use crate::ids::NodeId;
    use std::str::FromStr;

    pub fn exercise_put_get_remove(store: &dyn BlobStore) {
        let id = "test-blob-1";
        store.put(id, b"hello world").unwrap();
        let mut buf = Vec::new();
        store.get(id).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello world");
        assert!(store.remove(id).unwrap());
        assert!(!store.remove(id).unwrap());
    }

    pub fn exercise_empty_blob(store: &dyn BlobStore) {
        let id = "empty-blob";
        store.put(id, b"").unwrap();
        let mut buf = Vec::new();
        store.get(id).unwrap().read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn create_id_is_injective_over_distinct_tuples() {
        let store = FsStub;
        let p1 = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        let p2 = NodeId::from_str("00000000-0000-0000-0000-000000000002").unwrap();
        let mut ids = std::collections::HashSet::new();
        for parent in [p1, p2] {
            for ns in 0..3u32 {
                for name in 0..3u32 {
                    for value in 0..3u32 {
                        assert!(ids.insert(store.create_id(&parent, ns, name, value)));
                    }
                }
            }
        }
    }

    #[test]
    fn create_id_is_injective_over_arbitrary_tuples() {
        use arbitrary::{Arbitrary, Unstructured};
        use std::collections::HashMap;

        let store = FsStub;
        let mut seen: HashMap<String, (NodeId, u32, u32, u32)> = HashMap::new();
        for seed in 0u32..200 {
            let data: Vec<u8> = (0..64).map(|i| seed.wrapping_mul(2654435761).wrapping_add(i) as u8).collect();
            let mut u = Unstructured::new(&data);
            let parent = match NodeId::arbitrary(&mut u) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let (ns, name, value) = match <(u32, u32, u32)>::arbitrary(&mut u) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let tuple = (parent, ns, name, value);
            let id = store.create_id(&parent, ns, name, value);
            if let Some(prior) = seen.get(&id) {
                assert_eq!(*prior, tuple, "distinct tuples collided on blob id {id}");
            } else {
                seen.insert(id, tuple);
            }
        }
    }

    struct FsStub;
    impl BlobStore for FsStub {
        fn put(&self, _id: &str, _data: &[u8]) -> BundleResult<()> {
            unreachable!()
        }
        fn get(&self, _id: &str) -> BundleResult<Box<dyn Read + Send>> {
            unreachable!()
        }
        fn remove(&self, _id: &str) -> BundleResult<bool> {
            unreachable!()
        }
    }
}
