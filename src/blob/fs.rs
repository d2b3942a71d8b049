use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::blob::BlobStore;
use crate::error::{BundleResult, BundleStoreError};

/// Filesystem-resident blob backend: a directory tree rooted at
/// `<workspace>/blobs`, fanned out two levels deep by a hash of the blob
/// id so no directory accumulates more entries than the id space
/// warrants. The fan-out depth is an implementation detail (§4.2) but,
/// once chosen, is stable for the lifetime of a workspace.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> BundleResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let digest = hasher.finish();
        let fan_a = format!("{:02x}", (digest & 0xff) as u8);
        let fan_b = format!("{:02x}", ((digest >> 8) & 0xff) as u8);
        let filename = escape_filename(id);
        self.root.join(fan_a).join(fan_b).join(filename)
    }
}

/// Blob ids are built from node ids and small integers (§4.2) and are
/// ASCII, but we still escape path separators defensively rather than
/// trust that invariant at the filesystem boundary.
fn escape_filename(id: &str) -> String {
    id.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}

impl BlobStore for FsBlobStore {
    fn put(&self, id: &str, data: &[u8]) -> BundleResult<()> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn get(&self, id: &str) -> BundleResult<Box<dyn Read + Send>> {
        let path = self.path_for(id);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BundleStoreError::NoSuchItem(format!("blob {id}"))
            } else {
                BundleStoreError::BlobError(e.to_string())
            }
        })?;
        Ok(Box::new(file))
    }

    fn remove(&self, id: &str) -> BundleResult<bool> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::contract_tests;

    fn store() -> FsBlobStore {
        let dir = tempfile::tempdir().unwrap();
        // Leak the tempdir for the duration of the test process; fine for
        // short-lived unit tests, avoids threading a guard through.
        let path = dir.into_path();
        FsBlobStore::new(path).unwrap()
    }

    #[test]
    fn put_get_remove() {
        contract_tests::exercise_put_get_remove(&store());
    }

    #[test]
    fn empty_blob_round_trips() {
        contract_tests::exercise_empty_blob(&store());
    }

    #[test]
    fn get_missing_is_no_such_item() {
        let s = store();
        let err = s.get("nope").unwrap_err();
        assert!(matches!(err, BundleStoreError::NoSuchItem(_)));
    }

    #[test]
    fn fanout_creates_nested_directories() {
        let s = store();
        s.put("00000000-0000-0000-0000-000000000001.0.5.0", b"data").unwrap();
        let path = s.path_for("00000000-0000-0000-0000-000000000001.0.5.0");
        assert!(path.starts_with(&s.root));
        assert_eq!(path.components().count() - s.root.components().count(), 3);
    }
}
