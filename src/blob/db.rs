use std::io::Read;

use rusqlite::{params, OptionalExtension};

use crate::blob::BlobStore;
use crate::error::{BundleResult, BundleStoreError};
use crate::statement_pool::SharedConn;

const CHUNK_SIZE: usize = 64 * 1024;

/// Database-resident blob backend: one `BINVAL(BINVAL_ID, BINVAL_DATA)`
/// table, read back via chunked `substr` queries so `get` never buffers a
/// whole blob into memory (§4.2).
///
/// Shares the engine's single connection/lock (`SharedConn`) rather than
/// opening a second connection, so its lock is the same
/// [`parking_lot::ReentrantMutex`] that the bundle/refs stores hold while
/// encoding or deleting a bundle — reentrant locking is what makes that
/// safe instead of self-deadlocking (see `statement_pool`).
pub struct DbBlobStore {
    conn: SharedConn,
    table: String,
}

impl DbBlobStore {
    pub fn new(conn: SharedConn, prefix: &str) -> Self {
        Self {
            conn,
            table: format!("{prefix}BINVAL"),
        }
    }
}

impl BlobStore for DbBlobStore {
    fn put(&self, id: &str, data: &[u8]) -> BundleResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {} (BINVAL_ID, BINVAL_DATA) VALUES (?1, ?2) \
                 ON CONFLICT(BINVAL_ID) DO UPDATE SET BINVAL_DATA = excluded.BINVAL_DATA",
                self.table
            ),
            params![id, data],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> BundleResult<Box<dyn Read + Send>> {
        let conn = self.conn.lock();
        let len: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT length(BINVAL_DATA) FROM {} WHERE BINVAL_ID = ?1",
                    self.table
                ),
                params![id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        let exists = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE BINVAL_ID = ?1", self.table),
                params![id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(BundleStoreError::NoSuchItem(format!("blob {id}")));
        }
        Ok(Box::new(DbBlobReader {
            conn: self.conn.clone(),
            table: self.table.clone(),
            id: id.to_string(),
            // A zero-length blob materialized as NULL is transparently
            // treated as an empty stream (§4.2).
            total_len: len.unwrap_or(0) as u64,
            offset: 0,
        }))
    }

    fn remove(&self, id: &str) -> BundleResult<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            &format!("DELETE FROM {} WHERE BINVAL_ID = ?1", self.table),
            params![id],
        )?;
        Ok(affected > 0)
    }
}

struct DbBlobReader {
    conn: SharedConn,
    table: String,
    id: String,
    total_len: u64,
    offset: u64,
}

impl Read for DbBlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.offset >= self.total_len || buf.is_empty() {
            return Ok(0);
        }
        let remaining = (self.total_len - self.offset) as usize;
        let want = buf.len().min(remaining).min(CHUNK_SIZE);
        let conn = self.conn.lock();
        let chunk: Vec<u8> = conn
            .query_row(
                &format!(
                    "SELECT substr(BINVAL_DATA, ?1, ?2) FROM {} WHERE BINVAL_ID = ?3",
                    self.table
                ),
                params![self.offset as i64 + 1, want as i64, self.id],
                |row| row.get(0),
            )
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        self.offset += chunk.len() as u64;
        Ok(chunk.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::contract_tests;
    use crate::config::BundleStoreConfig;
    use crate::schema::bootstrap;
    use parking_lot::ReentrantMutex;
    use rusqlite::Connection;
    use std::sync::Arc;

    fn store() -> DbBlobStore {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap(&conn, &BundleStoreConfig::default()).unwrap();
        DbBlobStore::new(Arc::new(ReentrantMutex::new(conn)), "")
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
    fn large_blob_streams_in_chunks() {
        let s = store();
        let data = vec![0xAAu8; CHUNK_SIZE * 3 + 17];
        s.put("big", &data).unwrap();
        let mut buf = Vec::new();
        s.get("big").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, data);
    }
}
