//! SQLite-backed ordered key-value store
//!
//! Entries live in one table keyed by `(index_id, row, adapter_id, data_id)`,
//! so SQLite's B-tree keeps rows of an index in byte order. Range scans are
//! paged with keyset pagination: each page resumes strictly after the last
//! composite key returned, and nothing past the current page is read.

use crate::index::{ByteArrayId, ByteArrayRange};
use crate::scan::{InputKey, KeyValueStore, ScanEntry, ScanError, ScanIterator, ScanResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PAGE_SIZE: usize = 256;

/// Reference ordered store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open a store under `data_dir`
    pub fn open(data_dir: &Path) -> ScanResult<Self> {
        let path = data_dir.join("gridkey.db");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let store = Self::with_connection(conn, Some(path))?;
        tracing::info!(path = ?store.path, "Opened key-value store");
        Ok(store)
    }

    /// Store that lives only as long as this value
    pub fn open_in_memory() -> ScanResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> ScanResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                index_id TEXT NOT NULL,
                row BLOB NOT NULL,
                adapter_id BLOB NOT NULL,
                data_id BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (index_id, row, adapter_id, data_id)
            ) WITHOUT ROWID",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    fn lock(&self) -> ScanResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| ScanError::Lock(e.to_string()))
    }

    /// Write many entries in one transaction
    pub fn write_batch(&self, index_id: &str, entries: &[(InputKey, Vec<u8>)]) -> ScanResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO entries (index_id, row, adapter_id, data_id, value)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for (key, value) in entries {
                stmt.execute(params![
                    index_id,
                    key.insertion_id.as_bytes(),
                    key.adapter_id.as_bytes(),
                    key.data_id.as_bytes(),
                    value
                ])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    /// Number of entries in an index
    pub fn count(&self, index_id: &str) -> ScanResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE index_id = ?",
            params![index_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Force checkpoint for WAL mode
    pub fn checkpoint(&self) -> ScanResult<()> {
        self.lock()?.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Database file path; None for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl KeyValueStore for SqliteStore {
    fn scan(
        &self,
        index_id: &str,
        range: &ByteArrayRange,
        adapter_ids: &[ByteArrayId],
    ) -> ScanResult<Box<dyn ScanIterator>> {
        Ok(Box::new(SqliteScanIterator {
            conn: Arc::clone(&self.conn),
            index_id: index_id.to_string(),
            cursor: Cursor::Start(range.start().as_bytes().to_vec()),
            stop: range.stop_key(),
            adapter_ids: adapter_ids.to_vec(),
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn write(&self, index_id: &str, key: &InputKey, value: &[u8]) -> ScanResult<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO entries (index_id, row, adapter_id, data_id, value)
             VALUES (?, ?, ?, ?, ?)",
            params![
                index_id,
                key.insertion_id.as_bytes(),
                key.adapter_id.as_bytes(),
                key.data_id.as_bytes(),
                value
            ],
        )?;
        Ok(())
    }

    fn estimate_cardinality(&self, index_id: &str, range: &ByteArrayRange) -> ScanResult<f64> {
        let conn = self.lock()?;
        let start = range.start().as_bytes();
        let count: i64 = match range.stop_key() {
            Some(stop) => conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE index_id = ? AND row >= ? AND row < ?",
                params![index_id, start, stop],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE index_id = ? AND row >= ?",
                params![index_id, start],
                |row| row.get(0),
            )?,
        };
        Ok(count as f64)
    }
}

/// Resume position for the next page
enum Cursor {
    /// First page, starting at this row inclusive
    Start(Vec<u8>),
    /// Strictly after this composite key
    After(Vec<u8>, Vec<u8>, Vec<u8>),
}

struct SqliteScanIterator {
    conn: Arc<Mutex<Connection>>,
    index_id: String,
    cursor: Cursor,
    stop: Option<Vec<u8>>,
    adapter_ids: Vec<ByteArrayId>,
    buffer: VecDeque<ScanEntry>,
    exhausted: bool,
}

impl SqliteScanIterator {
    fn fetch_page(&mut self) -> ScanResult<()> {
        let mut sql = String::from(
            "SELECT row, adapter_id, data_id, value FROM entries WHERE index_id = ?",
        );
        let mut values: Vec<Value> = vec![Value::Text(self.index_id.clone())];

        match &self.cursor {
            Cursor::Start(row) => {
                sql.push_str(" AND row >= ?");
                values.push(Value::Blob(row.clone()));
            }
            Cursor::After(row, adapter, data) => {
                sql.push_str(" AND (row, adapter_id, data_id) > (?, ?, ?)");
                values.push(Value::Blob(row.clone()));
                values.push(Value::Blob(adapter.clone()));
                values.push(Value::Blob(data.clone()));
            }
        }
        if let Some(stop) = &self.stop {
            sql.push_str(" AND row < ?");
            values.push(Value::Blob(stop.clone()));
        }
        if !self.adapter_ids.is_empty() {
            let placeholders = vec!["?"; self.adapter_ids.len()].join(", ");
            sql.push_str(&format!(" AND adapter_id IN ({})", placeholders));
            values.extend(
                self.adapter_ids
                    .iter()
                    .map(|id| Value::Blob(id.as_bytes().to_vec())),
            );
        }
        sql.push_str(" ORDER BY row, adapter_id, data_id LIMIT ?");
        values.push(Value::Integer(PAGE_SIZE as i64));

        let conn = self
            .conn
            .lock()
            .map_err(|e| ScanError::Lock(e.to_string()))?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(ScanEntry {
                key: InputKey::new(
                    ByteArrayId::new(row.get(1)?),
                    ByteArrayId::new(row.get(2)?),
                    ByteArrayId::new(row.get(0)?),
                ),
                value: row.get(3)?,
            })
        })?;
        for entry in rows {
            self.buffer.push_back(entry?);
        }

        if self.buffer.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = self.buffer.back() {
            self.cursor = Cursor::After(
                last.key.insertion_id.as_bytes().to_vec(),
                last.key.adapter_id.as_bytes().to_vec(),
                last.key.data_id.as_bytes().to_vec(),
            );
        }
        Ok(())
    }
}

impl Iterator for SqliteScanIterator {
    type Item = ScanResult<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl ScanIterator for SqliteScanIterator {
    fn close(&mut self) -> ScanResult<()> {
        self.buffer.clear();
        self.exhausted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(row: &[u8], adapter: &str, data: &str) -> InputKey {
        InputKey::new(
            ByteArrayId::from(adapter.as_bytes()),
            ByteArrayId::from(data.as_bytes()),
            ByteArrayId::from(row),
        )
    }

    fn rows(iter: Box<dyn ScanIterator>) -> Vec<Vec<u8>> {
        iter.map(|e| e.unwrap().key.insertion_id.into_bytes()).collect()
    }

    #[test]
    fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        assert_eq!(store.count("idx").unwrap(), 0);
        assert!(store.path().unwrap().ends_with("gridkey.db"));
    }

    #[test]
    fn test_scan_is_inclusive_of_end_prefix() {
        let store = SqliteStore::open_in_memory().unwrap();
        let written: [&[u8]; 5] = [&[0x01], &[0x02], &[0x02, 0xFF], &[0x03], &[0x03, 0x00]];
        for row in written {
            store.write("idx", &key(row, "a", "d"), b"v").unwrap();
        }

        let range = ByteArrayRange::new(vec![0x02].into(), vec![0x03].into());
        let scanned = rows(store.scan("idx", &range, &[]).unwrap());
        assert_eq!(
            scanned,
            vec![vec![0x02], vec![0x02, 0xFF], vec![0x03], vec![0x03, 0x00]]
        );
        assert_eq!(store.estimate_cardinality("idx", &range).unwrap(), 4.0);
    }

    #[test]
    fn test_scan_filters_by_adapter_and_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write("idx", &key(&[1], "roads", "r1"), b"r").unwrap();
        store.write("idx", &key(&[1], "rivers", "v1"), b"v").unwrap();
        store.write("other", &key(&[1], "roads", "r2"), b"r").unwrap();

        let range = ByteArrayRange::prefix(vec![1].into());
        let roads = ByteArrayId::from(b"roads".as_slice());
        let entries: Vec<ScanEntry> = store
            .scan("idx", &range, &[roads])
            .unwrap()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.data_id.as_bytes(), b"r1");
        assert_eq!(entries[0].value, b"r");
    }

    #[test]
    fn test_scan_pages_through_large_ranges() {
        let store = SqliteStore::open_in_memory().unwrap();
        let batch: Vec<(InputKey, Vec<u8>)> = (0..1000u32)
            .map(|i| (key(&i.to_be_bytes(), "a", &i.to_string()), vec![0u8]))
            .collect();
        store.write_batch("idx", &batch).unwrap();

        let range = ByteArrayRange::new(vec![0, 0, 0, 100].into(), vec![0, 0, 3, 231].into());
        let scanned = rows(store.scan("idx", &range, &[]).unwrap());

        // 100 ..= 999
        assert_eq!(scanned.len(), 900);
        assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unbounded_range_scans_to_end() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write("idx", &key(&[0xFF, 0xFF, 0x01], "a", "d"), b"v").unwrap();

        let range = ByteArrayRange::new(vec![0xF0].into(), vec![0xFF].into());
        assert_eq!(rows(store.scan("idx", &range, &[]).unwrap()).len(), 1);
        assert_eq!(store.estimate_cardinality("idx", &range).unwrap(), 1.0);
    }

    #[test]
    fn test_closed_iterator_yields_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write("idx", &key(&[1], "a", "d"), b"v").unwrap();

        let mut iter = store
            .scan("idx", &ByteArrayRange::prefix(vec![1].into()), &[])
            .unwrap();
        iter.close().unwrap();
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            store.write("idx", &key(&[7], "a", "d"), b"v").unwrap();
        }
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            assert_eq!(store.count("idx").unwrap(), 1);
        }
    }
}
