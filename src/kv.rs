//! Embedded key-value store behind the metadata adapter
//!
//! The metadata layer only depends on this narrow contract: `put`,
//! `put_if_absent`, `get`, `remove`, `prefix_scan` and the atomic
//! `update_if`. Two backends implement it: redb for real deployments and
//! an in-memory map for tests and throwaway instances
//! (`--dbbackend memory`).

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use crate::error::KvError;

/// Table holding one serialized metadata record per path
const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Abstract store contract consumed by [`crate::metadata::MetadataDb`]
pub trait KvStore: Send + Sync {
	/// Insert or overwrite
	fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

	/// Insert only if absent; Ok(false) when the key was already present
	fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError>;

	fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

	/// Remove the key, returning the previous value if any
	fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

	/// All `(key, value)` pairs whose key starts with `prefix`, in key order
	fn prefix_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError>;

	/// Atomic read-modify-write. `f` receives the current value and
	/// returns the replacement (`None` keeps the stored value untouched).
	/// Returns the value that was current before the update. The closure
	/// may run under a store-wide write lock, so it must not block.
	fn update_if(
		&self,
		key: &str,
		f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
	) -> Result<Option<Vec<u8>>, KvError>;
}

/// redb-backed store, one database file per daemon shard
pub struct RedbStore {
	db: redb::Database,
}

impl RedbStore {
	/// Open or create the database at `db_path`
	pub fn open(db_path: &Path) -> Result<Self, KvError> {
		let db = redb::Database::create(db_path)
			.map_err(|e| KvError::OpenFailed { message: e.to_string() })?;
		// Ensure the table exists
		{
			let write_txn = db.begin_write().map_err(KvError::backend)?;
			let _ = write_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
			write_txn.commit().map_err(KvError::backend)?;
		}
		Ok(RedbStore { db })
	}
}

impl KvStore for RedbStore {
	fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
		let write_txn = self.db.begin_write().map_err(KvError::backend)?;
		{
			let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
			table.insert(key, value).map_err(KvError::backend)?;
		}
		write_txn.commit().map_err(KvError::backend)?;
		Ok(())
	}

	fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError> {
		let write_txn = self.db.begin_write().map_err(KvError::backend)?;
		let inserted;
		{
			let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
			let present = table.get(key).map_err(KvError::backend)?.is_some();
			if present {
				inserted = false;
			} else {
				table.insert(key, value).map_err(KvError::backend)?;
				inserted = true;
			}
		}
		write_txn.commit().map_err(KvError::backend)?;
		Ok(inserted)
	}

	fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
		let read_txn = self.db.begin_read().map_err(KvError::backend)?;
		let table = read_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
		match table.get(key).map_err(KvError::backend)? {
			Some(entry) => Ok(Some(entry.value().to_vec())),
			None => Ok(None),
		}
	}

	fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
		let write_txn = self.db.begin_write().map_err(KvError::backend)?;
		let previous;
		{
			let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
			previous = table
				.remove(key)
				.map_err(KvError::backend)?
				.map(|guard| guard.value().to_vec());
		}
		write_txn.commit().map_err(KvError::backend)?;
		Ok(previous)
	}

	fn prefix_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
		let read_txn = self.db.begin_read().map_err(KvError::backend)?;
		let table = read_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
		let mut out = Vec::new();
		let mut iter = table.range(prefix..).map_err(KvError::backend)?;
		loop {
			match iter.next() {
				Some(Ok((key, value))) => {
					let key = key.value().to_string();
					if !key.starts_with(prefix) {
						break;
					}
					out.push((key, value.value().to_vec()));
				}
				Some(Err(e)) => return Err(KvError::backend(e)),
				None => break,
			}
		}
		Ok(out)
	}

	fn update_if(
		&self,
		key: &str,
		f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
	) -> Result<Option<Vec<u8>>, KvError> {
		// redb serializes write transactions, which makes the
		// read-modify-write linearizable per database
		let write_txn = self.db.begin_write().map_err(KvError::backend)?;
		let previous;
		{
			let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(KvError::backend)?;
			previous = match table.get(key).map_err(KvError::backend)? {
				Some(entry) => Some(entry.value().to_vec()),
				None => None,
			};
			if let Some(next) = f(previous.as_deref()) {
				table.insert(key, next.as_slice()).map_err(KvError::backend)?;
			}
		}
		write_txn.commit().map_err(KvError::backend)?;
		Ok(previous)
	}
}

/// In-memory store used by tests and `--dbbackend memory`
#[derive(Default)]
pub struct MemStore {
	entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
	pub fn new() -> Self {
		MemStore::default()
	}
}

impl KvStore for MemStore {
	fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
		let mut entries = self.entries.write().map_err(|_| KvError::backend("lock poisoned"))?;
		entries.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError> {
		let mut entries = self.entries.write().map_err(|_| KvError::backend("lock poisoned"))?;
		if entries.contains_key(key) {
			return Ok(false);
		}
		entries.insert(key.to_string(), value.to_vec());
		Ok(true)
	}

	fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
		let entries = self.entries.read().map_err(|_| KvError::backend("lock poisoned"))?;
		Ok(entries.get(key).cloned())
	}

	fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
		let mut entries = self.entries.write().map_err(|_| KvError::backend("lock poisoned"))?;
		Ok(entries.remove(key))
	}

	fn prefix_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
		let entries = self.entries.read().map_err(|_| KvError::backend("lock poisoned"))?;
		Ok(entries
			.range(prefix.to_string()..)
			.take_while(|(k, _)| k.starts_with(prefix))
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect())
	}

	fn update_if(
		&self,
		key: &str,
		f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
	) -> Result<Option<Vec<u8>>, KvError> {
		let mut entries = self.entries.write().map_err(|_| KvError::backend("lock poisoned"))?;
		let previous = entries.get(key).cloned();
		if let Some(next) = f(previous.as_deref()) {
			entries.insert(key.to_string(), next);
		}
		Ok(previous)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn exercise(store: &dyn KvStore) {
		assert!(store.put_if_absent("/a", b"1").unwrap());
		assert!(!store.put_if_absent("/a", b"2").unwrap());
		assert_eq!(store.get("/a").unwrap().unwrap(), b"1");

		store.put("/a/b", b"3").unwrap();
		store.put("/a/c", b"4").unwrap();
		store.put("/ab", b"5").unwrap();

		let scan = store.prefix_scan("/a/").unwrap();
		let keys: Vec<&str> = scan.iter().map(|(k, _)| k.as_str()).collect();
		assert_eq!(keys, vec!["/a/b", "/a/c"]);

		let prev = store
			.update_if("/a", &mut |cur| {
				assert_eq!(cur.unwrap(), b"1");
				Some(b"9".to_vec())
			})
			.unwrap();
		assert_eq!(prev.unwrap(), b"1");
		assert_eq!(store.get("/a").unwrap().unwrap(), b"9");

		// closure returning None leaves the value untouched
		store.update_if("/a", &mut |_| None).unwrap();
		assert_eq!(store.get("/a").unwrap().unwrap(), b"9");

		assert_eq!(store.remove("/ab").unwrap().unwrap(), b"5");
		assert!(store.remove("/ab").unwrap().is_none());
	}

	#[test]
	fn test_mem_store() {
		exercise(&MemStore::new());
	}

	#[test]
	fn test_redb_store() {
		let dir = tempfile::tempdir().unwrap();
		let store = RedbStore::open(&dir.path().join("meta.redb")).unwrap();
		exercise(&store);
	}
}

// vim: ts=4
