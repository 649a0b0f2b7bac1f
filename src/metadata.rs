//! File metadata records and the store adapter on top of [`crate::kv`]
//!
//! The path itself is the key; a directory entry is nothing more than the
//! KV entry of the child path, so listing a directory is a prefix scan.
//! Records are serialized with bincode from a struct with a fixed field
//! order, so daemons built with different flags stay interoperable.

use serde::{Deserialize, Serialize};

use crate::config::{MetadataSettings, ST_NBLOCKSIZE};
use crate::error::FsError;
use crate::kv::KvStore;
use crate::util;

/// Serialized metadata record. Field order is part of the wire/disk
/// format - do not reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
	/// File type and permission bits as in `st_mode`
	pub mode: u32,

	/// Logical file size in bytes
	pub size: i64,

	pub link_count: u32,
	pub uid: u32,
	pub gid: u32,

	/// Seconds since the epoch; 0 when the field is disabled globally
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,

	/// Allocated 512-byte blocks
	pub blocks: i64,
}

impl Metadata {
	/// Fresh record for a newly created node. Optional fields are filled
	/// only when enabled by the instance-wide [`MetadataSettings`].
	pub fn new(mode: u32, uid: u32, gid: u32, settings: &MetadataSettings) -> Self {
		let now = util::time_now();
		Metadata {
			mode,
			size: 0,
			link_count: if settings.link_count { 1 } else { 0 },
			uid,
			gid,
			atime: if settings.atime { now } else { 0 },
			mtime: if settings.mtime { now } else { 0 },
			ctime: if settings.ctime { now } else { 0 },
			blocks: 0,
		}
	}

	pub fn is_dir(&self) -> bool {
		self.mode & (libc::S_IFMT as u32) == libc::S_IFDIR as u32
	}

	pub fn is_regular(&self) -> bool {
		self.mode & (libc::S_IFMT as u32) == libc::S_IFREG as u32
	}

	/// Recompute `blocks` from `size`
	pub fn update_blocks(&mut self) {
		self.blocks = ((self.size as u64 + ST_NBLOCKSIZE - 1) / ST_NBLOCKSIZE) as i64;
	}

	pub fn serialize(&self) -> Vec<u8> {
		// fixed field order + bincode fixint encoding is deterministic
		bincode::serialize(self).unwrap_or_default()
	}

	pub fn deserialize(buf: &[u8]) -> Result<Self, FsError> {
		bincode::deserialize(buf)
			.map_err(|e| FsError::io(format!("corrupt metadata record: {}", e)))
	}
}

/// Partial metadata update; `None` fields keep their stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
	pub mode: Option<u32>,
	pub size: Option<i64>,
	pub link_count: Option<u32>,
	pub uid: Option<u32>,
	pub gid: Option<u32>,
	pub atime: Option<i64>,
	pub mtime: Option<i64>,
	pub ctime: Option<i64>,
	pub blocks: Option<i64>,
}

/// One immediate child of a directory, as produced by the prefix scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
	pub name: String,
	pub is_dir: bool,
	pub size: i64,
	pub ctime: i64,
}

/// Store adapter: translates handler operations into KV accesses.
///
/// The adapter holds no locks of its own; atomicity comes from the KV
/// `update_if` primitive.
pub struct MetadataDb {
	kv: Box<dyn KvStore>,
	settings: MetadataSettings,
}

impl MetadataDb {
	/// Wrap a KV backend and materialize the root directory entry
	pub fn new(kv: Box<dyn KvStore>, settings: MetadataSettings) -> Result<Self, FsError> {
		let db = MetadataDb { kv, settings };
		let root = Metadata::new(
			libc::S_IFDIR as u32 | 0o777,
			util::get_effective_uid(),
			util::get_effective_gid(),
			&db.settings,
		);
		db.kv.put_if_absent("/", &root.serialize())?;
		Ok(db)
	}

	pub fn settings(&self) -> &MetadataSettings {
		&self.settings
	}

	/// Create a metadata entry. Directory creation is idempotent;
	/// creating a regular file over any existing key fails with Exists.
	pub fn create(&self, path: &str, md: &Metadata) -> Result<(), FsError> {
		if md.is_dir() {
			let mut clash = false;
			self.kv.update_if(path, &mut |current| match current {
				Some(existing) => {
					match Metadata::deserialize(existing) {
						Ok(cur) if cur.is_dir() => {}
						_ => clash = true,
					}
					None
				}
				None => Some(md.serialize()),
			})?;
			if clash {
				return Err(FsError::Exists);
			}
			return Ok(());
		}
		if !self.kv.put_if_absent(path, &md.serialize())? {
			return Err(FsError::Exists);
		}
		Ok(())
	}

	/// Fetch and decode one record
	pub fn get(&self, path: &str) -> Result<Metadata, FsError> {
		match self.kv.get(path)? {
			Some(buf) => Metadata::deserialize(&buf),
			None => Err(FsError::NotFound),
		}
	}

	/// Fetch the raw serialized record (stat transports the blob as-is)
	pub fn get_raw(&self, path: &str) -> Result<Vec<u8>, FsError> {
		self.kv.get(path)?.ok_or(FsError::NotFound)
	}

	/// Store a raw record; used by metadata migration, which must not
	/// re-encode values owned by a peer
	pub fn put_raw(&self, path: &str, value: &[u8]) -> Result<(), FsError> {
		self.kv.put(path, value)?;
		Ok(())
	}

	/// Remove an entry, returning the previous `(size, mode)` so the
	/// caller can decide whether data chunks need cleanup. Removing a
	/// non-empty directory fails with NotEmpty; removing the root is
	/// invalid.
	pub fn remove(&self, path: &str) -> Result<(i64, u32), FsError> {
		if path == "/" {
			return Err(FsError::invalid("cannot remove the root directory"));
		}
		let md = self.get(path)?;
		if md.is_dir() {
			let prefix = format!("{}/", path);
			if !self.kv.prefix_scan(&prefix)?.is_empty() {
				return Err(FsError::NotEmpty);
			}
		}
		match self.kv.remove(path)? {
			Some(_) => Ok((md.size, md.mode)),
			None => Err(FsError::NotFound),
		}
	}

	/// Apply a partial update to an existing record
	pub fn update(&self, path: &str, changes: &MetadataUpdate) -> Result<(), FsError> {
		let mut missing = false;
		let mut corrupt = false;
		self.kv.update_if(path, &mut |current| match current {
			None => {
				missing = true;
				None
			}
			Some(buf) => {
				let mut md = match Metadata::deserialize(buf) {
					Ok(md) => md,
					Err(_) => {
						corrupt = true;
						return None;
					}
				};
				if let Some(mode) = changes.mode {
					md.mode = mode;
				}
				if let Some(size) = changes.size {
					md.size = size;
				}
				if let Some(link_count) = changes.link_count {
					md.link_count = link_count;
				}
				if let Some(uid) = changes.uid {
					md.uid = uid;
				}
				if let Some(gid) = changes.gid {
					md.gid = gid;
				}
				if let Some(atime) = changes.atime {
					md.atime = atime;
				}
				if let Some(mtime) = changes.mtime {
					md.mtime = mtime;
				}
				if let Some(ctime) = changes.ctime {
					md.ctime = ctime;
				}
				if let Some(blocks) = changes.blocks {
					md.blocks = blocks;
				}
				Some(md.serialize())
			}
		})?;
		if missing {
			return Err(FsError::NotFound);
		}
		if corrupt {
			return Err(FsError::io("corrupt metadata record"));
		}
		Ok(())
	}

	/// Grow the size field after a write and return the offset at which
	/// the caller must place its data.
	///
	/// Append: atomically add `size` to the current size and return the
	/// pre-update size. Otherwise: extend to `max(current, offset + size)`
	/// (a small out-of-order write after a large one must not shrink the
	/// file) and return `offset` unchanged.
	pub fn update_size(
		&self,
		path: &str,
		size: u64,
		offset: u64,
		append: bool,
	) -> Result<u64, FsError> {
		let mut missing = false;
		let mut corrupt = false;
		let mut write_offset = offset;
		let now = util::time_now();
		let settings = self.settings;
		self.kv.update_if(path, &mut |current| match current {
			None => {
				missing = true;
				None
			}
			Some(buf) => {
				let mut md = match Metadata::deserialize(buf) {
					Ok(md) => md,
					Err(_) => {
						corrupt = true;
						return None;
					}
				};
				if append {
					write_offset = md.size as u64;
					md.size += size as i64;
				} else {
					let extent = (offset + size) as i64;
					if extent > md.size {
						md.size = extent;
					}
				}
				if settings.mtime {
					md.mtime = now;
				}
				if settings.blocks {
					md.update_blocks();
				}
				Some(md.serialize())
			}
		})?;
		if missing {
			return Err(FsError::NotFound);
		}
		if corrupt {
			return Err(FsError::io("corrupt metadata record"));
		}
		Ok(write_offset)
	}

	/// Shrink the size field to `length` for truncate; growing is a no-op
	pub fn decrement_size(&self, path: &str, length: u64) -> Result<(), FsError> {
		let mut missing = false;
		let mut corrupt = false;
		let now = util::time_now();
		let settings = self.settings;
		self.kv.update_if(path, &mut |current| match current {
			None => {
				missing = true;
				None
			}
			Some(buf) => {
				let mut md = match Metadata::deserialize(buf) {
					Ok(md) => md,
					Err(_) => {
						corrupt = true;
						return None;
					}
				};
				if (length as i64) >= md.size {
					return None;
				}
				md.size = length as i64;
				if settings.mtime {
					md.mtime = now;
				}
				if settings.blocks {
					md.update_blocks();
				}
				Some(md.serialize())
			}
		})?;
		if missing {
			return Err(FsError::NotFound);
		}
		if corrupt {
			return Err(FsError::io("corrupt metadata record"));
		}
		Ok(())
	}

	/// Size of one entry, for `get_metadentry_size`
	pub fn get_size(&self, path: &str) -> Result<i64, FsError> {
		Ok(self.get(path)?.size)
	}

	/// Immediate children of `path` on this shard, in name order.
	/// Grandchildren (scan hits whose remainder contains a `/`) are
	/// filtered out.
	pub fn iterate_directory(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
		let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
		let mut out = Vec::new();
		for (key, value) in self.kv.prefix_scan(&prefix)? {
			let name = &key[prefix.len()..];
			if name.is_empty() || name.contains('/') {
				continue;
			}
			let md = Metadata::deserialize(&value)?;
			out.push(DirEntry {
				name: name.to_string(),
				is_dir: md.is_dir(),
				size: md.size,
				ctime: md.ctime,
			});
		}
		Ok(out)
	}

	/// Every record in this shard, for metadata redistribution
	pub fn iterate_all(&self) -> Result<Vec<(String, Vec<u8>)>, FsError> {
		Ok(self.kv.prefix_scan("/")?)
	}

	/// Raw removal without directory emptiness checks, for redistribution
	pub fn remove_raw(&self, path: &str) -> Result<(), FsError> {
		self.kv.remove(path).map_err(FsError::from).map(|_| ())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::kv::MemStore;

	fn db() -> MetadataDb {
		MetadataDb::new(Box::new(MemStore::new()), MetadataSettings::default()).unwrap()
	}

	fn file_md(db: &MetadataDb) -> Metadata {
		Metadata::new(libc::S_IFREG as u32 | 0o644, 0, 0, db.settings())
	}

	fn dir_md(db: &MetadataDb) -> Metadata {
		Metadata::new(libc::S_IFDIR as u32 | 0o755, 0, 0, db.settings())
	}

	#[test]
	fn test_root_exists() {
		let db = db();
		let root = db.get("/").unwrap();
		assert!(root.is_dir());
	}

	#[test]
	fn test_disabled_fields_stay_zero() {
		let settings = MetadataSettings {
			atime: false,
			mtime: false,
			ctime: false,
			link_count: false,
			blocks: false,
		};
		let db = MetadataDb::new(Box::new(MemStore::new()), settings).unwrap();
		let md = Metadata::new(libc::S_IFREG as u32 | 0o644, 0, 0, db.settings());
		assert_eq!(md.link_count, 0);
		db.create("/f", &md).unwrap();
		db.update_size("/f", 4096, 0, false).unwrap();
		let md = db.get("/f").unwrap();
		assert_eq!(md.size, 4096);
		assert_eq!(md.mtime, 0);
		assert_eq!(md.blocks, 0);
	}

	#[test]
	fn test_enabled_blocks_track_size() {
		let db = db();
		db.create("/f", &file_md(&db)).unwrap();
		db.update_size("/f", 1025, 0, false).unwrap();
		let md = db.get("/f").unwrap();
		assert_eq!(md.link_count, 1);
		assert_eq!(md.blocks, 3);
	}

	#[test]
	fn test_serialization_round_trip() {
		let md = Metadata {
			mode: libc::S_IFREG as u32 | 0o600,
			size: 42,
			link_count: 1,
			uid: 1000,
			gid: 100,
			atime: 0,
			mtime: 1700000000,
			ctime: 1700000001,
			blocks: 1,
		};
		let back = Metadata::deserialize(&md.serialize()).unwrap();
		assert_eq!(md, back);
	}

	#[test]
	fn test_create_exclusive() {
		let db = db();
		let md = file_md(&db);
		db.create("/f", &md).unwrap();
		assert!(matches!(db.create("/f", &md), Err(FsError::Exists)));
		// directories are idempotent
		let d = dir_md(&db);
		db.create("/d", &d).unwrap();
		db.create("/d", &d).unwrap();
		// but a directory cannot shadow a file
		assert!(matches!(db.create("/f", &d), Err(FsError::Exists)));
	}

	#[test]
	fn test_remove_returns_prior_state() {
		let db = db();
		let mut md = file_md(&db);
		md.size = 77;
		db.create("/f", &md).unwrap();
		let (size, mode) = db.remove("/f").unwrap();
		assert_eq!(size, 77);
		assert_eq!(mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
		assert!(matches!(db.get("/f"), Err(FsError::NotFound)));
	}

	#[test]
	fn test_remove_nonempty_dir() {
		let db = db();
		db.create("/d", &dir_md(&db)).unwrap();
		db.create("/d/child", &file_md(&db)).unwrap();
		assert!(matches!(db.remove("/d"), Err(FsError::NotEmpty)));
		db.remove("/d/child").unwrap();
		db.remove("/d").unwrap();
	}

	#[test]
	fn test_update_size_append() {
		let db = db();
		db.create("/log", &file_md(&db)).unwrap();
		let off = db.update_size("/log", 5, 0, true).unwrap();
		assert_eq!(off, 0);
		let off = db.update_size("/log", 5, 0, true).unwrap();
		assert_eq!(off, 5);
		assert_eq!(db.get_size("/log").unwrap(), 10);
	}

	#[test]
	fn test_update_size_keeps_max_extent() {
		let db = db();
		db.create("/f", &file_md(&db)).unwrap();
		assert_eq!(db.update_size("/f", 1000, 0, false).unwrap(), 0);
		assert_eq!(db.get_size("/f").unwrap(), 1000);
		// a straggler writing a small range must not shrink the file
		assert_eq!(db.update_size("/f", 10, 100, false).unwrap(), 100);
		assert_eq!(db.get_size("/f").unwrap(), 1000);
	}

	#[test]
	fn test_decrement_size() {
		let db = db();
		db.create("/f", &file_md(&db)).unwrap();
		db.update_size("/f", 3_000_000, 0, false).unwrap();
		db.decrement_size("/f", 100).unwrap();
		assert_eq!(db.get_size("/f").unwrap(), 100);
		// growing through decrement is a no-op
		db.decrement_size("/f", 5000).unwrap();
		assert_eq!(db.get_size("/f").unwrap(), 100);
	}

	#[test]
	fn test_iterate_directory_filters_descendants() {
		let db = db();
		db.create("/d", &dir_md(&db)).unwrap();
		db.create("/d/a", &file_md(&db)).unwrap();
		db.create("/d/b", &dir_md(&db)).unwrap();
		db.create("/d/b/deep", &file_md(&db)).unwrap();
		db.create("/dz", &file_md(&db)).unwrap();
		let entries = db.iterate_directory("/d").unwrap();
		let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
		assert_eq!(names, vec!["a", "b"]);
		// root listing does not include the root itself
		let root = db.iterate_directory("/").unwrap();
		let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
		assert_eq!(names, vec!["d", "dz"]);
	}
}

// vim: ts=4
