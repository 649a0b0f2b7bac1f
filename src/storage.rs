//! Node-local chunk storage
//!
//! On-disk layout: `<rootdir>/chunks/<escaped-path>/<chunk_id>`, where the
//! escaping replaces `/` with `:` so all chunks of one file share a single
//! flat directory. A chunk file exists only if at least one byte of the
//! chunk was written; its physical length equals its logical length.

use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::arithmetic::{block_index, block_overrun};
use crate::error::FsError;
use crate::logging::*;
use crate::util::hash64;

/// Lock shards serializing concurrent writers of the same chunk
const LOCK_SHARDS: usize = 256;

/// Backing store utilization as reported by `chunk_stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStat {
	pub chunk_size: u64,
	pub chunk_total: u64,
	pub chunk_free: u64,
}

/// Lazily discovered chunk file, yielded during redistribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
	/// Mount-relative file path reconstructed from the directory name
	pub path: String,
	pub chunk_id: u64,
	/// Physical length on disk
	pub size: u64,
}

pub struct ChunkStorage {
	chunks_dir: PathBuf,
	chunk_size: u64,
	locks: Vec<Mutex<()>>,
}

/// `/foo/bar` -> `foo:bar`
fn escape_path(path: &str) -> String {
	path.trim_start_matches('/').replace('/', ":")
}

/// `foo:bar` -> `/foo/bar`
fn unescape_path(escaped: &str) -> String {
	format!("/{}", escaped.replace(':', "/"))
}

impl ChunkStorage {
	/// Prepare the chunk directory under `root_dir`
	pub async fn new(root_dir: &Path, chunk_size: u64) -> Result<Self, FsError> {
		let chunks_dir = root_dir.join("chunks");
		fs::create_dir_all(&chunks_dir).await?;
		let mut locks = Vec::with_capacity(LOCK_SHARDS);
		for _ in 0..LOCK_SHARDS {
			locks.push(Mutex::new(()));
		}
		Ok(ChunkStorage { chunks_dir, chunk_size, locks })
	}

	pub fn chunk_size(&self) -> u64 {
		self.chunk_size
	}

	pub fn chunks_dir(&self) -> &Path {
		&self.chunks_dir
	}

	fn file_dir(&self, path: &str) -> PathBuf {
		self.chunks_dir.join(escape_path(path))
	}

	fn chunk_path(&self, path: &str, chunk_id: u64) -> PathBuf {
		self.file_dir(path).join(chunk_id.to_string())
	}

	fn lock_for(&self, path: &str, chunk_id: u64) -> &Mutex<()> {
		let idx = (hash64(path.as_bytes()) ^ chunk_id) as usize % LOCK_SHARDS;
		&self.locks[idx]
	}

	/// Write `buf` into a chunk file at `offset`, creating the file and
	/// its directory on first touch. Returns the number of bytes written.
	pub async fn write_chunk(
		&self,
		path: &str,
		chunk_id: u64,
		offset: u64,
		buf: &[u8],
	) -> Result<usize, FsError> {
		debug_assert!(offset + buf.len() as u64 <= self.chunk_size);
		let _guard = self.lock_for(path, chunk_id).lock().await;

		let chunk_path = self.chunk_path(path, chunk_id);
		let file = fs::OpenOptions::new().write(true).create(true).open(&chunk_path).await;
		let mut file = match file {
			Ok(file) => file,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				// first chunk of this file on this node
				fs::create_dir_all(self.file_dir(path)).await?;
				fs::OpenOptions::new().write(true).create(true).open(&chunk_path).await?
			}
			Err(e) => return Err(e.into()),
		};
		file.seek(SeekFrom::Start(offset)).await?;
		file.write_all(buf).await?;
		trace!("wrote {} bytes to chunk {} of '{}' at {}", buf.len(), chunk_id, path, offset);
		Ok(buf.len())
	}

	/// Read up to `len` bytes from a chunk file starting at `offset`.
	/// Short reads are legal; a missing chunk file reads as empty.
	pub async fn read_chunk(
		&self,
		path: &str,
		chunk_id: u64,
		offset: u64,
		len: usize,
	) -> Result<Vec<u8>, FsError> {
		debug_assert!(offset + len as u64 <= self.chunk_size);
		let chunk_path = self.chunk_path(path, chunk_id);
		let mut file = match fs::File::open(&chunk_path).await {
			Ok(file) => file,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};
		file.seek(SeekFrom::Start(offset)).await?;
		let mut buf = vec![0u8; len];
		let mut read = 0usize;
		while read < len {
			let n = file.read(&mut buf[read..]).await?;
			if n == 0 {
				break;
			}
			read += n;
		}
		buf.truncate(read);
		Ok(buf)
	}

	/// Apply a truncation to the chunks of `path` stored on this node:
	/// chunks entirely beyond `new_size` are deleted, the boundary chunk
	/// is shortened to `new_size mod chunk_size`.
	pub async fn truncate_file(&self, path: &str, new_size: u64) -> Result<(), FsError> {
		let dir = self.file_dir(path);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		let boundary = block_index(new_size, self.chunk_size);
		let boundary_len = block_overrun(new_size, self.chunk_size);
		while let Some(entry) = entries.next_entry().await? {
			let name = entry.file_name();
			let chunk_id: u64 = match name.to_string_lossy().parse() {
				Ok(id) => id,
				Err(_) => {
					warn!("foreign file '{:?}' in chunk dir {:?}", name, dir);
					continue;
				}
			};
			if chunk_id > boundary || (chunk_id == boundary && boundary_len == 0) {
				fs::remove_file(entry.path()).await?;
			} else if chunk_id == boundary {
				let file =
					fs::OpenOptions::new().write(true).open(entry.path()).await?;
				file.set_len(boundary_len).await?;
			}
		}
		Ok(())
	}

	/// Remove every chunk of `path` on this node; idempotent
	pub async fn remove_file(&self, path: &str) -> Result<(), FsError> {
		match fs::remove_dir_all(self.file_dir(path)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Remove one chunk file and its parent directory when it became
	/// empty; used after a chunk was migrated to its new owner
	pub async fn remove_chunk(&self, path: &str, chunk_id: u64) -> Result<(), FsError> {
		let chunk_path = self.chunk_path(path, chunk_id);
		match fs::remove_file(&chunk_path).await {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(e.into()),
		}
		// removing a non-empty directory fails; that is the common case
		// and deliberately ignored
		let _ = fs::remove_dir(self.file_dir(path)).await;
		Ok(())
	}

	/// statvfs-derived utilization of the backing file system, in chunks
	pub async fn stat_storage(&self) -> Result<ChunkStat, FsError> {
		let (blocks, bavail, frsize) = statvfs(&self.chunks_dir)?;
		let bytes_total = blocks * frsize;
		let bytes_free = bavail * frsize;
		Ok(ChunkStat {
			chunk_size: self.chunk_size,
			chunk_total: bytes_total / self.chunk_size,
			chunk_free: bytes_free / self.chunk_size,
		})
	}

	/// Every chunk file on this node, for data redistribution
	pub async fn iterate_all_chunks(&self) -> Result<Vec<ChunkFile>, FsError> {
		let mut out = Vec::new();
		let mut dirs = fs::read_dir(&self.chunks_dir).await?;
		while let Some(dir_entry) = dirs.next_entry().await? {
			if !dir_entry.file_type().await?.is_dir() {
				continue;
			}
			let escaped = dir_entry.file_name().to_string_lossy().into_owned();
			let path = unescape_path(&escaped);
			let mut chunks = fs::read_dir(dir_entry.path()).await?;
			while let Some(chunk_entry) = chunks.next_entry().await? {
				let chunk_id: u64 = match chunk_entry.file_name().to_string_lossy().parse() {
					Ok(id) => id,
					Err(_) => continue,
				};
				let size = chunk_entry.metadata().await?.len();
				out.push(ChunkFile { path: path.clone(), chunk_id, size });
			}
		}
		Ok(out)
	}
}

#[allow(unsafe_code)] // Safe wrapper around system call
fn statvfs(path: &Path) -> Result<(u64, u64, u64), FsError> {
	#[cfg(unix)]
	{
		use std::os::unix::ffi::OsStrExt;
		let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
			.map_err(|_| FsError::invalid("path contains NUL"))?;
		let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
		// SAFETY: cpath is a valid NUL-terminated string and stat points
		// to a properly sized statvfs struct living on the stack.
		let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
		if rc != 0 {
			return Err(std::io::Error::last_os_error().into());
		}
		Ok((stat.f_blocks as u64, stat.f_bavail as u64, stat.f_frsize as u64))
	}

	#[cfg(not(unix))]
	{
		let _ = path;
		Err(FsError::io("statvfs unsupported on this platform"))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn rt() -> tokio::runtime::Runtime {
		tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
	}

	#[test]
	fn test_escape_round_trip() {
		assert_eq!(escape_path("/a/b/c"), "a:b:c");
		assert_eq!(unescape_path("a:b:c"), "/a/b/c");
		assert_eq!(escape_path("/hello"), "hello");
		assert_eq!(unescape_path("hello"), "/hello");
	}

	#[test]
	fn test_write_read_chunk() {
		rt().block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let storage = ChunkStorage::new(dir.path(), 1024).await.unwrap();

			let n = storage.write_chunk("/f", 0, 0, b"hello").await.unwrap();
			assert_eq!(n, 5);
			let buf = storage.read_chunk("/f", 0, 0, 5).await.unwrap();
			assert_eq!(buf, b"hello");

			// offset write inside the same chunk
			storage.write_chunk("/f", 0, 2, b"XY").await.unwrap();
			let buf = storage.read_chunk("/f", 0, 0, 5).await.unwrap();
			assert_eq!(buf, b"heXYo");

			// short read past EOF
			let buf = storage.read_chunk("/f", 0, 0, 100).await.unwrap();
			assert_eq!(buf.len(), 5);

			// missing chunk reads as empty
			let buf = storage.read_chunk("/f", 9, 0, 10).await.unwrap();
			assert!(buf.is_empty());
		});
	}

	#[test]
	fn test_physical_length_tracks_logical() {
		rt().block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let storage = ChunkStorage::new(dir.path(), 1024).await.unwrap();
			storage.write_chunk("/f", 3, 100, b"abc").await.unwrap();
			let all = storage.iterate_all_chunks().await.unwrap();
			assert_eq!(all.len(), 1);
			assert_eq!(all[0].path, "/f");
			assert_eq!(all[0].chunk_id, 3);
			assert_eq!(all[0].size, 103);
		});
	}

	#[test]
	fn test_truncate_file() {
		rt().block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let storage = ChunkStorage::new(dir.path(), 1024).await.unwrap();
			for id in 0..4u64 {
				let payload = vec![id as u8; 1024];
				storage.write_chunk("/t", id, 0, &payload).await.unwrap();
			}
			// 2500 = two full chunks + 452 bytes into chunk 2
			storage.truncate_file("/t", 2500).await.unwrap();
			let mut all = storage.iterate_all_chunks().await.unwrap();
			all.sort_by_key(|c| c.chunk_id);
			let ids: Vec<u64> = all.iter().map(|c| c.chunk_id).collect();
			assert_eq!(ids, vec![0, 1, 2]);
			assert_eq!(all[2].size, 2500 % 1024);

			// aligned truncation removes the boundary chunk entirely
			storage.truncate_file("/t", 1024).await.unwrap();
			let ids: Vec<u64> =
				storage.iterate_all_chunks().await.unwrap().iter().map(|c| c.chunk_id).collect();
			assert_eq!(ids, vec![0]);
		});
	}

	#[test]
	fn test_remove_file_idempotent() {
		rt().block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let storage = ChunkStorage::new(dir.path(), 1024).await.unwrap();
			storage.write_chunk("/gone", 0, 0, b"x").await.unwrap();
			storage.remove_file("/gone").await.unwrap();
			storage.remove_file("/gone").await.unwrap();
			assert!(storage.iterate_all_chunks().await.unwrap().is_empty());
		});
	}

	#[test]
	fn test_stat_storage() {
		rt().block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let storage = ChunkStorage::new(dir.path(), 1024).await.unwrap();
			let stat = storage.stat_storage().await.unwrap();
			assert_eq!(stat.chunk_size, 1024);
			assert!(stat.chunk_total >= stat.chunk_free);
		});
	}
}

// vim: ts=4
