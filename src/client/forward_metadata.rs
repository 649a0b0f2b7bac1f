//! Metadata forwarding: single-owner calls and multi-shard fan-outs
//!
//! Single-owner operations resolve the metadata owner through the
//! distributor and issue exactly one RPC. `remove` and the readdir sweep
//! additionally fan out; all responses are collected before returning so
//! no call is left dangling on the wire.

use futures::future::join_all;

use super::forwarder::{check_err, Forwarder};
use crate::distributor::Distributor;
use crate::error::FsError;
use crate::logging::*;
use crate::metadata::{DirEntry, Metadata, MetadataUpdate};
use crate::rpc::messages::*;
use crate::storage::ChunkStat;

impl Forwarder {
	pub async fn create(&self, path: &str, mode: u32) -> Result<(), FsError> {
		let input = MkNodeIn { path: path.to_string(), mode };
		let out: ErrOut = if self.via_proxy {
			self.rpc.call(0, tag::PROXY_CREATE, &input).await?
		} else {
			let owner = self.dist.locate_file_metadata(path);
			self.rpc.call(owner, tag::CREATE, &input).await?
		};
		check_err(out.err)
	}

	/// The serialized record as stored; the proxy passes this through
	/// without interpreting it
	pub async fn stat_raw(&self, path: &str) -> Result<Vec<u8>, FsError> {
		let input = PathIn { path: path.to_string() };
		let out: StatOut = if self.via_proxy {
			self.rpc.call(0, tag::PROXY_STAT, &input).await?
		} else {
			let owner = self.dist.locate_file_metadata(path);
			self.rpc.call(owner, tag::STAT, &input).await?
		};
		check_err(out.err)?;
		Ok(out.db_val)
	}

	pub async fn stat(&self, path: &str) -> Result<Metadata, FsError> {
		let raw = self.stat_raw(path).await?;
		Metadata::deserialize(&raw)
	}

	/// Remove a path. For a regular file that had data, the metadata
	/// removal is followed by a data-removal fan-out to every node,
	/// since any node may hold chunks of the file.
	pub async fn remove(&self, path: &str) -> Result<(), FsError> {
		let input = PathIn { path: path.to_string() };
		if self.via_proxy {
			let out: ErrOut = self.rpc.call(0, tag::PROXY_REMOVE, &input).await?;
			return check_err(out.err);
		}

		let owner = self.dist.locate_file_metadata(path);
		let out: RmMetadataOut = self.rpc.call(owner, tag::REMOVE_METADATA, &input).await?;
		check_err(out.err)?;

		let is_regular = out.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32;
		if !is_regular || out.size == 0 {
			return Ok(());
		}
		debug!("'{}' had {} bytes, removing data on all nodes", path, out.size);
		let calls = (0..self.dist.hosts_size() as u64).map(|host| {
			let input = PathIn { path: path.to_string() };
			async move { self.rpc.call::<PathIn, ErrOut>(host, tag::REMOVE_DATA, &input).await }
		});
		let mut first_err = None;
		for result in join_all(calls).await {
			match result {
				Ok(out) => {
					if let Err(e) = check_err(out.err) {
						first_err.get_or_insert(e);
					}
				}
				Err(e) => {
					first_err.get_or_insert(e);
				}
			}
		}
		match first_err {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	pub async fn decr_size(&self, path: &str, length: u64) -> Result<(), FsError> {
		let input = DecrSizeIn { path: path.to_string(), length };
		let out: ErrOut = if self.via_proxy {
			self.rpc.call(0, tag::PROXY_DECR_SIZE, &input).await?
		} else {
			let owner = self.dist.locate_file_metadata(path);
			self.rpc.call(owner, tag::DECR_SIZE, &input).await?
		};
		check_err(out.err)
	}

	pub async fn update_metadentry(
		&self,
		path: &str,
		update: MetadataUpdate,
	) -> Result<(), FsError> {
		let owner = self.dist.locate_file_metadata(path);
		let input = UpdateMetadentryIn { path: path.to_string(), update };
		let out: ErrOut = self.rpc.call(owner, tag::UPDATE_METADENTRY, &input).await?;
		check_err(out.err)
	}

	pub async fn get_metadentry_size(&self, path: &str) -> Result<i64, FsError> {
		let input = PathIn { path: path.to_string() };
		let out: GetMetadentrySizeOut = if self.via_proxy {
			self.rpc.call(0, tag::PROXY_GET_SIZE, &input).await?
		} else {
			let owner = self.dist.locate_file_metadata(path);
			self.rpc.call(owner, tag::GET_METADENTRY_SIZE, &input).await?
		};
		check_err(out.err)?;
		Ok(out.ret_size)
	}

	/// Push the post-write size to the metadata owner and learn the
	/// write-start offset. An append whose response is lost must not be
	/// re-sent (the increment may have been applied), so appends run
	/// with a single try and the caller falls back to
	/// `get_metadentry_size` on Busy.
	pub async fn update_metadentry_size(
		&self,
		path: &str,
		size: u64,
		offset: u64,
		append: bool,
	) -> Result<i64, FsError> {
		let input = UpdateMetadentrySizeIn { path: path.to_string(), size, offset, append };
		let tries = if append { 1 } else { crate::config::RPC_TRIES };
		let (out, _bulk): (UpdateMetadentrySizeOut, Vec<u8>) = if self.via_proxy {
			self.rpc.call_with_tries(0, tag::PROXY_UPDATE_SIZE, &input, Vec::new(), tries).await?
		} else {
			let owner = self.dist.locate_file_metadata(path);
			self.rpc
				.call_with_tries(owner, tag::UPDATE_METADENTRY_SIZE, &input, Vec::new(), tries)
				.await?
		};
		check_err(out.err)?;
		Ok(out.ret_offset)
	}

	/// Readdir sweep: every metadata shard contributes the children it
	/// holds; results are merged into one lexicographic listing
	pub async fn get_dirents_extended(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
		let input = PathIn { path: path.to_string() };
		if self.via_proxy {
			let (out, bulk): (DirentsOut, Vec<u8>) = self
				.rpc
				.call_with_bulk(0, tag::PROXY_GET_DIRENTS_EXTENDED, &input, Vec::new())
				.await?;
			check_err(out.err)?;
			return unpack_dirents_extended(&bulk, out.dirents_count);
		}

		let calls = self.dist.locate_directory_metadata().into_iter().map(|host| {
			let input = PathIn { path: path.to_string() };
			async move {
				self.rpc
					.call_with_bulk::<PathIn, DirentsOut>(
						host,
						tag::GET_DIRENTS_EXTENDED,
						&input,
						Vec::new(),
					)
					.await
			}
		});
		let mut entries = Vec::new();
		let mut first_err = None;
		for result in join_all(calls).await {
			match result {
				Ok((out, bulk)) => match check_err(out.err) {
					Ok(()) => entries.extend(unpack_dirents_extended(&bulk, out.dirents_count)?),
					Err(e) => {
						first_err.get_or_insert(e);
					}
				},
				Err(e) => {
					first_err.get_or_insert(e);
				}
			}
		}
		if let Some(e) = first_err {
			return Err(e);
		}
		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}

	/// Name-and-type-only readdir sweep, enough for getdents. The proxy
	/// surface only carries the extended variant, so the proxy path
	/// derives the names from that.
	pub async fn get_dirents(&self, path: &str) -> Result<Vec<(String, bool)>, FsError> {
		if self.via_proxy {
			let entries = self.get_dirents_extended(path).await?;
			return Ok(entries.into_iter().map(|e| (e.name, !e.is_dir)).collect());
		}

		let calls = self.dist.locate_directory_metadata().into_iter().map(|host| {
			let input = PathIn { path: path.to_string() };
			async move {
				self.rpc
					.call_with_bulk::<PathIn, DirentsOut>(host, tag::GET_DIRENTS, &input, Vec::new())
					.await
			}
		});
		let mut entries = Vec::new();
		let mut first_err = None;
		for result in join_all(calls).await {
			match result {
				Ok((out, bulk)) => match check_err(out.err) {
					Ok(()) => entries.extend(unpack_dirents(&bulk, out.dirents_count)?),
					Err(e) => {
						first_err.get_or_insert(e);
					}
				},
				Err(e) => {
					first_err.get_or_insert(e);
				}
			}
		}
		if let Some(e) = first_err {
			return Err(e);
		}
		entries.sort();
		Ok(entries)
	}

	/// Aggregate free-space accounting over every node
	pub async fn chunk_stat(&self) -> Result<ChunkStat, FsError> {
		if self.via_proxy {
			let out: ChunkStatOut =
				self.rpc.call(0, tag::PROXY_CHUNK_STAT, &ChunkStatIn {}).await?;
			check_err(out.err)?;
			return Ok(out.chunk_stat);
		}

		let calls = (0..self.dist.hosts_size() as u64).map(|host| async move {
			self.rpc.call::<ChunkStatIn, ChunkStatOut>(host, tag::CHUNK_STAT, &ChunkStatIn {}).await
		});
		let mut total = ChunkStat { chunk_size: 0, chunk_total: 0, chunk_free: 0 };
		for result in join_all(calls).await {
			let out = result?;
			check_err(out.err)?;
			total.chunk_size = out.chunk_stat.chunk_size;
			total.chunk_total += out.chunk_stat.chunk_total;
			total.chunk_free += out.chunk_stat.chunk_free;
		}
		Ok(total)
	}
}

// vim: ts=4
