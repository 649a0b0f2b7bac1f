//! Client personality: open-file table, caches and the user-facing
//! file operations issued against the daemon mesh (or the local proxy)
//!
//! The syscall interception layer is not part of this crate; it is
//! expected to resolve raw application paths with [`Client::resolve`]
//! and call the mount-relative operations below.

pub mod cache;
pub mod env;
mod forward_data;
mod forward_metadata;
mod forwarder;
pub mod openfile;

pub use env::ClientSettings;
pub use forwarder::Forwarder;
pub use openfile::{OpenFileMap, OpenFlags};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{self, MetadataSettings};
use crate::distributor::{Distributor, ForwardingDistributor, SimpleHashDistributor};
use crate::error::FsError;
use crate::hosts;
use crate::logging::*;
use crate::metadata::{DirEntry, Metadata};
use crate::path::{self as fspath, Resolved};
use crate::rpc::messages::{
	tag, ErrOut, ExpandFinalizeIn, ExpandStartIn, ExpandStatusIn, ExpandStatusOut, FsConfigIn,
	FsConfigOut,
};
use crate::rpc::RpcClient;
use crate::storage::ChunkStat;
use crate::util;
use cache::{DentryCache, WriteSizeCache};
use futures::future::join_all;
use openfile::OpenFile;

/// One connected client instance
pub struct Client {
	settings: ClientSettings,
	mount_prefix: String,
	fwd: Forwarder,
	ofm: OpenFileMap,
	dentry_cache: DentryCache,
	write_size_cache: WriteSizeCache,
	md_settings: MetadataSettings,
}

impl Client {
	/// Connect using the `LIBGKFS_*` environment
	pub async fn init() -> Result<Client, FsError> {
		Self::with_settings(ClientSettings::from_env()).await
	}

	pub async fn with_settings(settings: ClientSettings) -> Result<Client, FsError> {
		crate::logging::init_client_tracing(
			settings.log_level.as_deref(),
			settings.log_path.as_deref(),
		);
		if settings.metrics_enabled {
			debug!("LIBGKFS_ENABLE_METRICS set; this build collects no metrics");
		}

		let entries =
			hosts::load_with_retries(&settings.hosts_file, config::LOOKUP_TRIES).await?;
		info!("hosts file lists {} daemon(s)", entries.len());

		let (fwd, mount_prefix, md_settings) = if settings.use_proxy {
			let proxy_uri = match &settings.proxy_uri {
				Some(uri) => uri.clone(),
				None => local_proxy_uri(&entries)?,
			};
			let rpc = Arc::new(RpcClient::connect(&[proxy_uri]).await?);
			let dist: Arc<dyn Distributor> =
				Arc::new(SimpleHashDistributor::new(0, entries.len()));
			let mount_prefix = settings
				.mount_dir
				.clone()
				.unwrap_or_else(|| "/tmp/burstfs_mount".to_string());
			(Forwarder::via_proxy(rpc, dist), mount_prefix, MetadataSettings::default())
		} else {
			let uris: Vec<String> = entries.iter().map(|e| e.daemon_uri.clone()).collect();
			let rpc = Arc::new(RpcClient::connect(&uris).await?);

			let dist: Arc<dyn Distributor> = match &settings.forwarding_map_file {
				Some(map_file) => {
					let fwd_host = read_forwarding_map(map_file, &util::get_hostname())?;
					let dist = Arc::new(ForwardingDistributor::new(fwd_host, entries.len()));
					spawn_forwarding_map_reload(map_file.clone(), dist.clone());
					dist
				}
				None => Arc::new(SimpleHashDistributor::new(0, entries.len())),
			};

			// bootstrap instance-wide configuration from host 0
			let fs_config: FsConfigOut = rpc.call(0, tag::FS_CONFIG, &FsConfigIn {}).await?;
			let mount_prefix = settings
				.mount_dir
				.clone()
				.unwrap_or_else(|| fs_config.mountdir.clone());
			(
				Forwarder::new(rpc, dist, settings.num_repl),
				mount_prefix,
				fs_config.md_settings,
			)
		};

		let mount_prefix = fspath::strip_trailing(&mount_prefix).to_string();
		info!("client mounted at '{}'", mount_prefix);
		Ok(Client {
			dentry_cache: DentryCache::new(settings.dentry_ttl, 16 * 1024),
			write_size_cache: WriteSizeCache::new(
				settings.write_size_cache,
				settings.write_size_cache_threshold,
			),
			settings,
			mount_prefix,
			fwd,
			ofm: OpenFileMap::new(),
			md_settings,
		})
	}

	/// The optional-field toggles of the connected instance, as
	/// published by the daemons via `fs_config`
	pub fn md_settings(&self) -> &MetadataSettings {
		&self.md_settings
	}

	pub fn settings(&self) -> &ClientSettings {
		&self.settings
	}

	pub fn mount_prefix(&self) -> &str {
		&self.mount_prefix
	}

	/// Resolve a raw application path against the mount prefix
	pub fn resolve(&self, input: &str, cwd: &str) -> Resolved {
		fspath::resolve(input, cwd, &self.mount_prefix)
	}

	/// Flush a pending coalesced size update for `path`
	async fn flush_size(&self, path: &str) -> Result<(), FsError> {
		if let Some(extent) = self.write_size_cache.take(path) {
			self.fwd.update_metadentry_size(path, 0, extent, false).await?;
		}
		Ok(())
	}

	// === Namespace operations ===

	pub async fn create(&self, path: &str, mode: u32) -> Result<(), FsError> {
		self.fwd.create(path, mode | libc::S_IFREG as u32).await?;
		self.dentry_cache.invalidate(&fspath::parent(path));
		Ok(())
	}

	pub async fn mkdir(&self, path: &str, mode: u32) -> Result<(), FsError> {
		self.fwd.create(path, mode | libc::S_IFDIR as u32).await?;
		self.dentry_cache.invalidate(&fspath::parent(path));
		Ok(())
	}

	pub async fn stat(&self, path: &str) -> Result<Metadata, FsError> {
		self.flush_size(path).await?;
		self.fwd.stat(path).await
	}

	pub async fn remove(&self, path: &str) -> Result<(), FsError> {
		self.flush_size(path).await?;
		self.fwd.remove(path).await?;
		self.dentry_cache.invalidate(&fspath::parent(path));
		Ok(())
	}

	/// Merged listing of `path` across all metadata shards
	pub async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
		let path = fspath::strip_trailing(path);
		if let Some(cached) = self.dentry_cache.get(path) {
			return Ok((*cached).clone());
		}
		let entries = self.fwd.get_dirents_extended(path).await?;
		self.dentry_cache.put(path, entries.clone());
		Ok(entries)
	}

	pub async fn truncate(&self, path: &str, new_size: u64) -> Result<(), FsError> {
		self.flush_size(path).await?;
		let md = self.fwd.stat(path).await?;
		if !md.is_regular() {
			return Err(FsError::invalid("truncate on a non-regular file"));
		}
		let current = md.size as u64;
		if new_size == current {
			return Ok(());
		}
		if new_size > current {
			// growing is purely a metadata operation; reads of the gap
			// return zeros
			self.fwd.update_metadentry_size(path, 0, new_size, false).await?;
			return Ok(());
		}
		// metadata first: no reader may see bytes beyond the new size
		// while chunk files are still being shrunk
		self.fwd.decr_size(path, new_size).await?;
		self.fwd.truncate(path, current, new_size).await
	}

	/// Name-and-type listing, the shape getdents wants
	pub async fn readdir_names(&self, path: &str) -> Result<Vec<(String, bool)>, FsError> {
		self.fwd.get_dirents(fspath::strip_trailing(path)).await
	}

	/// Replace the permission bits, keeping the file type
	pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
		let md = self.fwd.stat(path).await?;
		let new_mode = (md.mode & libc::S_IFMT as u32) | (mode & 0o7777);
		let update = crate::metadata::MetadataUpdate {
			mode: Some(new_mode),
			..Default::default()
		};
		self.fwd.update_metadentry(path, update).await
	}

	/// Aggregated storage utilization, e.g. for statfs
	pub async fn statfs(&self) -> Result<ChunkStat, FsError> {
		self.fwd.chunk_stat().await
	}

	// === Descriptor-based operations ===

	pub async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<u64, FsError> {
		if flags.creat {
			match self.create(path, mode).await {
				Ok(()) => {}
				Err(FsError::Exists) if !flags.excl => {}
				Err(e) => return Err(e),
			}
		} else {
			// existence and type check
			let md = self.stat(path).await?;
			if md.is_dir() && !flags.rdonly {
				return Err(FsError::invalid("directory opened for writing"));
			}
		}
		if flags.trunc {
			let md = self.stat(path).await?;
			if md.size > 0 {
				self.truncate(path, 0).await?;
			}
		}
		Ok(self.ofm.insert(OpenFile::new(path, flags)))
	}

	pub async fn close(&self, fd: u64) -> Result<(), FsError> {
		match self.ofm.remove(fd) {
			Some(file) => self.flush_size(&file.path).await,
			None => Err(FsError::invalid("unknown file descriptor")),
		}
	}

	pub async fn fsync(&self, fd: u64) -> Result<(), FsError> {
		let file = self.ofm.get(fd).ok_or_else(|| FsError::invalid("unknown file descriptor"))?;
		self.flush_size(&file.path).await
	}

	/// Write at the descriptor cursor (or atomically at EOF for append
	/// descriptors) and advance it
	pub async fn write(&self, fd: u64, buf: &[u8]) -> Result<u64, FsError> {
		let file = self.ofm.get(fd).ok_or_else(|| FsError::invalid("unknown file descriptor"))?;
		if file.flags.append {
			let n = self.append_path(&file.path, buf).await?;
			return Ok(n);
		}
		let offset = file.pos();
		let n = self.pwrite(&file.path, buf, offset).await?;
		file.set_pos(offset + n);
		Ok(n)
	}

	pub async fn read(&self, fd: u64, buf: &mut [u8]) -> Result<u64, FsError> {
		let file = self.ofm.get(fd).ok_or_else(|| FsError::invalid("unknown file descriptor"))?;
		let offset = file.pos();
		let n = self.pread(&file.path, buf, offset).await?;
		file.set_pos(offset + n);
		Ok(n)
	}

	pub async fn lseek(&self, fd: u64, offset: i64, whence: i32) -> Result<u64, FsError> {
		let file = self.ofm.get(fd).ok_or_else(|| FsError::invalid("unknown file descriptor"))?;
		let base = match whence {
			libc::SEEK_SET => 0i64,
			libc::SEEK_CUR => file.pos() as i64,
			libc::SEEK_END => {
				self.flush_size(&file.path).await?;
				self.fwd.get_metadentry_size(&file.path).await?
			}
			_ => return Err(FsError::invalid("unsupported whence")),
		};
		let target = base + offset;
		if target < 0 {
			return Err(FsError::invalid("seek before start of file"));
		}
		file.set_pos(target as u64);
		Ok(target as u64)
	}

	// === Positional I/O ===

	/// Write `buf` at `offset`: data RPCs first, then one size update to
	/// the metadata owner (possibly coalesced by the write-size cache)
	pub async fn pwrite(&self, path: &str, buf: &[u8], offset: u64) -> Result<u64, FsError> {
		if buf.is_empty() {
			return Ok(0);
		}
		let written = self.fwd.write(path, buf, offset).await?;
		let extent = offset + written;
		if let Some(extent) = self.write_size_cache.record(path, extent) {
			if self.write_size_cache.enabled() {
				self.fwd.update_metadentry_size(path, 0, extent, false).await?;
			} else {
				self.fwd.update_metadentry_size(path, written, offset, false).await?;
			}
		}
		Ok(written)
	}

	/// Append `buf`: the metadata owner assigns the write offset by
	/// atomically bumping the size, then the data lands at that offset
	async fn append_path(&self, path: &str, buf: &[u8]) -> Result<u64, FsError> {
		self.flush_size(path).await?;
		let offset = match self
			.fwd
			.update_metadentry_size(path, buf.len() as u64, 0, true)
			.await
		{
			Ok(offset) => offset as u64,
			Err(FsError::Busy) => {
				// response lost: the increment may or may not have been
				// applied, so it must never be re-sent. Fall back to the
				// current size as the write offset; if the lost bump did
				// apply, this leaves a zero hole, which reads tolerate.
				warn!("append size update lost for '{}', re-reading size", path);
				let offset = self.fwd.get_metadentry_size(path).await? as u64;
				self.fwd
					.update_metadentry_size(path, buf.len() as u64, offset, false)
					.await?;
				offset
			}
			Err(e) => return Err(e),
		};
		self.fwd.write(path, buf, offset).await
	}

	/// Read up to `buf.len()` bytes at `offset`, clamped at the file
	/// size so sparse tails do not read past EOF
	pub async fn pread(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<u64, FsError> {
		self.flush_size(path).await?;
		let size = self.fwd.get_metadentry_size(path).await? as u64;
		if offset >= size {
			return Ok(0);
		}
		let want = std::cmp::min(buf.len() as u64, size - offset) as usize;
		self.fwd.read(path, &mut buf[..want], offset).await
	}

	// === Malleability orchestration ===

	/// Broadcast `expand_start` to every daemon in the (already
	/// rewritten) hosts file
	pub async fn expand_start(&self, old_n: usize, new_n: usize) -> Result<(), FsError> {
		let input =
			ExpandStartIn { old_server_conf: old_n as u32, new_server_conf: new_n as u32 };
		let calls = (0..self.fwd.rpc.endpoints_len() as u64).map(|host| {
			let input = input.clone();
			let rpc = &self.fwd.rpc;
			async move { rpc.call::<ExpandStartIn, ErrOut>(host, tag::EXPAND_START, &input).await }
		});
		for result in join_all(calls).await {
			let out = result?;
			forwarder::check_err(out.err)?;
		}
		Ok(())
	}

	/// Number of daemons still redistributing
	pub async fn expand_status(&self) -> Result<usize, FsError> {
		let calls = (0..self.fwd.rpc.endpoints_len() as u64).map(|host| {
			let rpc = &self.fwd.rpc;
			async move {
				rpc.call::<ExpandStatusIn, ExpandStatusOut>(
					host,
					tag::EXPAND_STATUS,
					&ExpandStatusIn {},
				)
				.await
			}
		});
		let mut running = 0usize;
		for result in join_all(calls).await {
			let out = result?;
			forwarder::check_err(out.err)?;
			running += out.running as usize;
		}
		Ok(running)
	}

	/// Clear maintenance mode everywhere; the new distribution is live
	pub async fn expand_finalize(&self) -> Result<(), FsError> {
		let calls = (0..self.fwd.rpc.endpoints_len() as u64).map(|host| {
			let rpc = &self.fwd.rpc;
			async move {
				rpc.call::<ExpandFinalizeIn, ErrOut>(
					host,
					tag::EXPAND_FINALIZE,
					&ExpandFinalizeIn {},
				)
				.await
			}
		});
		for result in join_all(calls).await {
			let out = result?;
			forwarder::check_err(out.err)?;
		}
		Ok(())
	}
}

/// The proxy endpoint registered for this node in the hosts file
fn local_proxy_uri(entries: &[hosts::HostEntry]) -> Result<String, FsError> {
	let hostname = util::get_hostname();
	entries
		.iter()
		.find(|e| e.hostname == hostname)
		.and_then(|e| e.proxy_uri.clone())
		.ok_or_else(|| {
			FsError::invalid(format!("no proxy registered for host '{}'", hostname))
		})
}

/// Forwarding map file: a JSON object mapping hostnames to daemon ids
fn read_forwarding_map(path: &Path, hostname: &str) -> Result<u64, FsError> {
	let contents = std::fs::read_to_string(path)
		.map_err(|e| FsError::io(format!("forwarding map unreadable: {}", e)))?;
	let map: HashMap<String, u64> = serde_json::from_str(&contents)
		.map_err(|e| FsError::io(format!("forwarding map malformed: {}", e)))?;
	map.get(hostname)
		.copied()
		.ok_or_else(|| FsError::invalid(format!("host '{}' missing from forwarding map", hostname)))
}

/// Re-read the forwarding map periodically; the target daemon of the
/// forwarding distributor may be changed at runtime by the scheduler
fn spawn_forwarding_map_reload(path: std::path::PathBuf, dist: Arc<ForwardingDistributor>) {
	tokio::spawn(async move {
		let hostname = util::get_hostname();
		let mut ticker = tokio::time::interval(config::FORWARDING_MAP_RELOAD);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			match read_forwarding_map(&path, &hostname) {
				Ok(fwd_host) => {
					if fwd_host != dist.fwd_host() {
						info!("forwarding target changed to host {}", fwd_host);
						dist.set_fwd_host(fwd_host);
					}
				}
				Err(e) => warn!("forwarding map reload failed: {}", e),
			}
		}
	});
}

// vim: ts=4
