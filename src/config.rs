//! Compile-time constants and runtime settings for BurstFS
#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

/// Chunk size in bytes. Must be a power of two; every file is striped
/// across the daemons in units of this size.
pub const CHUNK_SIZE: u64 = 524288;

/// Per-call RPC timeout
pub const RPC_TIMEOUT: Duration = Duration::from_secs(180);

/// Maximum attempts per RPC before giving up with Busy
pub const RPC_TRIES: usize = 3;

/// Attempts for peer address lookup at startup
pub const LOOKUP_TRIES: usize = 4;

/// Attempts for a daemon to observe its own hosts file registration
pub const HOSTS_REREAD_TRIES: usize = 4;

/// First file descriptor handed out by the open-file table. High enough
/// that the kernel never allocates in this range.
pub const FD_MIN: u64 = 100_000_000;

/// Bulk buffer size offered to each metadata shard for a readdir sweep
pub const DIRENTS_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Hard ceiling for a single wire frame (header + body + bulk payload).
/// Bounded by the largest write fan-out segment plus slack.
pub const MAX_FRAME_SIZE: usize = 128 * 1024 * 1024;

/// 512-byte units for the `blocks` metadata field, as in struct stat
pub const ST_NBLOCKSIZE: u64 = 512;

/// Reload period of the forwarding map file
pub const FORWARDING_MAP_RELOAD: Duration = Duration::from_secs(10);

/// Default TTL of the client dentry cache
pub const DENTRY_TTL: Duration = Duration::from_millis(500);

/// Default number of size updates coalesced by the write-size cache
/// before one is flushed to the metadata owner
pub const WRITE_SIZE_CACHE_THRESHOLD: u32 = 16;

/// Which optional metadata fields the daemons maintain. A disabled
/// field is stored as 0 and never updated. All daemons of one instance
/// must agree; the flags are published to clients via the `fs_config`
/// RPC so both ends interpret records identically.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct MetadataSettings {
	pub atime: bool,
	pub mtime: bool,
	pub ctime: bool,
	pub link_count: bool,
	pub blocks: bool,
}

impl Default for MetadataSettings {
	fn default() -> Self {
		MetadataSettings { atime: false, mtime: true, ctime: true, link_count: true, blocks: true }
	}
}

/// Daemon startup settings, assembled from CLI flags and an optional
/// TOML config file in `main.rs`
#[derive(Debug, Clone)]
pub struct DaemonSettings {
	/// Mount prefix clients intercept against
	pub mountdir: PathBuf,

	/// Node-local directory holding chunk data
	pub rootdir: PathBuf,

	/// Node-local directory holding the metadata database.
	/// Defaults to `rootdir` when unset.
	pub metadir: Option<PathBuf>,

	/// Listen address for the daemon RPC endpoint, `host:port`
	pub listen: String,

	/// Shared hosts file this daemon registers itself in
	pub hosts_file: PathBuf,

	/// Transport scheme for the daemon endpoint (only `tcp` is wired up)
	pub rpc_protocol: String,

	/// Wipe `rootdir` contents at startup
	pub clean_rootdir: bool,

	/// Metadata database backend: `redb` or `memory`
	pub dbbackend: String,

	/// Transport scheme the co-located proxy listens on, if any
	pub proxy_protocol: Option<String>,

	pub md_settings: MetadataSettings,
}

impl Default for DaemonSettings {
	fn default() -> Self {
		DaemonSettings {
			mountdir: PathBuf::from("/tmp/burstfs_mount"),
			rootdir: PathBuf::from("/tmp/burstfs_root"),
			metadir: None,
			listen: "0.0.0.0:4433".to_string(),
			hosts_file: PathBuf::from("./burstfs_hosts.txt"),
			rpc_protocol: "tcp".to_string(),
			clean_rootdir: false,
			dbbackend: "redb".to_string(),
			proxy_protocol: None,
			md_settings: MetadataSettings::default(),
		}
	}
}

// vim: ts=4
