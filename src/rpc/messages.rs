//! RPC in/out structs and the exact tag strings on the wire
//!
//! Tags select the handler on the receiving end. The daemon surface uses
//! the `rpc_srv_*` namespace; the client-to-proxy surface re-exposes the
//! subset clients call under `proxy_rpc_srv_*` with identical shapes.
//!
//! Every out struct starts with an `err` field holding 0 or an errno;
//! application-level errors travel there and are never retried by the
//! transport wrapper.

use serde::{Deserialize, Serialize};

use crate::config::MetadataSettings;
use crate::error::FsError;
use crate::metadata::{DirEntry, MetadataUpdate};
use crate::storage::ChunkStat;

pub mod tag {
	pub const FS_CONFIG: &str = "rpc_srv_fs_config";
	pub const CREATE: &str = "rpc_srv_mk_node";
	pub const STAT: &str = "rpc_srv_stat";
	pub const REMOVE_METADATA: &str = "rpc_srv_rm_metadata";
	pub const REMOVE_DATA: &str = "rpc_srv_rm_data";
	pub const DECR_SIZE: &str = "rpc_srv_decr_size";
	pub const UPDATE_METADENTRY: &str = "rpc_srv_update_metadentry";
	pub const GET_METADENTRY_SIZE: &str = "rpc_srv_get_metadentry_size";
	pub const UPDATE_METADENTRY_SIZE: &str = "rpc_srv_update_metadentry_size";
	pub const GET_DIRENTS: &str = "rpc_srv_get_dirents";
	pub const GET_DIRENTS_EXTENDED: &str = "rpc_srv_get_dirents_extended";
	pub const WRITE: &str = "rpc_srv_write_data";
	pub const READ: &str = "rpc_srv_read_data";
	pub const TRUNCATE: &str = "rpc_srv_trunc_data";
	pub const CHUNK_STAT: &str = "rpc_srv_chunk_stat";
	pub const EXPAND_START: &str = "rpc_srv_expand_start";
	pub const EXPAND_STATUS: &str = "rpc_srv_expand_status";
	pub const EXPAND_FINALIZE: &str = "rpc_srv_expand_finalize";
	pub const MIGRATE_METADATA: &str = "rpc_srv_migrate_metadata";
	pub const MIGRATE_DATA: &str = "rpc_srv_migrate_data";

	// client <-> proxy surface
	pub const PROXY_CREATE: &str = "proxy_rpc_srv_create";
	pub const PROXY_STAT: &str = "proxy_rpc_srv_stat";
	pub const PROXY_REMOVE: &str = "proxy_rpc_srv_remove";
	pub const PROXY_DECR_SIZE: &str = "proxy_rpc_srv_decr_size";
	pub const PROXY_GET_SIZE: &str = "proxy_rpc_srv_get_metadentry_size";
	pub const PROXY_UPDATE_SIZE: &str = "proxy_rpc_srv_update_metadentry_size";
	pub const PROXY_WRITE: &str = "proxy_rpc_srv_write_data";
	pub const PROXY_READ: &str = "proxy_rpc_srv_read_data";
	pub const PROXY_TRUNCATE: &str = "proxy_rpc_srv_truncate";
	pub const PROXY_CHUNK_STAT: &str = "proxy_rpc_srv_chunk_stat";
	pub const PROXY_GET_DIRENTS_EXTENDED: &str = "proxy_rpc_srv_get_dirents_extended";
}

// === Requests ===

/// Shared shape for RPCs that carry only a path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathIn {
	pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfigIn {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkNodeIn {
	pub path: String,
	pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecrSizeIn {
	pub path: String,
	pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMetadentryIn {
	pub path: String,
	pub update: MetadataUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMetadentrySizeIn {
	pub path: String,
	pub size: u64,
	pub offset: u64,
	pub append: bool,
}

/// Chunked data RPC: describes which chunks of the client's byte range
/// the receiving daemon owns. The bulk payload of the frame holds the
/// chunk bytes, concatenated in `chunk_ids` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIn {
	pub path: String,

	/// Offset within the first chunk of the whole range; the receiver
	/// applies it only when writing or reading `chunk_start`
	pub in_offset: u64,

	/// Chunks owned by this destination, ascending
	pub chunk_ids: Vec<u64>,

	/// First and last chunk of the whole client range
	pub chunk_start: u64,
	pub chunk_end: u64,

	/// Total payload bytes for this destination
	pub total_chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncDataIn {
	pub path: String,
	pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatIn {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandStartIn {
	pub old_server_conf: u32,
	pub new_server_conf: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandStatusIn {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandFinalizeIn {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateMetadataIn {
	pub key: String,
	pub value: Vec<u8>,
}

/// Chunk migration; the chunk bytes ride in the frame's bulk payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateDataIn {
	pub path: String,
	pub chunk_id: u64,
}

/// Full-range data RPC from client to proxy; the proxy performs the
/// per-chunk fan-out on the client's behalf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyDataIn {
	pub path: String,
	pub offset: u64,
	pub size: u64,
}

/// Truncate via proxy; carries the pre-truncation size so the proxy can
/// target exactly the nodes owning chunks in the shrunk range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyTruncIn {
	pub path: String,
	pub current_size: u64,
	pub new_size: u64,
}

// === Responses ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrOut {
	pub err: i32,
}

impl ErrOut {
	pub fn ok() -> Self {
		ErrOut { err: 0 }
	}

	pub fn from_err(e: &FsError) -> Self {
		ErrOut { err: e.to_errno() }
	}
}

/// Instance-wide configuration clients bootstrap from host 0: the mount
/// prefix plus the toggles for every optional metadata field, so all
/// peers agree on which fields carry real values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfigOut {
	pub err: i32,
	pub mountdir: String,
	pub md_settings: MetadataSettings,
	pub uid: u32,
	pub gid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatOut {
	pub err: i32,
	/// Serialized metadata record, passed through without re-encoding
	pub db_val: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmMetadataOut {
	pub err: i32,
	/// Size and mode the entry had before removal, so the caller can
	/// decide whether data chunks need a removal fan-out
	pub size: i64,
	pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetadentrySizeOut {
	pub err: i32,
	pub ret_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMetadentrySizeOut {
	pub err: i32,
	/// Offset at which the caller must place its data (pre-update size
	/// for appends, the requested offset otherwise)
	pub ret_offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataOut {
	pub err: i32,
	pub io_size: u64,
}

/// Readdir response; the packed records ride in the frame's bulk payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirentsOut {
	pub err: i32,
	pub dirents_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatOut {
	pub err: i32,
	pub chunk_stat: ChunkStat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandStatusOut {
	pub err: i32,
	/// 1 while redistribution is running, 0 when done
	pub running: i32,
}

// === Packed dirent streams ===
//
// get_dirents_extended packs records as four consecutive arrays:
// `[u8 is_file]*n  [u64 size]*n  [i64 ctime]*n  [name\0]*n`. The three
// fixed-width arrays precede the names so a reader can compute all
// pointers from the record count without pre-scanning the name block.
// The plain get_dirents variant carries `[u8 is_file]*n [name\0]*n`.

pub fn pack_dirents_extended(entries: &[DirEntry]) -> Vec<u8> {
	let names_len: usize = entries.iter().map(|e| e.name.len() + 1).sum();
	let mut buf = Vec::with_capacity(entries.len() * 17 + names_len);
	for e in entries {
		buf.push(if e.is_dir { 0u8 } else { 1u8 });
	}
	for e in entries {
		buf.extend_from_slice(&(e.size as u64).to_le_bytes());
	}
	for e in entries {
		buf.extend_from_slice(&e.ctime.to_le_bytes());
	}
	for e in entries {
		buf.extend_from_slice(e.name.as_bytes());
		buf.push(0);
	}
	buf
}

pub fn unpack_dirents_extended(buf: &[u8], count: u64) -> Result<Vec<DirEntry>, FsError> {
	let n = count as usize;
	let fixed = n + 8 * n + 8 * n;
	if buf.len() < fixed {
		return Err(FsError::io("truncated dirent stream"));
	}
	let (flags, rest) = buf.split_at(n);
	let (sizes, rest) = rest.split_at(8 * n);
	let (ctimes, names) = rest.split_at(8 * n);

	let mut out = Vec::with_capacity(n);
	let mut name_off = 0usize;
	for i in 0..n {
		let nul = names[name_off..]
			.iter()
			.position(|&b| b == 0)
			.ok_or_else(|| FsError::io("unterminated dirent name"))?;
		let name = String::from_utf8_lossy(&names[name_off..name_off + nul]).into_owned();
		name_off += nul + 1;

		let mut size_bytes = [0u8; 8];
		size_bytes.copy_from_slice(&sizes[i * 8..i * 8 + 8]);
		let mut ctime_bytes = [0u8; 8];
		ctime_bytes.copy_from_slice(&ctimes[i * 8..i * 8 + 8]);

		out.push(DirEntry {
			name,
			is_dir: flags[i] == 0,
			size: u64::from_le_bytes(size_bytes) as i64,
			ctime: i64::from_le_bytes(ctime_bytes),
		});
	}
	Ok(out)
}

pub fn pack_dirents(entries: &[DirEntry]) -> Vec<u8> {
	let names_len: usize = entries.iter().map(|e| e.name.len() + 1).sum();
	let mut buf = Vec::with_capacity(entries.len() + names_len);
	for e in entries {
		buf.push(if e.is_dir { 0u8 } else { 1u8 });
	}
	for e in entries {
		buf.extend_from_slice(e.name.as_bytes());
		buf.push(0);
	}
	buf
}

pub fn unpack_dirents(buf: &[u8], count: u64) -> Result<Vec<(String, bool)>, FsError> {
	let n = count as usize;
	if buf.len() < n {
		return Err(FsError::io("truncated dirent stream"));
	}
	let (flags, names) = buf.split_at(n);
	let mut out = Vec::with_capacity(n);
	let mut name_off = 0usize;
	for flag in flags.iter().take(n) {
		let nul = names[name_off..]
			.iter()
			.position(|&b| b == 0)
			.ok_or_else(|| FsError::io("unterminated dirent name"))?;
		let name = String::from_utf8_lossy(&names[name_off..name_off + nul]).into_owned();
		name_off += nul + 1;
		out.push((name, *flag == 1));
	}
	Ok(out)
}


// vim: ts=4
