//! Data handlers: chunk I/O against the local chunk storage
//!
//! The per-chunk lengths are derived from
//! `(in_offset, chunk_start, chunk_end, total_chunk_size)` by consuming
//! the payload sequentially in chunk-id order: the first chunk of the
//! whole range starts at `in_offset` within its chunk, every other chunk
//! at 0; every chunk takes a full chunk worth of bytes except the last,
//! which takes whatever remains. This mirrors the client-side gather
//! arithmetic exactly.

use super::encode;
use crate::daemon::DaemonContext;
use crate::logging::*;
use crate::rpc::messages::*;

pub async fn write(ctx: &DaemonContext, input: DataIn, bulk: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
	if bulk.len() as u64 != input.total_chunk_size {
		warn!(
			"write '{}': payload {} does not match announced {}",
			input.path,
			bulk.len(),
			input.total_chunk_size
		);
		return (encode(&DataOut { err: libc::EINVAL, io_size: 0 }), Vec::new());
	}
	let chunk_size = ctx.storage.chunk_size();
	let mut consumed = 0u64;
	let mut io_size = 0u64;
	for chunk_id in &input.chunk_ids {
		let in_chunk_offset = if *chunk_id == input.chunk_start { input.in_offset } else { 0 };
		let remaining = input.total_chunk_size - consumed;
		let len = std::cmp::min(chunk_size - in_chunk_offset, remaining);
		let segment = &bulk[consumed as usize..(consumed + len) as usize];
		match ctx.storage.write_chunk(&input.path, *chunk_id, in_chunk_offset, segment).await {
			Ok(n) => io_size += n as u64,
			Err(e) => {
				error!("write '{}' chunk {}: {}", input.path, chunk_id, e);
				return (encode(&DataOut { err: e.to_errno(), io_size }), Vec::new());
			}
		}
		consumed += len;
	}
	(encode(&DataOut { err: 0, io_size }), Vec::new())
}

pub async fn read(ctx: &DaemonContext, input: DataIn) -> (Vec<u8>, Vec<u8>) {
	let chunk_size = ctx.storage.chunk_size();
	let mut out_bulk = Vec::with_capacity(input.total_chunk_size as usize);
	let mut produced = 0u64;
	let mut io_size = 0u64;
	for chunk_id in &input.chunk_ids {
		let in_chunk_offset = if *chunk_id == input.chunk_start { input.in_offset } else { 0 };
		let remaining = input.total_chunk_size - produced;
		let len = std::cmp::min(chunk_size - in_chunk_offset, remaining);
		match ctx.storage.read_chunk(&input.path, *chunk_id, in_chunk_offset, len as usize).await
		{
			Ok(data) => {
				// a missing or short chunk file reads as zeros; the file
				// is sparse-aware and the client clamped at file size
				let short = len as usize - data.len();
				out_bulk.extend_from_slice(&data);
				if short > 0 {
					out_bulk.resize(out_bulk.len() + short, 0);
				}
				io_size += len;
			}
			Err(e) => {
				error!("read '{}' chunk {}: {}", input.path, chunk_id, e);
				return (encode(&DataOut { err: e.to_errno(), io_size }), Vec::new());
			}
		}
		produced += len;
	}
	(encode(&DataOut { err: 0, io_size }), out_bulk)
}

pub async fn truncate(ctx: &DaemonContext, input: TruncDataIn) -> (Vec<u8>, Vec<u8>) {
	debug!("truncate '{}' to {}", input.path, input.length);
	let out = match ctx.storage.truncate_file(&input.path, input.length).await {
		Ok(()) => ErrOut::ok(),
		Err(e) => ErrOut::from_err(&e),
	};
	(encode(&out), Vec::new())
}

pub async fn remove_data(ctx: &DaemonContext, input: PathIn) -> (Vec<u8>, Vec<u8>) {
	debug!("remove data '{}'", input.path);
	let out = match ctx.storage.remove_file(&input.path).await {
		Ok(()) => ErrOut::ok(),
		Err(e) => ErrOut::from_err(&e),
	};
	(encode(&out), Vec::new())
}

pub async fn chunk_stat(ctx: &DaemonContext) -> (Vec<u8>, Vec<u8>) {
	let out = match ctx.storage.stat_storage().await {
		Ok(chunk_stat) => ChunkStatOut { err: 0, chunk_stat },
		Err(e) => ChunkStatOut {
			err: e.to_errno(),
			chunk_stat: crate::storage::ChunkStat { chunk_size: 0, chunk_total: 0, chunk_free: 0 },
		},
	};
	(encode(&out), Vec::new())
}

// vim: ts=4
