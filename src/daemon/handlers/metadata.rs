//! Metadata handlers: straight-through to the store adapter

use super::encode;
use crate::config::DIRENTS_BUF_SIZE;
use crate::daemon::DaemonContext;
use crate::error::FsError;
use crate::logging::*;
use crate::metadata::{DirEntry, Metadata};
use crate::rpc::messages::*;
use crate::util;

fn errno(result: &Result<(), FsError>) -> i32 {
	match result {
		Ok(()) => 0,
		Err(e) => e.to_errno(),
	}
}

pub async fn fs_config(ctx: &DaemonContext) -> (Vec<u8>, Vec<u8>) {
	let out = FsConfigOut {
		err: 0,
		mountdir: ctx.settings.mountdir.display().to_string(),
		md_settings: ctx.settings.md_settings,
		uid: util::get_effective_uid(),
		gid: util::get_effective_gid(),
	};
	(encode(&out), Vec::new())
}

pub async fn create(ctx: &DaemonContext, input: MkNodeIn) -> (Vec<u8>, Vec<u8>) {
	debug!("create '{}' mode {:o}", input.path, input.mode);
	// an untyped mode means a regular file
	let mode = if input.mode & libc::S_IFMT as u32 == 0 {
		input.mode | libc::S_IFREG as u32
	} else {
		input.mode
	};
	let md = Metadata::new(
		mode,
		util::get_effective_uid(),
		util::get_effective_gid(),
		ctx.mdb.settings(),
	);
	let result = ctx.mdb.create(&input.path, &md);
	(encode(&ErrOut { err: errno(&result) }), Vec::new())
}

pub async fn stat(ctx: &DaemonContext, input: PathIn) -> (Vec<u8>, Vec<u8>) {
	let out = match ctx.mdb.get_raw(&input.path) {
		Ok(db_val) => StatOut { err: 0, db_val },
		Err(e) => StatOut { err: e.to_errno(), db_val: Vec::new() },
	};
	(encode(&out), Vec::new())
}

pub async fn remove_metadata(ctx: &DaemonContext, input: PathIn) -> (Vec<u8>, Vec<u8>) {
	debug!("remove metadata '{}'", input.path);
	let out = match ctx.mdb.remove(&input.path) {
		Ok((size, mode)) => RmMetadataOut { err: 0, size, mode },
		Err(e) => RmMetadataOut { err: e.to_errno(), size: 0, mode: 0 },
	};
	(encode(&out), Vec::new())
}

pub async fn decr_size(ctx: &DaemonContext, input: DecrSizeIn) -> (Vec<u8>, Vec<u8>) {
	let result = ctx.mdb.decrement_size(&input.path, input.length);
	(encode(&ErrOut { err: errno(&result) }), Vec::new())
}

pub async fn update_metadentry(
	ctx: &DaemonContext,
	input: UpdateMetadentryIn,
) -> (Vec<u8>, Vec<u8>) {
	let result = ctx.mdb.update(&input.path, &input.update);
	(encode(&ErrOut { err: errno(&result) }), Vec::new())
}

pub async fn get_metadentry_size(ctx: &DaemonContext, input: PathIn) -> (Vec<u8>, Vec<u8>) {
	let out = match ctx.mdb.get_size(&input.path) {
		Ok(ret_size) => GetMetadentrySizeOut { err: 0, ret_size },
		Err(e) => GetMetadentrySizeOut { err: e.to_errno(), ret_size: 0 },
	};
	(encode(&out), Vec::new())
}

/// The one linearization point of the write path: the size bump happens
/// through the KV store's atomic update, and for appends the pre-update
/// size is the offset handed back to the writer
pub async fn update_metadentry_size(
	ctx: &DaemonContext,
	input: UpdateMetadentrySizeIn,
) -> (Vec<u8>, Vec<u8>) {
	let out = match ctx.mdb.update_size(&input.path, input.size, input.offset, input.append) {
		Ok(offset) => UpdateMetadentrySizeOut { err: 0, ret_offset: offset as i64 },
		Err(e) => UpdateMetadentrySizeOut { err: e.to_errno(), ret_offset: 0 },
	};
	(encode(&out), Vec::new())
}

/// Entries that fit the per-shard dirent buffer; the remainder is logged
/// and dropped, mirroring a bulk buffer that ran out of space
fn fit_entries(mut entries: Vec<DirEntry>, per_entry_fixed: usize) -> Vec<DirEntry> {
	let mut used = 0usize;
	let mut fit = 0usize;
	for e in &entries {
		let record = per_entry_fixed + e.name.len() + 1;
		if used + record > DIRENTS_BUF_SIZE {
			break;
		}
		used += record;
		fit += 1;
	}
	if fit < entries.len() {
		warn!("dirent buffer exhausted, dropping {} entries", entries.len() - fit);
		entries.truncate(fit);
	}
	entries
}

pub async fn get_dirents(ctx: &DaemonContext, input: PathIn) -> (Vec<u8>, Vec<u8>) {
	match ctx.mdb.iterate_directory(&input.path) {
		Ok(entries) => {
			let entries = fit_entries(entries, 1);
			let bulk = pack_dirents(&entries);
			(
				encode(&DirentsOut { err: 0, dirents_count: entries.len() as u64 }),
				bulk,
			)
		}
		Err(e) => (
			encode(&DirentsOut { err: e.to_errno(), dirents_count: 0 }),
			Vec::new(),
		),
	}
}

pub async fn get_dirents_extended(ctx: &DaemonContext, input: PathIn) -> (Vec<u8>, Vec<u8>) {
	match ctx.mdb.iterate_directory(&input.path) {
		Ok(entries) => {
			let entries = fit_entries(entries, 17);
			let bulk = pack_dirents_extended(&entries);
			(
				encode(&DirentsOut { err: 0, dirents_count: entries.len() as u64 }),
				bulk,
			)
		}
		Err(e) => (
			encode(&DirentsOut { err: e.to_errno(), dirents_count: 0 }),
			Vec::new(),
		),
	}
}

// vim: ts=4
