//! Inbound RPC dispatch into the metadata store and chunk storage

mod data;
mod malleability;
mod metadata;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::daemon::DaemonContext;
use crate::logging::*;
use crate::rpc::messages::{self, tag};
use crate::rpc::Handler;
use crate::storage::ChunkStat;

pub(crate) fn encode<T: Serialize>(out: &T) -> Vec<u8> {
	bincode::serialize(out).unwrap_or_default()
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Option<T> {
	bincode::deserialize(body).ok()
}

/// Response of the right shape for `tag` carrying only an errno. Used
/// for the maintenance-mode gate and for undecodable requests, where no
/// handler ran but the caller still expects its out struct.
fn shaped_err(rpc_tag: &str, err: i32) -> Vec<u8> {
	match rpc_tag {
		tag::STAT => encode(&messages::StatOut { err, db_val: Vec::new() }),
		tag::REMOVE_METADATA => encode(&messages::RmMetadataOut { err, size: 0, mode: 0 }),
		tag::GET_METADENTRY_SIZE => {
			encode(&messages::GetMetadentrySizeOut { err, ret_size: 0 })
		}
		tag::UPDATE_METADENTRY_SIZE => {
			encode(&messages::UpdateMetadentrySizeOut { err, ret_offset: 0 })
		}
		tag::WRITE | tag::READ => encode(&messages::DataOut { err, io_size: 0 }),
		tag::GET_DIRENTS | tag::GET_DIRENTS_EXTENDED => {
			encode(&messages::DirentsOut { err, dirents_count: 0 })
		}
		tag::CHUNK_STAT => encode(&messages::ChunkStatOut {
			err,
			chunk_stat: ChunkStat { chunk_size: 0, chunk_total: 0, chunk_free: 0 },
		}),
		tag::EXPAND_STATUS => encode(&messages::ExpandStatusOut { err, running: 0 }),
		tag::FS_CONFIG => encode(&messages::FsConfigOut {
			err,
			mountdir: String::new(),
			md_settings: Default::default(),
			uid: 0,
			gid: 0,
		}),
		_ => encode(&messages::ErrOut { err }),
	}
}

/// True for the surface clients talk to; these answer Busy during
/// maintenance. Malleability control and migration RPCs stay open so
/// redistribution can make progress.
fn client_facing(rpc_tag: &str) -> bool {
	!matches!(
		rpc_tag,
		tag::EXPAND_START
			| tag::EXPAND_STATUS
			| tag::EXPAND_FINALIZE
			| tag::MIGRATE_METADATA
			| tag::MIGRATE_DATA
			| tag::FS_CONFIG
	)
}

pub struct DaemonHandler {
	ctx: Arc<DaemonContext>,
}

impl DaemonHandler {
	pub fn new(ctx: Arc<DaemonContext>) -> Self {
		DaemonHandler { ctx }
	}
}

#[async_trait]
impl Handler for DaemonHandler {
	async fn handle(&self, rpc_tag: &str, body: Vec<u8>, bulk: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
		if self.ctx.in_maintenance() && client_facing(rpc_tag) {
			trace!("'{}' rejected: maintenance mode", rpc_tag);
			return (shaped_err(rpc_tag, libc::EBUSY), Vec::new());
		}

		macro_rules! with_input {
			($handler:path) => {
				match decode(&body) {
					Some(input) => $handler(&self.ctx, input).await,
					None => (shaped_err(rpc_tag, libc::EINVAL), Vec::new()),
				}
			};
		}

		match rpc_tag {
			tag::FS_CONFIG => metadata::fs_config(&self.ctx).await,
			tag::CREATE => with_input!(metadata::create),
			tag::STAT => with_input!(metadata::stat),
			tag::REMOVE_METADATA => with_input!(metadata::remove_metadata),
			tag::DECR_SIZE => with_input!(metadata::decr_size),
			tag::UPDATE_METADENTRY => with_input!(metadata::update_metadentry),
			tag::GET_METADENTRY_SIZE => with_input!(metadata::get_metadentry_size),
			tag::UPDATE_METADENTRY_SIZE => with_input!(metadata::update_metadentry_size),
			tag::GET_DIRENTS => with_input!(metadata::get_dirents),
			tag::GET_DIRENTS_EXTENDED => with_input!(metadata::get_dirents_extended),
			tag::REMOVE_DATA => with_input!(data::remove_data),
			tag::WRITE => match decode(&body) {
				Some(input) => data::write(&self.ctx, input, bulk).await,
				None => (shaped_err(rpc_tag, libc::EINVAL), Vec::new()),
			},
			tag::READ => with_input!(data::read),
			tag::TRUNCATE => with_input!(data::truncate),
			tag::CHUNK_STAT => data::chunk_stat(&self.ctx).await,
			tag::EXPAND_START => with_input!(malleability::expand_start),
			tag::EXPAND_STATUS => malleability::expand_status(&self.ctx).await,
			tag::EXPAND_FINALIZE => malleability::expand_finalize(&self.ctx).await,
			tag::MIGRATE_METADATA => with_input!(malleability::migrate_metadata),
			tag::MIGRATE_DATA => match decode(&body) {
				Some(input) => malleability::migrate_data(&self.ctx, input, bulk).await,
				None => (shaped_err(rpc_tag, libc::EINVAL), Vec::new()),
			},
			unknown => {
				warn!("request with unknown tag '{}'", unknown);
				(shaped_err(unknown, libc::EINVAL), Vec::new())
			}
		}
	}
}

// vim: ts=4
