//! Online expansion: redistribution of metadata keys and data chunks
//!
//! After the operator rewrote the hosts file and broadcast
//! `expand_start`, every daemon walks its local shard and pushes each
//! record or chunk whose new owner is a different node to that owner,
//! deleting locally only after the migration RPC succeeded. In-flight
//! client traffic is held off by maintenance mode until `expand_finalize`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::daemon::DaemonContext;
use crate::distributor::{Distributor, HostId};
use crate::error::FsError;
use crate::hosts;
use crate::logging::*;
use crate::rpc::messages::{tag, ErrOut, MigrateDataIn, MigrateMetadataIn};
use crate::rpc::RpcClient;

/// Reload the rewritten hosts file, connect to all peers and swap the
/// distributor over to the new cluster size. Returns the peer client and
/// this daemon's id under the new sort order.
pub async fn prepare_expansion(
	ctx: &Arc<DaemonContext>,
	new_server_conf: usize,
) -> Result<(Arc<RpcClient>, HostId), FsError> {
	let entries = hosts::load(&ctx.settings.hosts_file)?;
	if entries.len() != new_server_conf {
		return Err(FsError::invalid(format!(
			"hosts file holds {} entries but new server configuration is {}",
			entries.len(),
			new_server_conf
		)));
	}
	let local_id = hosts::local_id(&entries, &ctx.local_name)?;

	let uris: Vec<String> = entries.iter().map(|e| e.daemon_uri.clone()).collect();
	let peers = Arc::new(RpcClient::connect(&uris).await?);
	{
		let mut guard = ctx.peers.lock().await;
		*guard = Some(peers.clone());
	}
	ctx.distributor.set_hosts_size(entries.len());
	info!(
		"expansion prepared: {} daemons, local id {}",
		entries.len(),
		local_id
	);
	Ok((peers, local_id))
}

/// Background redistribution task. Clears `redist_running` when done;
/// individual migration failures are logged and skipped so one bad peer
/// does not wedge the whole expansion.
pub async fn run_expansion(ctx: Arc<DaemonContext>, peers: Arc<RpcClient>, local_id: HostId) {
	info!("starting expansion process");
	let meta_errors = redistribute_metadata(&ctx, &peers, local_id).await;
	let data_errors = redistribute_data(&ctx, &peers, local_id).await;
	ctx.redist_running.store(false, Ordering::Release);
	if meta_errors + data_errors > 0 {
		error!(
			"expansion finished with {} metadata and {} data migration failures",
			meta_errors, data_errors
		);
	} else {
		info!("expansion process successfully finished");
	}
}

async fn redistribute_metadata(
	ctx: &DaemonContext,
	peers: &RpcClient,
	local_id: HostId,
) -> usize {
	let records = match ctx.mdb.iterate_all() {
		Ok(records) => records,
		Err(e) => {
			error!("failed to iterate metadata shard: {}", e);
			return 1;
		}
	};
	info!("metadata redistribution over {} records", records.len());
	let mut errors = 0usize;
	for (key, value) in records {
		// the root entry exists on every daemon and never moves
		if key == "/" {
			continue;
		}
		let dest = ctx.distributor.locate_file_metadata(&key);
		if dest == local_id {
			continue;
		}
		trace!("migrating metadata '{}' to host {}", key, dest);
		let migrated: Result<ErrOut, FsError> = peers
			.call(dest, tag::MIGRATE_METADATA, &MigrateMetadataIn { key: key.clone(), value })
			.await;
		match migrated {
			Ok(out) if out.err == 0 => {
				if let Err(e) = ctx.mdb.remove_raw(&key) {
					error!("failed to drop migrated key '{}': {}", key, e);
					errors += 1;
				}
			}
			Ok(out) => {
				error!("peer {} rejected metadata '{}': errno {}", dest, key, out.err);
				errors += 1;
			}
			Err(e) => {
				error!("failed to migrate metadata '{}': {}", key, e);
				errors += 1;
			}
		}
	}
	info!("metadata redistribution completed");
	errors
}

async fn redistribute_data(ctx: &DaemonContext, peers: &RpcClient, local_id: HostId) -> usize {
	let chunks = match ctx.storage.iterate_all_chunks().await {
		Ok(chunks) => chunks,
		Err(e) => {
			error!("failed to iterate chunk storage: {}", e);
			return 1;
		}
	};
	info!("data redistribution over {} chunk files", chunks.len());
	let mut errors = 0usize;
	for chunk in chunks {
		let dest = ctx.distributor.locate_data(&chunk.path, chunk.chunk_id);
		if dest == local_id {
			continue;
		}
		trace!(
			"migrating chunk {} of '{}' ({} bytes) to host {}",
			chunk.chunk_id,
			chunk.path,
			chunk.size,
			dest
		);
		let data = match ctx
			.storage
			.read_chunk(&chunk.path, chunk.chunk_id, 0, chunk.size as usize)
			.await
		{
			Ok(data) => data,
			Err(e) => {
				error!("failed to read chunk {} of '{}': {}", chunk.chunk_id, chunk.path, e);
				errors += 1;
				continue;
			}
		};
		let migrated: Result<(ErrOut, Vec<u8>), FsError> = peers
			.call_with_bulk(
				dest,
				tag::MIGRATE_DATA,
				&MigrateDataIn { path: chunk.path.clone(), chunk_id: chunk.chunk_id },
				data,
			)
			.await;
		match migrated {
			Ok((out, _)) if out.err == 0 => {
				// delete only after the new owner acknowledged the bytes
				if let Err(e) = ctx.storage.remove_chunk(&chunk.path, chunk.chunk_id).await {
					error!(
						"failed to drop migrated chunk {} of '{}': {}",
						chunk.chunk_id, chunk.path, e
					);
					errors += 1;
				}
			}
			Ok((out, _)) => {
				error!(
					"peer {} rejected chunk {} of '{}': errno {}",
					dest, chunk.chunk_id, chunk.path, out.err
				);
				errors += 1;
			}
			Err(e) => {
				error!("failed to migrate chunk {} of '{}': {}", chunk.chunk_id, chunk.path, e);
				errors += 1;
			}
		}
	}
	info!("data redistribution completed");
	errors
}

// vim: ts=4
