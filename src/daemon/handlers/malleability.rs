//! Malleability control surface: expansion lifecycle and migration sinks

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::encode;
use crate::daemon::DaemonContext;
use crate::logging::*;
use crate::malleability;
use crate::rpc::messages::*;

/// Enter maintenance mode and kick off the background redistribution.
/// The hosts file has already been rewritten by the operator to include
/// the new nodes.
pub async fn expand_start(ctx: &Arc<DaemonContext>, input: ExpandStartIn) -> (Vec<u8>, Vec<u8>) {
	info!(
		"expand_start: {} -> {} daemons",
		input.old_server_conf, input.new_server_conf
	);
	if ctx.redist_running.load(Ordering::Acquire) {
		return (encode(&ErrOut { err: libc::EBUSY }), Vec::new());
	}
	ctx.maintenance.store(true, Ordering::Release);

	match malleability::prepare_expansion(ctx, input.new_server_conf as usize).await {
		Ok((peers, local_id)) => {
			ctx.redist_running.store(true, Ordering::Release);
			let ctx = ctx.clone();
			tokio::spawn(async move {
				malleability::run_expansion(ctx, peers, local_id).await;
			});
			(encode(&ErrOut::ok()), Vec::new())
		}
		Err(e) => {
			error!("expansion preparation failed: {}", e);
			ctx.maintenance.store(false, Ordering::Release);
			(encode(&ErrOut::from_err(&e)), Vec::new())
		}
	}
}

/// 1 while the local redistribution task runs, 0 once done; an
/// orchestrator polls this on every peer before finalizing
pub async fn expand_status(ctx: &DaemonContext) -> (Vec<u8>, Vec<u8>) {
	let running = if ctx.redist_running.load(Ordering::Acquire) { 1 } else { 0 };
	(encode(&ExpandStatusOut { err: 0, running }), Vec::new())
}

/// Leave maintenance mode; the new distribution is authoritative now
pub async fn expand_finalize(ctx: &DaemonContext) -> (Vec<u8>, Vec<u8>) {
	info!("expand_finalize: leaving maintenance mode");
	ctx.maintenance.store(false, Ordering::Release);
	(encode(&ErrOut::ok()), Vec::new())
}

/// Sink for a metadata record arriving from its old owner. The blob is
/// stored verbatim; only the old owner interprets record contents.
pub async fn migrate_metadata(ctx: &DaemonContext, input: MigrateMetadataIn) -> (Vec<u8>, Vec<u8>) {
	trace!("migrate_metadata '{}'", input.key);
	let out = match ctx.mdb.put_raw(&input.key, &input.value) {
		Ok(()) => ErrOut::ok(),
		Err(e) => ErrOut::from_err(&e),
	};
	(encode(&out), Vec::new())
}

/// Sink for a chunk file arriving from its old owner
pub async fn migrate_data(
	ctx: &DaemonContext,
	input: MigrateDataIn,
	bulk: Vec<u8>,
) -> (Vec<u8>, Vec<u8>) {
	trace!("migrate_data '{}' chunk {} ({} bytes)", input.path, input.chunk_id, bulk.len());
	let out = match ctx.storage.write_chunk(&input.path, input.chunk_id, 0, &bulk).await {
		Ok(_) => ErrOut::ok(),
		Err(e) => ErrOut::from_err(&e),
	};
	(encode(&out), Vec::new())
}

// vim: ts=4
