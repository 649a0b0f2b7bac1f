//! Data forwarding: chunked write/read/truncate fan-out
//!
//! A byte range is decomposed into chunks, chunks are grouped by their
//! destination node (first-seen order, so the dispatch order is
//! deterministic), the user buffer is registered once as a bulk region,
//! and one RPC per destination carries that node's chunk ids plus the
//! gathered payload. All responses are collected before the region is
//! released, even when one of them failed.

use futures::future::join_all;
use std::collections::HashMap;

use super::forwarder::{check_err, Forwarder};
use crate::config::CHUNK_SIZE;
use crate::distributor::{Distributor, HostId};
use crate::error::FsError;
use crate::logging::*;
use crate::rpc::bulk::{ChunkLayout, ReadRegion, WriteRegion};
use crate::rpc::messages::*;

/// Chunks of the range grouped by destination, preserving first-seen
/// destination order
fn group_chunks(fwd: &Forwarder, path: &str, layout: &ChunkLayout) -> Vec<(HostId, Vec<u64>)> {
	let mut order: Vec<HostId> = Vec::new();
	let mut groups: HashMap<HostId, Vec<u64>> = HashMap::new();
	for chunk_id in layout.chunk_start()..=layout.chunk_end() {
		let target = fwd.dist.locate_data(path, chunk_id);
		match groups.get_mut(&target) {
			Some(ids) => ids.push(chunk_id),
			None => {
				order.push(target);
				groups.insert(target, vec![chunk_id]);
			}
		}
	}
	order
		.into_iter()
		.map(|target| {
			let ids = groups.remove(&target).unwrap_or_default();
			(target, ids)
		})
		.collect()
}

fn data_input(path: &str, layout: &ChunkLayout, ids: &[u64]) -> DataIn {
	DataIn {
		path: path.to_string(),
		in_offset: layout.in_offset(),
		chunk_ids: ids.to_vec(),
		chunk_start: layout.chunk_start(),
		chunk_end: layout.chunk_end(),
		total_chunk_size: layout.total_for(ids),
	}
}

impl Forwarder {
	/// Write `buf` at `offset`. Returns the bytes acknowledged by the
	/// primary copy of every destination.
	pub async fn write(&self, path: &str, buf: &[u8], offset: u64) -> Result<u64, FsError> {
		if buf.is_empty() {
			return Ok(0);
		}
		if self.via_proxy {
			let input =
				ProxyDataIn { path: path.to_string(), offset, size: buf.len() as u64 };
			let (out, _bulk): (DataOut, Vec<u8>) =
				self.rpc.call_with_bulk(0, tag::PROXY_WRITE, &input, buf.to_vec()).await?;
			check_err(out.err)?;
			return Ok(out.io_size);
		}

		let layout = ChunkLayout::new(offset, buf.len() as u64, CHUNK_SIZE);
		let region = ReadRegion::expose(buf);
		let groups = group_chunks(self, path, &layout);
		let hosts = self.dist.hosts_size() as u64;
		trace!(
			"write '{}' offset {} len {}: chunks [{}, {}] over {} destination(s)",
			path,
			offset,
			buf.len(),
			layout.chunk_start(),
			layout.chunk_end(),
			groups.len()
		);

		let mut calls = Vec::new();
		for copy in 0..=(self.num_repl as u64) {
			for (target, ids) in &groups {
				let dest = (*target + copy) % hosts;
				let input = data_input(path, &layout, ids);
				let payload = region.gather(&layout, ids);
				calls.push(async move {
					let result = self
						.rpc
						.call_with_bulk::<DataIn, DataOut>(dest, tag::WRITE, &input, payload)
						.await;
					(copy, result)
				});
			}
		}

		let mut written = 0u64;
		let mut first_err = None;
		for (copy, result) in join_all(calls).await {
			match result {
				Ok((out, _bulk)) => match check_err(out.err) {
					Ok(()) => {
						if copy == 0 {
							written += out.io_size;
						}
					}
					Err(e) => {
						first_err.get_or_insert(e);
					}
				},
				Err(e) => {
					first_err.get_or_insert(e);
				}
			}
		}
		match first_err {
			Some(e) => Err(e),
			None => Ok(written),
		}
	}

	/// Read `buf.len()` bytes at `offset` into `buf`. Ranges backed by
	/// absent chunks read as zeros; the caller is responsible for
	/// clamping at the file size.
	pub async fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<u64, FsError> {
		if buf.is_empty() {
			return Ok(0);
		}
		if self.via_proxy {
			let input =
				ProxyDataIn { path: path.to_string(), offset, size: buf.len() as u64 };
			let (out, bulk): (DataOut, Vec<u8>) =
				self.rpc.call_with_bulk(0, tag::PROXY_READ, &input, Vec::new()).await?;
			check_err(out.err)?;
			let n = std::cmp::min(bulk.len(), buf.len());
			buf[..n].copy_from_slice(&bulk[..n]);
			return Ok(out.io_size);
		}

		let layout = ChunkLayout::new(offset, buf.len() as u64, CHUNK_SIZE);
		let region = WriteRegion::expose(buf.len());
		let groups = group_chunks(self, path, &layout);
		let hosts = self.dist.hosts_size() as u64;

		let calls = groups.into_iter().map(|(target, ids)| {
			let input = data_input(path, &layout, &ids);
			let region = region.clone();
			async move {
				// prefer the primary, fail over through the successor
				// replicas, skipping replicas known bad from earlier reads
				let mut last_err = FsError::Busy;
				for copy in 0..=(self.num_repl as u64) {
					let dest = (target + copy) % hosts;
					if self.num_repl > 0 && self.replica_failed(dest) {
						continue;
					}
					match self
						.rpc
						.call_with_bulk::<DataIn, DataOut>(dest, tag::READ, &input, Vec::new())
						.await
					{
						Ok((out, bulk)) => match check_err(out.err) {
							Ok(()) => {
								region.scatter(&layout, &input.chunk_ids, &bulk);
								return Ok(out.io_size);
							}
							Err(e) => {
								if self.num_repl > 0 {
									self.mark_replica_failed(dest);
								}
								last_err = e;
							}
						},
						Err(e) => {
							if self.num_repl > 0 {
								self.mark_replica_failed(dest);
							}
							last_err = e;
						}
					}
				}
				Err(last_err)
			}
		});

		let mut read = 0u64;
		let mut first_err = None;
		for result in join_all(calls).await {
			match result {
				Ok(io_size) => read += io_size,
				Err(e) => {
					first_err.get_or_insert(e);
				}
			}
		}
		if let Some(e) = first_err {
			return Err(e);
		}
		let assembled = region.release();
		buf.copy_from_slice(&assembled);
		Ok(read)
	}

	/// Shrink the data of `path` from `current_size` to `new_size`:
	/// only nodes that can own a chunk in the truncated range are
	/// contacted. The caller has already lowered the metadata size, so
	/// no reader can see bytes beyond `new_size` during the fan-out.
	pub async fn truncate(
		&self,
		path: &str,
		current_size: u64,
		new_size: u64,
	) -> Result<(), FsError> {
		debug_assert!(new_size < current_size);
		if self.via_proxy {
			let input = ProxyTruncIn { path: path.to_string(), current_size, new_size };
			let out: ErrOut = self.rpc.call(0, tag::PROXY_TRUNCATE, &input).await?;
			return check_err(out.err);
		}

		let chunk_first = crate::arithmetic::block_index(new_size, CHUNK_SIZE);
		let chunk_last = crate::arithmetic::block_index(current_size - 1, CHUNK_SIZE);
		let hosts = self.dist.hosts_size() as u64;

		let mut targets = std::collections::BTreeSet::new();
		for chunk_id in chunk_first..=chunk_last {
			let primary = self.dist.locate_data(path, chunk_id);
			for copy in 0..=(self.num_repl as u64) {
				targets.insert((primary + copy) % hosts);
			}
		}
		trace!("truncate '{}' {} -> {}: {} node(s)", path, current_size, new_size, targets.len());

		let calls = targets.into_iter().map(|host| {
			let input = TruncDataIn { path: path.to_string(), length: new_size };
			async move { self.rpc.call::<TruncDataIn, ErrOut>(host, tag::TRUNCATE, &input).await }
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
}

// vim: ts=4
