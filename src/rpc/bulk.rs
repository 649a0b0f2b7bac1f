//! Registered memory regions and the chunk layout arithmetic
//!
//! A bulk region models the one-sided transfer capability of the RPC
//! layer: the creator registers a buffer once, hands the capability to
//! one or more in-flight calls, and releases it after the last response
//! arrived. PULL gathers a destination's chunk segments out of a
//! read-only region at send time; PUSH scatters response payloads back
//! into a write-only region at completion time.
//!
//! [`ChunkLayout`] is the single source of truth for how a byte range
//! decomposes into per-chunk segments. The daemon derives the same
//! lengths from `(in_offset, chunk_start, chunk_end, total_chunk_size)`,
//! so both sides agree byte-for-byte.

use bytes::Bytes;
use std::sync::{Arc, Mutex};

use crate::arithmetic::{block_index, block_overrun};

/// Decomposition of the byte range `[offset, offset + size)` into
/// chunk-sized segments
#[derive(Debug, Clone, Copy)]
pub struct ChunkLayout {
	pub offset: u64,
	pub size: u64,
	pub chunk_size: u64,
}

impl ChunkLayout {
	pub fn new(offset: u64, size: u64, chunk_size: u64) -> Self {
		debug_assert!(size > 0);
		ChunkLayout { offset, size, chunk_size }
	}

	/// First chunk touched by the range
	pub fn chunk_start(&self) -> u64 {
		block_index(self.offset, self.chunk_size)
	}

	/// Last chunk touched by the range (inclusive)
	pub fn chunk_end(&self) -> u64 {
		block_index(self.offset + self.size - 1, self.chunk_size)
	}

	/// Offset within the first chunk
	pub fn in_offset(&self) -> u64 {
		block_overrun(self.offset, self.chunk_size)
	}

	/// For one chunk of the range: `(origin, len)` where `origin` is the
	/// segment's position relative to the start of the range and `len`
	/// its length in bytes
	pub fn segment(&self, chunk_id: u64) -> (u64, u64) {
		debug_assert!(chunk_id >= self.chunk_start() && chunk_id <= self.chunk_end());
		let begin = std::cmp::max(self.offset, chunk_id * self.chunk_size);
		let end = std::cmp::min(self.offset + self.size, (chunk_id + 1) * self.chunk_size);
		(begin - self.offset, end - begin)
	}

	/// Payload bytes a destination owning `chunk_ids` will see
	pub fn total_for(&self, chunk_ids: &[u64]) -> u64 {
		chunk_ids.iter().map(|c| self.segment(*c).1).sum()
	}
}

/// Read-only registered region: the peer PULLs from it
#[derive(Clone)]
pub struct ReadRegion {
	data: Bytes,
}

impl ReadRegion {
	/// Register the caller's buffer. One copy happens here; all
	/// per-destination gathers afterwards are cheap slices.
	pub fn expose(buf: &[u8]) -> Self {
		ReadRegion { data: Bytes::copy_from_slice(buf) }
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Gather the segments of `chunk_ids` (ascending) into one
	/// destination payload
	pub fn gather(&self, layout: &ChunkLayout, chunk_ids: &[u64]) -> Vec<u8> {
		let mut out = Vec::with_capacity(layout.total_for(chunk_ids) as usize);
		for chunk_id in chunk_ids {
			let (origin, len) = layout.segment(*chunk_id);
			out.extend_from_slice(&self.data[origin as usize..(origin + len) as usize]);
		}
		out
	}
}

/// Write-only registered region: the peer PUSHes into it
#[derive(Clone)]
pub struct WriteRegion {
	data: Arc<Mutex<Vec<u8>>>,
}

impl WriteRegion {
	pub fn expose(len: usize) -> Self {
		WriteRegion { data: Arc::new(Mutex::new(vec![0u8; len])) }
	}

	/// Scatter a destination's response payload back into the region.
	/// A short payload fills what it covers; the rest of the region
	/// keeps its zero fill (sparse reads).
	pub fn scatter(&self, layout: &ChunkLayout, chunk_ids: &[u64], payload: &[u8]) {
		let mut data = match self.data.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		let mut consumed = 0usize;
		for chunk_id in chunk_ids {
			let (origin, len) = layout.segment(*chunk_id);
			let avail = std::cmp::min(len as usize, payload.len() - consumed);
			if avail == 0 {
				break;
			}
			data[origin as usize..origin as usize + avail]
				.copy_from_slice(&payload[consumed..consumed + avail]);
			consumed += avail;
		}
	}

	/// Release the region and take the assembled bytes. Callers must do
	/// this only after every RPC holding the capability has returned.
	pub fn release(self) -> Vec<u8> {
		match Arc::try_unwrap(self.data) {
			Ok(mutex) => match mutex.into_inner() {
				Ok(data) => data,
				Err(poisoned) => poisoned.into_inner(),
			},
			Err(arc) => {
				// a clone is still alive; fall back to copying
				match arc.lock() {
					Ok(guard) => guard.clone(),
					Err(poisoned) => poisoned.into_inner().clone(),
				}
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_layout_single_chunk() {
		let l = ChunkLayout::new(100, 50, 1024);
		assert_eq!(l.chunk_start(), 0);
		assert_eq!(l.chunk_end(), 0);
		assert_eq!(l.in_offset(), 100);
		assert_eq!(l.segment(0), (0, 50));
		assert_eq!(l.total_for(&[0]), 50);
	}

	#[test]
	fn test_layout_spanning_chunks() {
		// offset 512, size 2048, S=1024: chunks 0..=2
		let l = ChunkLayout::new(512, 2048, 1024);
		assert_eq!(l.chunk_start(), 0);
		assert_eq!(l.chunk_end(), 2);
		assert_eq!(l.in_offset(), 512);
		assert_eq!(l.segment(0), (0, 512));
		assert_eq!(l.segment(1), (512, 1024));
		assert_eq!(l.segment(2), (1536, 512));
		assert_eq!(l.total_for(&[0, 2]), 1024);
		assert_eq!(l.total_for(&[1]), 1024);
	}

	#[test]
	fn test_layout_aligned_tail() {
		let l = ChunkLayout::new(0, 2048, 1024);
		assert_eq!(l.chunk_end(), 1);
		assert_eq!(l.segment(1), (1024, 1024));
	}

	#[test]
	fn test_gather_scatter_round_trip() {
		let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
		let l = ChunkLayout::new(512, 2048, 1024);

		let read = ReadRegion::expose(&payload);
		let for_a = read.gather(&l, &[0, 2]);
		let for_b = read.gather(&l, &[1]);
		assert_eq!(for_a.len(), 1024);
		assert_eq!(for_b.len(), 1024);

		let write = WriteRegion::expose(2048);
		write.scatter(&l, &[0, 2], &for_a);
		write.scatter(&l, &[1], &for_b);
		assert_eq!(write.release(), payload);
	}

	#[test]
	fn test_scatter_short_payload_leaves_zeros() {
		let l = ChunkLayout::new(0, 100, 1024);
		let write = WriteRegion::expose(100);
		write.scatter(&l, &[0], b"abc");
		let out = write.release();
		assert_eq!(&out[..3], b"abc");
		assert!(out[3..].iter().all(|&b| b == 0));
	}
}

// vim: ts=4
