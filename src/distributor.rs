//! Mapping of paths and chunks onto daemon ids
//!
//! The distributor is the one piece of logic that every personality
//! (client, proxy, daemon) must agree on: given the same hosts count,
//! the same path and chunk id must land on the same node id everywhere.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::util::hash64;

/// Stable daemon id: the position of the daemon's hosts file entry after
/// lexicographic sorting
pub type HostId = u64;

/// Placement capability shared by client, proxy and daemon
pub trait Distributor: Send + Sync {
	/// Id of the local daemon; meaningless (0) on pure clients
	fn localhost(&self) -> HostId;

	/// Owner of a path's metadata entry
	fn locate_file_metadata(&self, path: &str) -> HostId;

	/// Owner of one data chunk of a path
	fn locate_data(&self, path: &str, chunk_id: u64) -> HostId;

	/// All ids that hold a metadata shard; used by operations that must
	/// touch every shard (readdir sweep, expansion)
	fn locate_directory_metadata(&self) -> Vec<HostId>;

	/// Current cluster size
	fn hosts_size(&self) -> usize;

	/// Swap the cluster size; only the malleability controller calls
	/// this, after all daemons entered maintenance mode
	fn set_hosts_size(&self, n: usize);
}

/// Default strategy: stable hash modulo hosts count
pub struct SimpleHashDistributor {
	localhost: HostId,
	hosts_size: AtomicUsize,
}

impl SimpleHashDistributor {
	pub fn new(localhost: HostId, hosts_size: usize) -> Self {
		debug_assert!(hosts_size > 0);
		SimpleHashDistributor { localhost, hosts_size: AtomicUsize::new(hosts_size) }
	}
}

impl Distributor for SimpleHashDistributor {
	fn localhost(&self) -> HostId {
		self.localhost
	}

	fn locate_file_metadata(&self, path: &str) -> HostId {
		hash64(path.as_bytes()) % self.hosts_size.load(Ordering::Acquire) as u64
	}

	fn locate_data(&self, path: &str, chunk_id: u64) -> HostId {
		let mut buf = Vec::with_capacity(path.len() + 8);
		buf.extend_from_slice(path.as_bytes());
		buf.extend_from_slice(&chunk_id.to_le_bytes());
		hash64(&buf) % self.hosts_size.load(Ordering::Acquire) as u64
	}

	fn locate_directory_metadata(&self) -> Vec<HostId> {
		(0..self.hosts_size.load(Ordering::Acquire) as u64).collect()
	}

	fn hosts_size(&self) -> usize {
		self.hosts_size.load(Ordering::Acquire)
	}

	fn set_hosts_size(&self, n: usize) {
		debug_assert!(n > 0);
		self.hosts_size.store(n, Ordering::Release);
	}
}

/// I/O forwarding strategy: every operation goes to one configured host.
///
/// The target id comes from a per-client forwarding map file and may be
/// rewritten at runtime; a background task reloads it every few seconds
/// and calls [`ForwardingDistributor::set_fwd_host`].
pub struct ForwardingDistributor {
	fwd_host: AtomicU64,
	hosts_size: AtomicUsize,
}

impl ForwardingDistributor {
	pub fn new(fwd_host: HostId, hosts_size: usize) -> Self {
		debug_assert!(hosts_size > 0);
		ForwardingDistributor {
			fwd_host: AtomicU64::new(fwd_host),
			hosts_size: AtomicUsize::new(hosts_size),
		}
	}

	pub fn set_fwd_host(&self, id: HostId) {
		self.fwd_host.store(id, Ordering::Release);
	}

	pub fn fwd_host(&self) -> HostId {
		self.fwd_host.load(Ordering::Acquire)
	}
}

impl Distributor for ForwardingDistributor {
	fn localhost(&self) -> HostId {
		self.fwd_host.load(Ordering::Acquire)
	}

	fn locate_file_metadata(&self, _path: &str) -> HostId {
		self.fwd_host.load(Ordering::Acquire)
	}

	fn locate_data(&self, _path: &str, _chunk_id: u64) -> HostId {
		self.fwd_host.load(Ordering::Acquire)
	}

	fn locate_directory_metadata(&self) -> Vec<HostId> {
		(0..self.hosts_size.load(Ordering::Acquire) as u64).collect()
	}

	fn hosts_size(&self) -> usize {
		self.hosts_size.load(Ordering::Acquire)
	}

	fn set_hosts_size(&self, n: usize) {
		debug_assert!(n > 0);
		self.hosts_size.store(n, Ordering::Release);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_ids_in_range() {
		for n in 1..17usize {
			let d = SimpleHashDistributor::new(0, n);
			for path in ["/", "/a", "/a/b", "/file with spaces", "/x/y/z/w"].iter() {
				assert!((d.locate_file_metadata(path) as usize) < n);
				for c in 0..64u64 {
					assert!((d.locate_data(path, c) as usize) < n);
				}
			}
		}
	}

	#[test]
	fn test_stable_across_instances() {
		let a = SimpleHashDistributor::new(0, 7);
		let b = SimpleHashDistributor::new(3, 7);
		assert_eq!(a.locate_file_metadata("/data/out.bin"), b.locate_file_metadata("/data/out.bin"));
		assert_eq!(a.locate_data("/data/out.bin", 9), b.locate_data("/data/out.bin", 9));
	}

	#[test]
	fn test_chunks_spread() {
		// different chunks of one file must not all land on one node
		let d = SimpleHashDistributor::new(0, 4);
		let mut seen = std::collections::BTreeSet::new();
		for c in 0..256u64 {
			seen.insert(d.locate_data("/big", c));
		}
		assert!(seen.len() > 1);
	}

	#[test]
	fn test_directory_metadata_covers_all() {
		let d = SimpleHashDistributor::new(0, 5);
		assert_eq!(d.locate_directory_metadata(), vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn test_forwarding_pins_host() {
		let d = ForwardingDistributor::new(2, 4);
		assert_eq!(d.locate_file_metadata("/a"), 2);
		assert_eq!(d.locate_data("/a", 77), 2);
		d.set_fwd_host(3);
		assert_eq!(d.locate_data("/a", 77), 3);
	}
}

// vim: ts=4
