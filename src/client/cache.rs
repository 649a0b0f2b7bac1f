//! Client-side caches: dentry cache and write-size coalescing
//!
//! Both are pure optimizations; the file system is behavior-preserving
//! with either disabled, which is why each can be switched off through
//! the client settings.

use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::metadata::DirEntry;

/// TTL-bounded cache of directory listings, keyed by parent path.
/// Invalidated on create and remove under the parent; the TTL bounds
/// staleness caused by other clients mutating the namespace.
pub struct DentryCache {
	cache: Option<Cache<String, Arc<Vec<DirEntry>>>>,
}

impl DentryCache {
	/// A zero TTL disables the cache entirely
	pub fn new(ttl: Duration, capacity: u64) -> Self {
		if ttl.is_zero() {
			return DentryCache { cache: None };
		}
		let cache = Cache::builder().max_capacity(capacity).time_to_live(ttl).build();
		DentryCache { cache: Some(cache) }
	}

	pub fn get(&self, parent: &str) -> Option<Arc<Vec<DirEntry>>> {
		self.cache.as_ref()?.get(parent)
	}

	pub fn put(&self, parent: &str, entries: Vec<DirEntry>) {
		if let Some(cache) = &self.cache {
			cache.insert(parent.to_string(), Arc::new(entries));
		}
	}

	pub fn invalidate(&self, parent: &str) {
		if let Some(cache) = &self.cache {
			cache.invalidate(parent);
		}
	}
}

#[derive(Debug, Default, Clone, Copy)]
struct PendingSize {
	updates: u32,
	max_extent: u64,
}

/// Coalesces non-append size updates: instead of one metadata RPC per
/// write, the maximum extent is accumulated and flushed every
/// `threshold` updates. Must also be flushed on close, fsync and before
/// any read or stat of the file.
pub struct WriteSizeCache {
	enabled: bool,
	threshold: u32,
	pending: Mutex<HashMap<String, PendingSize>>,
}

impl WriteSizeCache {
	pub fn new(enabled: bool, threshold: u32) -> Self {
		WriteSizeCache { enabled, threshold: threshold.max(1), pending: Mutex::new(HashMap::new()) }
	}

	pub fn enabled(&self) -> bool {
		self.enabled
	}

	/// Record one write extent. Returns the accumulated extent when the
	/// update counter hit the threshold - the caller must then push that
	/// extent to the metadata owner.
	pub fn record(&self, path: &str, extent: u64) -> Option<u64> {
		if !self.enabled {
			return Some(extent);
		}
		let mut pending = match self.pending.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		let entry = pending.entry(path.to_string()).or_insert_with(PendingSize::default);
		entry.updates += 1;
		entry.max_extent = entry.max_extent.max(extent);
		if entry.updates >= self.threshold {
			let extent = entry.max_extent;
			pending.remove(path);
			return Some(extent);
		}
		None
	}

	/// Remove and return the pending extent for `path`, if any
	pub fn take(&self, path: &str) -> Option<u64> {
		if !self.enabled {
			return None;
		}
		let mut pending = match self.pending.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		pending.remove(path).map(|p| p.max_extent)
	}

	/// Drain everything; used on client teardown
	pub fn take_all(&self) -> Vec<(String, u64)> {
		if !self.enabled {
			return Vec::new();
		}
		let mut pending = match self.pending.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		pending.drain().map(|(path, p)| (path, p.max_extent)).collect()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn entry(name: &str) -> DirEntry {
		DirEntry { name: name.to_string(), is_dir: false, size: 0, ctime: 0 }
	}

	#[test]
	fn test_dentry_cache_hit_and_invalidate() {
		let cache = DentryCache::new(Duration::from_secs(60), 1024);
		assert!(cache.get("/d").is_none());
		cache.put("/d", vec![entry("a")]);
		assert_eq!(cache.get("/d").unwrap()[0].name, "a");
		cache.invalidate("/d");
		assert!(cache.get("/d").is_none());
	}

	#[test]
	fn test_dentry_cache_disabled_by_zero_ttl() {
		let cache = DentryCache::new(Duration::ZERO, 1024);
		cache.put("/d", vec![entry("a")]);
		assert!(cache.get("/d").is_none());
	}

	#[test]
	fn test_write_size_cache_coalesces() {
		let cache = WriteSizeCache::new(true, 3);
		assert_eq!(cache.record("/f", 100), None);
		assert_eq!(cache.record("/f", 50), None);
		// third update flushes with the maximum extent seen
		assert_eq!(cache.record("/f", 80), Some(100));
		// counter restarted
		assert_eq!(cache.record("/f", 10), None);
		assert_eq!(cache.take("/f"), Some(10));
		assert_eq!(cache.take("/f"), None);
	}

	#[test]
	fn test_write_size_cache_disabled_passes_through() {
		let cache = WriteSizeCache::new(false, 3);
		assert_eq!(cache.record("/f", 100), Some(100));
		assert_eq!(cache.take("/f"), None);
	}
}

// vim: ts=4
