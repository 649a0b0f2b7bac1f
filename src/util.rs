//! Process- and node-level helpers the personalities share
//!
//! Fresh metadata records carry the daemon's credentials, the hosts
//! registry keys entries by the node's hostname, and the distributor
//! needs one stable 64-bit hash. The raw libc calls behind these live
//! here so the rest of the crate stays free of unsafe blocks.
#![allow(dead_code)]

/// Effective uid of this process, stamped into new metadata records
#[allow(unsafe_code)]
pub fn get_effective_uid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: geteuid cannot fail, takes no pointers and has no
		// side effects.
		unsafe { libc::geteuid() }
	}

	#[cfg(not(unix))]
	{
		1000
	}
}

/// Effective gid of this process, stamped into new metadata records
#[allow(unsafe_code)]
pub fn get_effective_gid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: getegid cannot fail, takes no pointers and has no
		// side effects.
		unsafe { libc::getegid() }
	}

	#[cfg(not(unix))]
	{
		1000
	}
}

/// Hostname of the local node, used to find our own hosts file entry
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn get_hostname() -> String {
	#[cfg(unix)]
	{
		let mut buf = [0u8; 256];
		// SAFETY: the buffer outlives the call and its length is passed
		// alongside; gethostname NUL-terminates on success.
		let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
		if rc == 0 {
			let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
			return String::from_utf8_lossy(&buf[..end]).into_owned();
		}
		"localhost".to_string()
	}

	#[cfg(not(unix))]
	{
		"localhost".to_string()
	}
}

/// Seconds since the epoch, for the metadata time fields
pub fn time_now() -> i64 {
	match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
		Ok(d) => d.as_secs() as i64,
		Err(_) => 0,
	}
}

/// Check whether a process with the given pid is alive (used by the
/// proxy pidfile check)
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn process_alive(pid: i32) -> bool {
	#[cfg(unix)]
	{
		// SAFETY: kill with signal 0 performs error checking only and
		// never delivers a signal.
		unsafe { libc::kill(pid, 0) == 0 }
	}

	#[cfg(not(unix))]
	{
		false
	}
}

/// Truncated BLAKE3 of an arbitrary byte string, used as the stable
/// 64-bit distribution hash. Stable across processes and architectures.
pub fn hash64(buf: &[u8]) -> u64 {
	let hash = blake3::hash(buf);
	let bytes = hash.as_bytes();
	u64::from_le_bytes([
		bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
	])
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_hash64_deterministic() {
		let a = hash64(b"/some/path");
		let b = hash64(b"/some/path");
		assert_eq!(a, b);
	}

	#[test]
	fn test_hash64_spread() {
		let a = hash64(b"/a");
		let b = hash64(b"/b");
		assert_ne!(a, b);
	}

	#[test]
	fn test_time_now_positive() {
		assert!(time_now() > 0);
	}

	#[test]
	fn test_hostname_nonempty() {
		assert!(!get_hostname().is_empty());
	}
}

// vim: ts=4
