//! Error types for BurstFS operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type surfaced by client operations and daemon handlers
///
/// Variants map 1:1 onto the errno values transported in RPC responses,
/// so an error can make a round trip through the wire without losing its
/// kind. `Invalid` and `Io` carry a message for logging; the message is
/// not transported.
#[derive(Debug)]
pub enum FsError {
	/// Missing path, or a chunk absent on read that must signal EOF
	NotFound,

	/// Create collision on an existing key
	Exists,

	/// Directory removal against a populated directory
	NotEmpty,

	/// Malformed path, out-of-mount path, bad flags
	Invalid { message: String },

	/// Transport or storage failure
	Io { message: String },

	/// RPC retries exhausted or peer in maintenance mode
	Busy,

	/// Local storage full
	NoSpace,
}

impl FsError {
	pub fn invalid<S: Into<String>>(message: S) -> Self {
		FsError::Invalid { message: message.into() }
	}

	pub fn io<S: Into<String>>(message: S) -> Self {
		FsError::Io { message: message.into() }
	}

	/// Errno representation used in RPC response headers
	pub fn to_errno(&self) -> i32 {
		match self {
			FsError::NotFound => libc::ENOENT,
			FsError::Exists => libc::EEXIST,
			FsError::NotEmpty => libc::ENOTEMPTY,
			FsError::Invalid { .. } => libc::EINVAL,
			FsError::Io { .. } => libc::EIO,
			FsError::Busy => libc::EBUSY,
			FsError::NoSpace => libc::ENOSPC,
		}
	}

	/// Reconstruct an error from a non-zero RPC errno
	pub fn from_errno(err: i32) -> Self {
		match err {
			x if x == libc::ENOENT => FsError::NotFound,
			x if x == libc::EEXIST => FsError::Exists,
			x if x == libc::ENOTEMPTY => FsError::NotEmpty,
			x if x == libc::EINVAL => FsError::Invalid { message: String::new() },
			x if x == libc::EBUSY => FsError::Busy,
			x if x == libc::ENOSPC => FsError::NoSpace,
			_ => FsError::Io { message: format!("remote errno {}", err) },
		}
	}
}

impl fmt::Display for FsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FsError::NotFound => write!(f, "No such file or directory"),
			FsError::Exists => write!(f, "File exists"),
			FsError::NotEmpty => write!(f, "Directory not empty"),
			FsError::Invalid { message } => write!(f, "Invalid argument: {}", message),
			FsError::Io { message } => write!(f, "I/O error: {}", message),
			FsError::Busy => write!(f, "Resource busy or unavailable"),
			FsError::NoSpace => write!(f, "No space left on device"),
		}
	}
}

impl Error for FsError {}

impl From<io::Error> for FsError {
	fn from(e: io::Error) -> Self {
		match e.kind() {
			io::ErrorKind::NotFound => FsError::NotFound,
			io::ErrorKind::AlreadyExists => FsError::Exists,
			_ => {
				if e.raw_os_error() == Some(libc::ENOSPC) {
					FsError::NoSpace
				} else {
					FsError::Io { message: e.to_string() }
				}
			}
		}
	}
}

impl From<KvError> for FsError {
	fn from(e: KvError) -> Self {
		match e {
			KvError::NotFound => FsError::NotFound,
			KvError::Exists => FsError::Exists,
			other => FsError::Io { message: other.to_string() },
		}
	}
}

/// Errors produced by the key-value store backends
///
/// "not found" is a first-class result for the metadata adapter, so it is
/// a distinct variant rather than being folded into `Backend`.
#[derive(Debug)]
pub enum KvError {
	/// Key absent
	NotFound,

	/// Key already present on an exclusive insert
	Exists,

	/// Failure opening the database
	OpenFailed { message: String },

	/// Any other backend failure
	Backend { message: String },
}

impl KvError {
	pub fn backend<E: fmt::Display>(e: E) -> Self {
		KvError::Backend { message: e.to_string() }
	}
}

impl fmt::Display for KvError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KvError::NotFound => write!(f, "key not found"),
			KvError::Exists => write!(f, "key already exists"),
			KvError::OpenFailed { message } => write!(f, "failed to open database: {}", message),
			KvError::Backend { message } => write!(f, "database error: {}", message),
		}
	}
}

impl Error for KvError {}

/// Errors produced while loading or publishing the hosts file
#[derive(Debug)]
pub enum HostsError {
	/// Hosts file missing or unreadable
	Unreadable { path: String, source: io::Error },

	/// A line did not match `<hostname> <uri> [proxy_uri]`
	MalformedLine { line: String },

	/// File parsed but contained no usable entries
	Empty { path: String },

	/// The daemon could not observe its own registration
	SelfNotFound { host: String },
}

impl fmt::Display for HostsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			HostsError::Unreadable { path, source } => {
				write!(f, "failed to read hosts file '{}': {}", path, source)
			}
			HostsError::MalformedLine { line } => {
				write!(f, "unrecognized hosts file line: '{}'", line)
			}
			HostsError::Empty { path } => {
				write!(f, "hosts file '{}' contains no entries", path)
			}
			HostsError::SelfNotFound { host } => {
				write!(f, "local host '{}' not found in hosts file", host)
			}
		}
	}
}

impl Error for HostsError {}

impl From<HostsError> for FsError {
	fn from(e: HostsError) -> Self {
		FsError::Io { message: e.to_string() }
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_errno_round_trip() {
		let kinds = vec![
			FsError::NotFound,
			FsError::Exists,
			FsError::NotEmpty,
			FsError::Invalid { message: String::new() },
			FsError::Busy,
			FsError::NoSpace,
		];
		for e in kinds {
			let errno = e.to_errno();
			assert_ne!(errno, 0);
			let back = FsError::from_errno(errno);
			assert_eq!(back.to_errno(), errno);
		}
	}

	#[test]
	fn test_io_error_conversion() {
		let e = io::Error::new(io::ErrorKind::NotFound, "gone");
		assert!(matches!(FsError::from(e), FsError::NotFound));

		let e = io::Error::from_raw_os_error(libc::ENOSPC);
		assert!(matches!(FsError::from(e), FsError::NoSpace));
	}
}

// vim: ts=4
