//! Cluster membership via the shared hosts file
//!
//! One record per line: `<hostname>[#suffix]  <daemon_uri>  [proxy_uri]`.
//! Lines starting with `#` are skipped. Entries are sorted
//! lexicographically by `hostname[#suffix]` before ids are assigned, so
//! every process derives the same id for the same daemon.
//!
//! The file lives on a shared mount and is written by every daemon at
//! startup, so registration appends with a single O_APPEND write and then
//! re-reads until the daemon observes its own line.

use rand::Rng;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::config;
use crate::distributor::HostId;
use crate::error::HostsError;
use crate::logging::*;

/// One parsed hosts file record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
	/// Sort key: `hostname[#suffix]` exactly as registered
	pub name: String,

	/// Hostname with any `#suffix` stripped
	pub hostname: String,

	/// Daemon RPC endpoint, e.g. `tcp://node1:4433`
	pub daemon_uri: String,

	/// Optional co-located proxy endpoint
	pub proxy_uri: Option<String>,
}

impl HostEntry {
	/// Id of this entry within a sorted entry list
	pub fn id_in(&self, entries: &[HostEntry]) -> Option<HostId> {
		entries.iter().position(|e| e.name == self.name).map(|p| p as HostId)
	}
}

/// Parse hosts file contents. The result is sorted by `name`; the index
/// into the returned vector is the host id.
pub fn parse(contents: &str) -> Result<Vec<HostEntry>, HostsError> {
	let mut entries = Vec::new();
	for line in contents.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		let mut fields = trimmed.split_whitespace();
		let name = fields.next();
		let daemon_uri = fields.next();
		let proxy_uri = fields.next();
		match (name, daemon_uri) {
			(Some(name), Some(daemon_uri)) => {
				let hostname = match name.find('#') {
					Some(idx) => name[..idx].to_string(),
					None => name.to_string(),
				};
				entries.push(HostEntry {
					name: name.to_string(),
					hostname,
					daemon_uri: daemon_uri.to_string(),
					proxy_uri: proxy_uri.map(|s| s.to_string()),
				});
			}
			_ => return Err(HostsError::MalformedLine { line: trimmed.to_string() }),
		}
	}
	// sort so that data always hashes to the same place; a registration
	// retried after a lost read-back may have appended its line twice
	entries.sort_by(|a, b| a.name.cmp(&b.name));
	entries.dedup_by(|a, b| a.name == b.name);
	Ok(entries)
}

/// Load and parse the hosts file
pub fn load(path: &Path) -> Result<Vec<HostEntry>, HostsError> {
	let contents = std::fs::read_to_string(path).map_err(|e| HostsError::Unreadable {
		path: path.display().to_string(),
		source: e,
	})?;
	let entries = parse(&contents)?;
	if entries.is_empty() {
		return Err(HostsError::Empty { path: path.display().to_string() });
	}
	Ok(entries)
}

/// Retry wrapper around [`load`] for clients that may start before the
/// daemons have finished registering
pub async fn load_with_retries(path: &Path, tries: usize) -> Result<Vec<HostEntry>, HostsError> {
	let mut attempt = 0;
	loop {
		match load(path) {
			Ok(entries) => return Ok(entries),
			Err(e) => {
				attempt += 1;
				if attempt >= tries {
					return Err(e);
				}
				tokio::time::sleep(backoff()).await;
			}
		}
	}
}

/// Append the local daemon's record and wait until the appended line is
/// observable. Peers may write concurrently; O_APPEND keeps each record
/// on its own line and the read-back detects lost writes.
pub fn register(
	path: &Path,
	name: &str,
	daemon_uri: &str,
	proxy_uri: Option<&str>,
) -> Result<(), HostsError> {
	let line = match proxy_uri {
		Some(proxy) => format!("{} {} {}\n", name, daemon_uri, proxy),
		None => format!("{} {}\n", name, daemon_uri),
	};

	for attempt in 0..config::HOSTS_REREAD_TRIES {
		let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
			HostsError::Unreadable { path: path.display().to_string(), source: e }
		})?;
		file.write_all(line.as_bytes()).map_err(|e| HostsError::Unreadable {
			path: path.display().to_string(),
			source: e,
		})?;
		drop(file);

		let contents = std::fs::read_to_string(path).map_err(|e| HostsError::Unreadable {
			path: path.display().to_string(),
			source: e,
		})?;
		if contents.lines().any(|l| l.trim() == line.trim()) {
			debug!("registered '{}' in hosts file after {} attempt(s)", name, attempt + 1);
			return Ok(());
		}
		warn!("own hosts file line not observable yet, retrying");
		std::thread::sleep(backoff());
	}
	Err(HostsError::SelfNotFound { host: name.to_string() })
}

/// Remove the whole hosts file. Called on daemon shutdown: with one
/// member gone the remaining distribution would be wrong anyway.
pub fn unregister(path: &Path) {
	match std::fs::remove_file(path) {
		Ok(()) => info!("removed hosts file {}", path.display()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
		Err(e) => warn!("failed to remove hosts file {}: {}", path.display(), e),
	}
}

/// Find the id of the entry registered under `name`
pub fn local_id(entries: &[HostEntry], name: &str) -> Result<HostId, HostsError> {
	entries
		.iter()
		.position(|e| e.name == name)
		.map(|p| p as HostId)
		.ok_or_else(|| HostsError::SelfNotFound { host: name.to_string() })
}

/// Strip the transport scheme from a URI, leaving a socket address
pub fn socket_addr(uri: &str) -> &str {
	match uri.find("://") {
		Some(idx) => &uri[idx + 3..],
		None => uri,
	}
}

/// Randomized 50-250 ms backoff used for lookups and registration
/// re-reads, so a whole cluster starting at once does not stampede
pub fn backoff() -> Duration {
	Duration::from_millis(rand::thread_rng().gen_range(50..=250))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_parse_sorts_and_strips_suffix() {
		let contents = "\
# comment line
nodeb tcp://nodeb:4433
nodea#1 tcp://nodea:4434 tcp://nodea:5555
nodea#0 tcp://nodea:4433
";
		let entries = parse(contents).unwrap();
		assert_eq!(entries.len(), 3);
		assert_eq!(entries[0].name, "nodea#0");
		assert_eq!(entries[0].hostname, "nodea");
		assert_eq!(entries[1].name, "nodea#1");
		assert_eq!(entries[1].proxy_uri.as_deref(), Some("tcp://nodea:5555"));
		assert_eq!(entries[2].name, "nodeb");
		assert_eq!(local_id(&entries, "nodea#1").unwrap(), 1);
	}

	#[test]
	fn test_parse_rejects_malformed() {
		assert!(parse("lonely-hostname\n").is_err());
	}

	#[test]
	fn test_parse_skips_instance_end_marker() {
		let entries = parse("nodea tcp://a:1\n#FS_INSTANCE_END\n").unwrap();
		assert_eq!(entries.len(), 1);
	}

	#[test]
	fn test_socket_addr() {
		assert_eq!(socket_addr("tcp://h:1234"), "h:1234");
		assert_eq!(socket_addr("h:1234"), "h:1234");
	}

	#[test]
	fn test_register_and_unregister() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("hosts.txt");
		register(&path, "na#0", "tcp://127.0.0.1:1", None).unwrap();
		register(&path, "na#1", "tcp://127.0.0.1:2", Some("tcp://127.0.0.1:3")).unwrap();
		let entries = load(&path).unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(local_id(&entries, "na#1").unwrap(), 1);
		unregister(&path);
		assert!(load(&path).is_err());
		// second unregister is a no-op
		unregister(&path);
	}
}

// vim: ts=4
