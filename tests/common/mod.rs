//! In-process cluster harness for integration tests
//!
//! Starts N daemons on ephemeral localhost ports sharing one hosts file
//! under a temporary directory, exactly as a multi-node deployment
//! would, just without the network in between nodes.
#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use burstfs::client::{Client, ClientSettings};
use burstfs::config::{DaemonSettings, MetadataSettings};
use burstfs::daemon::Daemon;

pub const MOUNTDIR: &str = "/tmp/burstfs_mount";

pub struct TestCluster {
	pub daemons: Vec<Daemon>,
	pub hosts_file: PathBuf,
	base: TempDir,
	next_idx: usize,
}

impl TestCluster {
	pub async fn start(n: usize) -> TestCluster {
		let base = tempfile::tempdir().expect("tempdir");
		let hosts_file = base.path().join("hosts.txt");
		let mut cluster = TestCluster { daemons: Vec::new(), hosts_file, base, next_idx: 0 };
		for _ in 0..n {
			cluster.add_daemon().await;
		}
		cluster
	}

	/// Start one more daemon against the shared hosts file
	pub async fn add_daemon(&mut self) {
		let idx = self.next_idx;
		self.next_idx += 1;
		let settings = DaemonSettings {
			mountdir: PathBuf::from(MOUNTDIR),
			rootdir: self.base.path().join(format!("root{}", idx)),
			metadir: None,
			listen: "127.0.0.1:0".to_string(),
			hosts_file: self.hosts_file.clone(),
			rpc_protocol: "tcp".to_string(),
			clean_rootdir: false,
			dbbackend: "memory".to_string(),
			proxy_protocol: None,
			md_settings: MetadataSettings::default(),
		};
		let daemon = Daemon::start(settings).await.expect("daemon start");
		self.daemons.push(daemon);
	}

	pub fn client_settings(&self) -> ClientSettings {
		let mut settings = ClientSettings::default();
		settings.hosts_file = self.hosts_file.clone();
		settings.mount_dir = Some(MOUNTDIR.to_string());
		// deterministic listings in tests
		settings.dentry_ttl = Duration::ZERO;
		settings
	}

	pub async fn client(&self) -> Client {
		Client::with_settings(self.client_settings()).await.expect("client connect")
	}

	/// Sorted host id of the daemon at `idx`, as assigned by the hosts
	/// file sort order
	pub fn host_id_of(&self, idx: usize) -> u64 {
		let entries = burstfs::hosts::load(&self.hosts_file).expect("hosts file");
		let port = self.daemons[idx].listen_addr().port();
		let needle = format!("#{}", port);
		entries
			.iter()
			.position(|e| e.name.ends_with(&needle))
			.map(|p| p as u64)
			.expect("daemon not in hosts file")
	}

	/// All `(path, chunk_id, size)` triples on daemon `idx`
	pub async fn chunks_on(&self, idx: usize) -> Vec<(String, u64, u64)> {
		self.daemons[idx]
			.context()
			.storage
			.iterate_all_chunks()
			.await
			.expect("iterate chunks")
			.into_iter()
			.map(|c| (c.path, c.chunk_id, c.size))
			.collect()
	}

	pub async fn shutdown(self) {
		for daemon in self.daemons {
			daemon.shutdown().await;
		}
	}
}

// vim: ts=4
