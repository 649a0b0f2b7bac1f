//! Client configuration from `LIBGKFS_*` environment variables
//!
//! The client library lives inside an application process, so all of its
//! knobs arrive through the environment rather than a CLI.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::config;

/// All client-side tunables with their environment sources
#[derive(Debug, Clone)]
pub struct ClientSettings {
	/// LIBGKFS_HOSTS_FILE: cluster membership list
	pub hosts_file: PathBuf,

	/// LIBGKFS_MNT_DIR: mount prefix; falls back to the daemons' value
	/// published via `fs_config`
	pub mount_dir: Option<String>,

	/// LIBGKFS_LOG_LEVEL / LIBGKFS_LOG_PATH
	pub log_level: Option<String>,
	pub log_path: Option<String>,

	/// LIBGKFS_FORWARDING_MAP_FILE: enables the forwarding distributor
	pub forwarding_map_file: Option<PathBuf>,

	/// LIBGKFS_ENABLE_METRICS: parsed for compatibility; metrics
	/// collection itself is not part of this library
	pub metrics_enabled: bool,

	/// LIBGKFS_USE_PROXY: route everything through the local proxy
	pub use_proxy: bool,

	/// LIBGKFS_PROXY_URI: the local proxy endpoint when routing via proxy
	pub proxy_uri: Option<String>,

	/// LIBGKFS_NUM_REPL: extra data copies per chunk; 0 disables
	/// replication
	pub num_repl: usize,

	/// LIBGKFS_DENTRY_TTL_MS: dentry cache TTL; 0 disables the cache
	pub dentry_ttl: Duration,

	/// LIBGKFS_WRITE_SIZE_CACHE: coalesce size updates; off by default
	pub write_size_cache: bool,
	pub write_size_cache_threshold: u32,
}

fn env_flag(name: &str) -> bool {
	match env::var(name) {
		Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"),
		Err(_) => false,
	}
}

impl Default for ClientSettings {
	fn default() -> Self {
		ClientSettings {
			hosts_file: PathBuf::from("./burstfs_hosts.txt"),
			mount_dir: None,
			log_level: None,
			log_path: None,
			forwarding_map_file: None,
			metrics_enabled: false,
			use_proxy: false,
			proxy_uri: None,
			num_repl: 0,
			dentry_ttl: config::DENTRY_TTL,
			write_size_cache: false,
			write_size_cache_threshold: config::WRITE_SIZE_CACHE_THRESHOLD,
		}
	}
}

impl ClientSettings {
	pub fn from_env() -> Self {
		let mut settings = ClientSettings::default();
		if let Ok(path) = env::var("LIBGKFS_HOSTS_FILE") {
			settings.hosts_file = PathBuf::from(path);
		}
		if let Ok(dir) = env::var("LIBGKFS_MNT_DIR") {
			settings.mount_dir = Some(dir);
		}
		settings.log_level = env::var("LIBGKFS_LOG_LEVEL").ok();
		settings.log_path = env::var("LIBGKFS_LOG_PATH").ok();
		if let Ok(path) = env::var("LIBGKFS_FORWARDING_MAP_FILE") {
			if !path.is_empty() {
				settings.forwarding_map_file = Some(PathBuf::from(path));
			}
		}
		settings.metrics_enabled = env_flag("LIBGKFS_ENABLE_METRICS");
		settings.use_proxy = env_flag("LIBGKFS_USE_PROXY");
		settings.proxy_uri = env::var("LIBGKFS_PROXY_URI").ok();
		if let Ok(n) = env::var("LIBGKFS_NUM_REPL") {
			settings.num_repl = n.parse().unwrap_or(0);
		}
		if let Ok(ms) = env::var("LIBGKFS_DENTRY_TTL_MS") {
			settings.dentry_ttl = Duration::from_millis(ms.parse().unwrap_or(0));
		}
		settings.write_size_cache = env_flag("LIBGKFS_WRITE_SIZE_CACHE");
		if let Ok(n) = env::var("LIBGKFS_WRITE_SIZE_CACHE_THRESHOLD") {
			settings.write_size_cache_threshold =
				n.parse().unwrap_or(config::WRITE_SIZE_CACHE_THRESHOLD);
		}
		settings
	}
}

// vim: ts=4
