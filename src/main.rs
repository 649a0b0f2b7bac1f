use clap::{Arg, ArgAction, Command};
use serde::Deserialize;
use std::path::PathBuf;
use std::process;

use burstfs::config::{DaemonSettings, MetadataSettings};
use burstfs::daemon::Daemon;
use burstfs::logging::{self, error, info};

/// Optional TOML config file; CLI flags take precedence over it
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
	mountdir: Option<String>,
	rootdir: Option<String>,
	metadir: Option<String>,
	listen: Option<String>,
	hosts_file: Option<String>,
	rpc_protocol: Option<String>,
	dbbackend: Option<String>,
	proxy_protocol: Option<String>,
	clean_rootdir: Option<bool>,
	atime: Option<bool>,
	mtime: Option<bool>,
	ctime: Option<bool>,
	link_count: Option<bool>,
	blocks: Option<bool>,
}

fn load_file_config(path: &str) -> Result<FileConfig, String> {
	let contents = std::fs::read_to_string(path)
		.map_err(|e| format!("cannot read config file '{}': {}", path, e))?;
	toml::from_str(&contents).map_err(|e| format!("cannot parse config file '{}': {}", path, e))
}

fn build_settings() -> Result<DaemonSettings, String> {
	let matches = Command::new("burstfsd")
		.version(env!("CARGO_PKG_VERSION"))
		.about("BurstFS daemon - one per storage node")
		.arg(
			Arg::new("mountdir")
				.short('m')
				.long("mountdir")
				.value_name("DIR")
				.help("Mount prefix clients intercept against"),
		)
		.arg(
			Arg::new("rootdir")
				.short('r')
				.long("rootdir")
				.value_name("DIR")
				.help("Node-local directory for chunk data"),
		)
		.arg(
			Arg::new("metadir")
				.long("metadir")
				.value_name("DIR")
				.help("Node-local directory for the metadata database (defaults to rootdir)"),
		)
		.arg(
			Arg::new("listen")
				.short('l')
				.long("listen")
				.value_name("ADDR")
				.help("Listen address, host:port (port 0 picks an ephemeral port)"),
		)
		.arg(
			Arg::new("hosts-file")
				.short('H')
				.long("hosts-file")
				.value_name("FILE")
				.help("Shared hosts file to register in"),
		)
		.arg(
			Arg::new("rpc-protocol")
				.short('P')
				.long("rpc-protocol")
				.value_name("PROTO")
				.help("Transport scheme of the daemon endpoint (tcp)"),
		)
		.arg(
			Arg::new("clean-rootdir")
				.long("clean-rootdir")
				.action(ArgAction::SetTrue)
				.help("Wipe rootdir contents at startup"),
		)
		.arg(
			Arg::new("dbbackend")
				.short('d')
				.long("dbbackend")
				.value_name("BACKEND")
				.help("Metadata database backend: redb or memory"),
		)
		.arg(
			Arg::new("proxy-protocol")
				.long("proxy-protocol")
				.value_name("PROTO")
				.help("Transport scheme of the co-located proxy, published in the hosts file"),
		)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("TOML config file; CLI flags override its values"),
		)
		.get_matches();

	let file = match matches.get_one::<String>("config") {
		Some(path) => load_file_config(path)?,
		None => FileConfig::default(),
	};

	let defaults = DaemonSettings::default();
	let mut settings = DaemonSettings {
		mountdir: matches
			.get_one::<String>("mountdir")
			.cloned()
			.or(file.mountdir)
			.map(PathBuf::from)
			.unwrap_or(defaults.mountdir),
		rootdir: matches
			.get_one::<String>("rootdir")
			.cloned()
			.or(file.rootdir)
			.map(PathBuf::from)
			.unwrap_or(defaults.rootdir),
		metadir: matches
			.get_one::<String>("metadir")
			.cloned()
			.or(file.metadir)
			.map(PathBuf::from),
		listen: matches
			.get_one::<String>("listen")
			.cloned()
			.or(file.listen)
			.unwrap_or(defaults.listen),
		hosts_file: matches
			.get_one::<String>("hosts-file")
			.cloned()
			.or(file.hosts_file)
			.map(PathBuf::from)
			.unwrap_or(defaults.hosts_file),
		rpc_protocol: matches
			.get_one::<String>("rpc-protocol")
			.cloned()
			.or(file.rpc_protocol)
			.unwrap_or(defaults.rpc_protocol),
		clean_rootdir: matches.get_flag("clean-rootdir") || file.clean_rootdir.unwrap_or(false),
		dbbackend: matches
			.get_one::<String>("dbbackend")
			.cloned()
			.or(file.dbbackend)
			.unwrap_or(defaults.dbbackend),
		proxy_protocol: matches
			.get_one::<String>("proxy-protocol")
			.cloned()
			.or(file.proxy_protocol),
		md_settings: MetadataSettings::default(),
	};
	let md_defaults = MetadataSettings::default();
	settings.md_settings = MetadataSettings {
		atime: file.atime.unwrap_or(md_defaults.atime),
		mtime: file.mtime.unwrap_or(md_defaults.mtime),
		ctime: file.ctime.unwrap_or(md_defaults.ctime),
		link_count: file.link_count.unwrap_or(md_defaults.link_count),
		blocks: file.blocks.unwrap_or(md_defaults.blocks),
	};

	if settings.rpc_protocol != "tcp" {
		return Err(format!(
			"rpc protocol '{}' is not wired up in this build",
			settings.rpc_protocol
		));
	}
	Ok(settings)
}

#[tokio::main]
async fn main() {
	logging::init_tracing();

	let settings = match build_settings() {
		Ok(settings) => settings,
		Err(e) => {
			eprintln!("burstfsd: {}", e);
			process::exit(2);
		}
	};

	let daemon = match Daemon::start(settings).await {
		Ok(daemon) => daemon,
		Err(e) => {
			error!("startup failed: {}", e);
			process::exit(1);
		}
	};
	info!("burstfsd serving on {}", daemon.listen_addr());

	wait_for_shutdown_signal().await;
	info!("shutdown signal received");
	daemon.shutdown().await;
	process::exit(0);
}

async fn wait_for_shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};
		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(sigterm) => sigterm,
			Err(e) => {
				error!("cannot install SIGTERM handler: {}", e);
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {}
			_ = sigterm.recv() => {}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}

// vim: ts=4
