use clap::{Arg, Command};
use std::path::PathBuf;
use std::process;

use burstfs::logging::{self, error, info};
use burstfs::proxy::{Proxy, ProxySettings};

fn build_settings() -> ProxySettings {
	let matches = Command::new("burstfs-proxy")
		.version(env!("CARGO_PKG_VERSION"))
		.about("BurstFS per-node client aggregator")
		.arg(
			Arg::new("listen")
				.short('l')
				.long("listen")
				.value_name("ADDR")
				.help("Listen address for local clients, host:port"),
		)
		.arg(
			Arg::new("hosts-file")
				.short('H')
				.long("hosts-file")
				.value_name("FILE")
				.help("Shared hosts file of the daemon mesh"),
		)
		.arg(
			Arg::new("pid-file")
				.short('p')
				.long("pid-file")
				.value_name("FILE")
				.help("Pidfile preventing a second proxy on this node"),
		)
		.get_matches();

	ProxySettings {
		listen: matches
			.get_one::<String>("listen")
			.cloned()
			.unwrap_or_else(|| "127.0.0.1:4434".to_string()),
		hosts_file: matches
			.get_one::<String>("hosts-file")
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from("./burstfs_hosts.txt")),
		pid_file: matches
			.get_one::<String>("pid-file")
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from("/tmp/burstfs_proxy.pid")),
	}
}

#[tokio::main]
async fn main() {
	logging::init_tracing();
	let settings = build_settings();

	let proxy = match Proxy::start(settings).await {
		Ok(proxy) => proxy,
		Err(e) => {
			error!("proxy startup failed: {}", e);
			process::exit(1);
		}
	};
	info!("burstfs-proxy serving on {}", proxy.listen_addr());

	let _ = tokio::signal::ctrl_c().await;
	info!("shutdown signal received");
	proxy.shutdown().await;
	process::exit(0);
}

// vim: ts=4
