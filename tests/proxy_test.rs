//! Client traffic routed through the per-node proxy aggregator

mod common;

use burstfs::client::Client;
use burstfs::config::CHUNK_SIZE;
use burstfs::error::FsError;
use burstfs::proxy::{Proxy, ProxySettings};
use common::TestCluster;

async fn start_proxy(cluster: &TestCluster, pid_name: &str) -> Proxy {
	let settings = ProxySettings {
		listen: "127.0.0.1:0".to_string(),
		hosts_file: cluster.hosts_file.clone(),
		pid_file: std::env::temp_dir().join(pid_name),
	};
	Proxy::start(settings).await.expect("proxy start")
}

async fn proxy_client(cluster: &TestCluster, proxy: &Proxy) -> Client {
	let mut settings = cluster.client_settings();
	settings.use_proxy = true;
	settings.proxy_uri = Some(format!("tcp://{}", proxy.listen_addr()));
	Client::with_settings(settings).await.expect("proxy client")
}

#[tokio::test]
async fn test_full_flow_through_proxy() {
	let cluster = TestCluster::start(2).await;
	let proxy = start_proxy(&cluster, "burstfs_proxy_test_a.pid").await;
	let client = proxy_client(&cluster, &proxy).await;

	client.mkdir("/p", 0o755).await.unwrap();
	client.create("/p/file", 0o644).await.unwrap();

	// a cross-chunk range exercises the proxy-side fan-out
	let len = (CHUNK_SIZE + CHUNK_SIZE / 2) as usize;
	let payload: Vec<u8> = (0..len).map(|i| (i % 239) as u8).collect();
	let written = client.pwrite("/p/file", &payload, 100).await.unwrap();
	assert_eq!(written, len as u64);

	let md = client.stat("/p/file").await.unwrap();
	assert_eq!(md.size as u64, 100 + len as u64);

	let mut buf = vec![0u8; len];
	assert_eq!(client.pread("/p/file", &mut buf, 100).await.unwrap(), len as u64);
	assert_eq!(buf, payload);

	let entries = client.readdir("/p").await.unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].name, "file");
	assert_eq!(entries[0].size as u64, 100 + len as u64);

	client.truncate("/p/file", 50).await.unwrap();
	assert_eq!(client.stat("/p/file").await.unwrap().size, 50);

	let stat = client.statfs().await.unwrap();
	assert_eq!(stat.chunk_size, CHUNK_SIZE);

	client.remove("/p/file").await.unwrap();
	assert!(matches!(client.stat("/p/file").await, Err(FsError::NotFound)));

	proxy.shutdown().await;
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_proxy_and_direct_clients_see_same_namespace() {
	let cluster = TestCluster::start(2).await;
	let proxy = start_proxy(&cluster, "burstfs_proxy_test_b.pid").await;

	let via_proxy = proxy_client(&cluster, &proxy).await;
	let direct = cluster.client().await;

	via_proxy.create("/shared", 0o644).await.unwrap();
	via_proxy.pwrite("/shared", b"through the proxy", 0).await.unwrap();

	let mut buf = [0u8; 17];
	assert_eq!(direct.pread("/shared", &mut buf, 0).await.unwrap(), 17);
	assert_eq!(&buf, b"through the proxy");

	proxy.shutdown().await;
	cluster.shutdown().await;
}

#[tokio::test]
async fn test_second_proxy_refused_by_pidfile() {
	let cluster = TestCluster::start(1).await;
	let pid_file = std::env::temp_dir().join("burstfs_proxy_test_c.pid");
	let _ = std::fs::remove_file(&pid_file);

	let settings = ProxySettings {
		listen: "127.0.0.1:0".to_string(),
		hosts_file: cluster.hosts_file.clone(),
		pid_file: pid_file.clone(),
	};
	let proxy = Proxy::start(settings.clone()).await.unwrap();
	// same pidfile, same (live) process: the second instance must refuse
	assert!(matches!(Proxy::start(settings).await, Err(FsError::Busy)));

	proxy.shutdown().await;
	assert!(!pid_file.exists());
	cluster.shutdown().await;
}

// vim: ts=4
