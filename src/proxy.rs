//! Proxy personality: per-node aggregator between local clients and the
//! daemon mesh
//!
//! The proxy re-exposes the subset of daemon RPCs that clients call,
//! under the `proxy_rpc_srv_*` tags, and performs the full data fan-out
//! on the clients' behalf with its own distributor over the same hosts
//! file. Its only reason to exist is collapsing N client endpoints per
//! node into one network endpoint.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::client::Forwarder;
use crate::distributor::SimpleHashDistributor;
use crate::error::FsError;
use crate::hosts;
use crate::logging::*;
use crate::rpc::messages::{self, tag};
use crate::rpc::{Handler, RpcClient};
use crate::util;

/// Proxy startup settings (CLI-provided in `burstfs-proxy`)
#[derive(Debug, Clone)]
pub struct ProxySettings {
	pub listen: String,
	pub hosts_file: PathBuf,
	pub pid_file: PathBuf,
}

/// A running proxy instance
pub struct Proxy {
	listen_addr: SocketAddr,
	pid_file: PathBuf,
	shutdown_tx: watch::Sender<bool>,
	serve_task: tokio::task::JoinHandle<()>,
}

impl Proxy {
	pub async fn start(settings: ProxySettings) -> Result<Proxy, FsError> {
		write_pid_file(&settings.pid_file)?;

		let entries = hosts::load(&settings.hosts_file)?;
		let uris: Vec<String> = entries.iter().map(|e| e.daemon_uri.clone()).collect();
		let rpc = Arc::new(RpcClient::connect(&uris).await?);
		let dist = Arc::new(SimpleHashDistributor::new(0, entries.len()));
		let fwd = Arc::new(Forwarder::new(rpc, dist, 0));

		let listener = TcpListener::bind(&settings.listen).await?;
		let listen_addr = listener.local_addr()?;
		info!("proxy listening on {} for {} daemon(s)", listen_addr, entries.len());

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let handler = Arc::new(ProxyHandler { fwd });
		let serve_task = tokio::spawn(crate::rpc::serve(listener, handler, shutdown_rx));

		Ok(Proxy { listen_addr, pid_file: settings.pid_file, shutdown_tx, serve_task })
	}

	pub fn listen_addr(&self) -> SocketAddr {
		self.listen_addr
	}

	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(true);
		self.serve_task.abort();
		let _ = self.serve_task.await;
		let _ = std::fs::remove_file(&self.pid_file);
		info!("proxy shut down");
	}
}

/// Refuse to start while another proxy instance holds the pidfile
fn write_pid_file(path: &PathBuf) -> Result<(), FsError> {
	if let Ok(contents) = std::fs::read_to_string(path) {
		if let Ok(pid) = contents.trim().parse::<i32>() {
			if util::process_alive(pid) {
				return Err(FsError::Busy);
			}
		}
		warn!("removing stale pid file {}", path.display());
	}
	std::fs::write(path, format!("{}\n", std::process::id()))
		.map_err(|e| FsError::io(format!("cannot write pid file: {}", e)))
}

fn encode<T: serde::Serialize>(out: &T) -> Vec<u8> {
	bincode::serialize(out).unwrap_or_default()
}

struct ProxyHandler {
	fwd: Arc<Forwarder>,
}

impl ProxyHandler {
	async fn create(&self, input: messages::MkNodeIn) -> Vec<u8> {
		let err = match self.fwd.create(&input.path, input.mode).await {
			Ok(()) => 0,
			Err(e) => e.to_errno(),
		};
		encode(&messages::ErrOut { err })
	}

	async fn stat(&self, input: messages::PathIn) -> Vec<u8> {
		match self.fwd.stat_raw(&input.path).await {
			Ok(db_val) => encode(&messages::StatOut { err: 0, db_val }),
			Err(e) => encode(&messages::StatOut { err: e.to_errno(), db_val: Vec::new() }),
		}
	}

	async fn remove(&self, input: messages::PathIn) -> Vec<u8> {
		let err = match self.fwd.remove(&input.path).await {
			Ok(()) => 0,
			Err(e) => e.to_errno(),
		};
		encode(&messages::ErrOut { err })
	}

	async fn decr_size(&self, input: messages::DecrSizeIn) -> Vec<u8> {
		let err = match self.fwd.decr_size(&input.path, input.length).await {
			Ok(()) => 0,
			Err(e) => e.to_errno(),
		};
		encode(&messages::ErrOut { err })
	}

	async fn get_size(&self, input: messages::PathIn) -> Vec<u8> {
		match self.fwd.get_metadentry_size(&input.path).await {
			Ok(ret_size) => encode(&messages::GetMetadentrySizeOut { err: 0, ret_size }),
			Err(e) => {
				encode(&messages::GetMetadentrySizeOut { err: e.to_errno(), ret_size: 0 })
			}
		}
	}

	async fn update_size(&self, input: messages::UpdateMetadentrySizeIn) -> Vec<u8> {
		match self
			.fwd
			.update_metadentry_size(&input.path, input.size, input.offset, input.append)
			.await
		{
			Ok(ret_offset) => {
				encode(&messages::UpdateMetadentrySizeOut { err: 0, ret_offset })
			}
			Err(e) => {
				encode(&messages::UpdateMetadentrySizeOut { err: e.to_errno(), ret_offset: 0 })
			}
		}
	}

	/// PULL the range from the client, fan it out to the daemons
	async fn write(&self, input: messages::ProxyDataIn, bulk: Vec<u8>) -> Vec<u8> {
		if bulk.len() as u64 != input.size {
			return encode(&messages::DataOut { err: libc::EINVAL, io_size: 0 });
		}
		match self.fwd.write(&input.path, &bulk, input.offset).await {
			Ok(io_size) => encode(&messages::DataOut { err: 0, io_size }),
			Err(e) => encode(&messages::DataOut { err: e.to_errno(), io_size: 0 }),
		}
	}

	/// Run the fan-out into a local region, PUSH the result back
	async fn read(&self, input: messages::ProxyDataIn) -> (Vec<u8>, Vec<u8>) {
		let mut buf = vec![0u8; input.size as usize];
		match self.fwd.read(&input.path, &mut buf, input.offset).await {
			Ok(io_size) => (encode(&messages::DataOut { err: 0, io_size }), buf),
			Err(e) => (
				encode(&messages::DataOut { err: e.to_errno(), io_size: 0 }),
				Vec::new(),
			),
		}
	}

	async fn truncate(&self, input: messages::ProxyTruncIn) -> Vec<u8> {
		let err = match self
			.fwd
			.truncate(&input.path, input.current_size, input.new_size)
			.await
		{
			Ok(()) => 0,
			Err(e) => e.to_errno(),
		};
		encode(&messages::ErrOut { err })
	}

	async fn chunk_stat(&self) -> Vec<u8> {
		match self.fwd.chunk_stat().await {
			Ok(chunk_stat) => encode(&messages::ChunkStatOut { err: 0, chunk_stat }),
			Err(e) => encode(&messages::ChunkStatOut {
				err: e.to_errno(),
				chunk_stat: crate::storage::ChunkStat {
					chunk_size: 0,
					chunk_total: 0,
					chunk_free: 0,
				},
			}),
		}
	}

	async fn get_dirents_extended(&self, input: messages::PathIn) -> (Vec<u8>, Vec<u8>) {
		match self.fwd.get_dirents_extended(&input.path).await {
			Ok(entries) => {
				let bulk = messages::pack_dirents_extended(&entries);
				(
					encode(&messages::DirentsOut {
						err: 0,
						dirents_count: entries.len() as u64,
					}),
					bulk,
				)
			}
			Err(e) => (
				encode(&messages::DirentsOut { err: e.to_errno(), dirents_count: 0 }),
				Vec::new(),
			),
		}
	}
}

#[async_trait]
impl Handler for ProxyHandler {
	async fn handle(&self, rpc_tag: &str, body: Vec<u8>, bulk: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
		macro_rules! plain {
			($method:ident) => {
				match bincode::deserialize(&body) {
					Ok(input) => (self.$method(input).await, Vec::new()),
					Err(_) => (encode(&messages::ErrOut { err: libc::EINVAL }), Vec::new()),
				}
			};
		}

		match rpc_tag {
			tag::PROXY_CREATE => plain!(create),
			tag::PROXY_STAT => plain!(stat),
			tag::PROXY_REMOVE => plain!(remove),
			tag::PROXY_DECR_SIZE => plain!(decr_size),
			tag::PROXY_GET_SIZE => plain!(get_size),
			tag::PROXY_UPDATE_SIZE => plain!(update_size),
			tag::PROXY_TRUNCATE => plain!(truncate),
			tag::PROXY_WRITE => match bincode::deserialize(&body) {
				Ok(input) => (self.write(input, bulk).await, Vec::new()),
				Err(_) => (
					encode(&messages::DataOut { err: libc::EINVAL, io_size: 0 }),
					Vec::new(),
				),
			},
			tag::PROXY_READ => match bincode::deserialize(&body) {
				Ok(input) => self.read(input).await,
				Err(_) => (
					encode(&messages::DataOut { err: libc::EINVAL, io_size: 0 }),
					Vec::new(),
				),
			},
			tag::PROXY_CHUNK_STAT => (self.chunk_stat().await, Vec::new()),
			tag::PROXY_GET_DIRENTS_EXTENDED => match bincode::deserialize(&body) {
				Ok(input) => self.get_dirents_extended(input).await,
				Err(_) => (
					encode(&messages::DirentsOut { err: libc::EINVAL, dirents_count: 0 }),
					Vec::new(),
				),
			},
			unknown => {
				warn!("proxy request with unknown tag '{}'", unknown);
				(encode(&messages::ErrOut { err: libc::EINVAL }), Vec::new())
			}
		}
	}
}

// vim: ts=4
