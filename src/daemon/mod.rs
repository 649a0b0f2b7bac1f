//! Daemon personality: owns a metadata shard and local chunk storage,
//! serves the `rpc_srv_*` surface
//!
//! There are no module-level singletons: everything a handler needs
//! lives in [`DaemonContext`], built once at startup and passed by
//! reference (Arc) into the dispatch loop and the malleability manager.

pub mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

use crate::config::{DaemonSettings, CHUNK_SIZE};
use crate::distributor::SimpleHashDistributor;
use crate::error::FsError;
use crate::hosts;
use crate::kv::{KvStore, MemStore, RedbStore};
use crate::logging::*;
use crate::metadata::MetadataDb;
use crate::rpc::RpcClient;
use crate::storage::ChunkStorage;

/// Everything the handler set and the malleability manager operate on
pub struct DaemonContext {
	pub settings: DaemonSettings,
	pub storage: ChunkStorage,
	pub mdb: MetadataDb,
	pub distributor: SimpleHashDistributor,

	/// While set, client-facing RPCs answer Busy so redistribution can
	/// proceed against a quiescent shard
	pub maintenance: AtomicBool,

	/// Set for the lifetime of the background redistribution task
	pub redist_running: AtomicBool,

	/// Name this daemon registered in the hosts file (`hostname#suffix`)
	pub local_name: String,

	/// Peer connections; established lazily by the malleability manager
	/// at expansion time - daemons do not talk to each other otherwise
	pub peers: Mutex<Option<Arc<RpcClient>>>,
}

impl DaemonContext {
	pub fn in_maintenance(&self) -> bool {
		self.maintenance.load(Ordering::Acquire)
	}
}

/// A running daemon instance
pub struct Daemon {
	ctx: Arc<DaemonContext>,
	listen_addr: SocketAddr,
	hosts_file: PathBuf,
	shutdown_tx: watch::Sender<bool>,
	serve_task: tokio::task::JoinHandle<()>,
}

impl Daemon {
	/// Bring up storage, metadata DB and the RPC listener, then publish
	/// this daemon in the shared hosts file
	pub async fn start(settings: DaemonSettings) -> Result<Daemon, FsError> {
		if settings.clean_rootdir && settings.rootdir.exists() {
			info!("cleaning rootdir {}", settings.rootdir.display());
			tokio::fs::remove_dir_all(&settings.rootdir).await?;
		}
		tokio::fs::create_dir_all(&settings.rootdir).await?;

		let storage = ChunkStorage::new(&settings.rootdir, CHUNK_SIZE).await?;

		let metadir = settings.metadir.clone().unwrap_or_else(|| settings.rootdir.clone());
		tokio::fs::create_dir_all(&metadir).await?;
		let kv: Box<dyn KvStore> = match settings.dbbackend.as_str() {
			"memory" => Box::new(MemStore::new()),
			"redb" => Box::new(RedbStore::open(&metadir.join("metadata.redb"))?),
			other => {
				return Err(FsError::invalid(format!("unknown dbbackend '{}'", other)));
			}
		};
		let mdb = MetadataDb::new(kv, settings.md_settings)?;

		let listener = TcpListener::bind(&settings.listen).await?;
		let listen_addr = listener.local_addr()?;

		// hostname#port keeps multiple daemons on one node distinct and
		// gives every process the same stable sort key
		let hostname = crate::util::get_hostname();
		let local_name = format!("{}#{}", hostname, listen_addr.port());
		let advertise_host = match settings.listen.rsplitn(2, ':').nth(1) {
			Some(host) if host != "0.0.0.0" && !host.is_empty() => host.to_string(),
			_ => hostname,
		};
		let daemon_uri =
			format!("{}://{}:{}", settings.rpc_protocol, advertise_host, listen_addr.port());
		let proxy_uri = settings
			.proxy_protocol
			.as_ref()
			.map(|proto| format!("{}://{}:{}", proto, advertise_host, listen_addr.port() + 1));

		hosts::register(&settings.hosts_file, &local_name, &daemon_uri, proxy_uri.as_deref())?;
		let entries = hosts::load(&settings.hosts_file)?;
		let local_id = hosts::local_id(&entries, &local_name)?;
		info!(
			"daemon '{}' is host {} of {} at {}",
			local_name,
			local_id,
			entries.len(),
			daemon_uri
		);

		let hosts_file = settings.hosts_file.clone();
		let ctx = Arc::new(DaemonContext {
			distributor: SimpleHashDistributor::new(local_id, entries.len()),
			settings,
			storage,
			mdb,
			maintenance: AtomicBool::new(false),
			redist_running: AtomicBool::new(false),
			local_name,
			peers: Mutex::new(None),
		});

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let handler = Arc::new(handlers::DaemonHandler::new(ctx.clone()));
		let serve_task = tokio::spawn(crate::rpc::serve(listener, handler, shutdown_rx));

		Ok(Daemon { ctx, listen_addr, hosts_file, shutdown_tx, serve_task })
	}

	pub fn listen_addr(&self) -> SocketAddr {
		self.listen_addr
	}

	pub fn context(&self) -> &Arc<DaemonContext> {
		&self.ctx
	}

	/// Stop serving and retract the whole hosts file: with one member
	/// gone, the surviving distribution would be incorrect anyway
	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(true);
		self.serve_task.abort();
		let _ = self.serve_task.await;
		hosts::unregister(&self.hosts_file);
		info!("daemon '{}' shut down", self.ctx.local_name);
	}
}

// vim: ts=4
