//! Shared forwarding state for the client and proxy personalities
//!
//! Both personalities drive the same fan-out logic: the client against
//! the daemon mesh (or against its local proxy), the proxy against the
//! daemon mesh on behalf of its clients. The operations themselves live
//! in `forward_metadata` and `forward_data`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::distributor::{Distributor, HostId};
use crate::rpc::RpcClient;

pub struct Forwarder {
	pub rpc: Arc<RpcClient>,
	pub dist: Arc<dyn Distributor>,

	/// Extra data copies per chunk (0 disables replication); copy `k`
	/// of a chunk lives on `(primary + k) mod N`
	pub num_repl: usize,

	/// Replica ids that failed a read; subsequent reads skip them first
	pub failed_replicas: Mutex<HashSet<HostId>>,

	/// When set, the endpoint list holds exactly the local proxy and all
	/// operations use the `proxy_rpc_srv_*` surface
	pub via_proxy: bool,
}

impl Forwarder {
	pub fn new(rpc: Arc<RpcClient>, dist: Arc<dyn Distributor>, num_repl: usize) -> Self {
		Forwarder {
			rpc,
			dist,
			num_repl,
			failed_replicas: Mutex::new(HashSet::new()),
			via_proxy: false,
		}
	}

	pub fn via_proxy(rpc: Arc<RpcClient>, dist: Arc<dyn Distributor>) -> Self {
		Forwarder {
			rpc,
			dist,
			num_repl: 0,
			failed_replicas: Mutex::new(HashSet::new()),
			via_proxy: true,
		}
	}

	pub(crate) fn mark_replica_failed(&self, id: HostId) {
		let mut failed = match self.failed_replicas.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		failed.insert(id);
	}

	pub(crate) fn replica_failed(&self, id: HostId) -> bool {
		let failed = match self.failed_replicas.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		failed.contains(&id)
	}
}

/// Map a wire errno to a result
pub(crate) fn check_err(err: i32) -> Result<(), crate::error::FsError> {
	if err == 0 {
		Ok(())
	} else {
		Err(crate::error::FsError::from_errno(err))
	}
}

// vim: ts=4
