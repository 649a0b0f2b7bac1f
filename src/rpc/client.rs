//! Outbound RPC transport wrapper
//!
//! One multiplexed TCP connection per peer, owned by an endpoint actor
//! task. Callers hand the actor a frame plus a oneshot for the response;
//! the actor matches responses to requests by frame id. `call` wraps
//! this with the per-call timeout and bounded retries.
//!
//! Retries only re-issue a request after a transport-level failure
//! (connect error, broken connection, timeout). Application-level errors
//! travel inside the response body and are never retried here.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::config;
use crate::error::FsError;
use crate::hosts;
use crate::logging::*;
use crate::rpc::wire::{self, Frame};

type ResponseTx = oneshot::Sender<Result<Frame, FsError>>;

struct Pending {
	frame: Frame,
	resp: ResponseTx,
}

/// Handle to one peer's endpoint actor
#[derive(Clone)]
struct Endpoint {
	tx: mpsc::Sender<Pending>,
}

/// Transport wrapper over all peers of one personality
pub struct RpcClient {
	endpoints: Vec<Endpoint>,
	next_id: AtomicU64,
}

impl RpcClient {
	/// Look up every peer address once. Each address is probed with up
	/// to [`config::LOOKUP_TRIES`] attempts and randomized backoff; a
	/// peer that stays unreachable is fatal, matching daemon startup
	/// semantics.
	pub async fn connect(uris: &[String]) -> Result<Self, FsError> {
		let mut endpoints = Vec::with_capacity(uris.len());
		for uri in uris {
			let addr = hosts::socket_addr(uri).to_string();
			probe(&addr).await?;
			let (tx, rx) = mpsc::channel(256);
			tokio::spawn(endpoint_actor(addr, rx));
			endpoints.push(Endpoint { tx });
		}
		Ok(RpcClient { endpoints, next_id: AtomicU64::new(1) })
	}

	pub fn endpoints_len(&self) -> usize {
		self.endpoints.len()
	}

	/// Issue one RPC and decode the response body
	pub async fn call<I, O>(&self, host: u64, tag: &str, input: &I) -> Result<O, FsError>
	where
		I: Serialize,
		O: DeserializeOwned,
	{
		let (out, _bulk) = self.call_with_bulk(host, tag, input, Vec::new()).await?;
		Ok(out)
	}

	/// Issue one RPC carrying a bulk payload; returns the decoded body
	/// and the response's bulk payload
	pub async fn call_with_bulk<I, O>(
		&self,
		host: u64,
		tag: &str,
		input: &I,
		bulk: Vec<u8>,
	) -> Result<(O, Vec<u8>), FsError>
	where
		I: Serialize,
		O: DeserializeOwned,
	{
		self.call_with_tries(host, tag, input, bulk, config::RPC_TRIES).await
	}

	/// Like [`RpcClient::call_with_bulk`] with an explicit retry budget.
	/// Append size updates pass 1 here: re-sending a lost append would
	/// double-increment the size.
	pub async fn call_with_tries<I, O>(
		&self,
		host: u64,
		tag: &str,
		input: &I,
		bulk: Vec<u8>,
		tries: usize,
	) -> Result<(O, Vec<u8>), FsError>
	where
		I: Serialize,
		O: DeserializeOwned,
	{
		let endpoint = self
			.endpoints
			.get(host as usize)
			.ok_or_else(|| FsError::invalid(format!("no endpoint for host {}", host)))?;
		let body = bincode::serialize(input)
			.map_err(|e| FsError::io(format!("request encode: {}", e)))?;

		let mut attempt = 0;
		loop {
			let id = self.next_id.fetch_add(1, Ordering::Relaxed);
			let frame = Frame::new(id, tag, body.clone(), bulk.clone());
			let (resp_tx, resp_rx) = oneshot::channel();

			let sent = endpoint.tx.send(Pending { frame, resp: resp_tx }).await.is_ok();
			let outcome = if sent {
				match tokio::time::timeout(config::RPC_TIMEOUT, resp_rx).await {
					Ok(Ok(result)) => Some(result),
					// actor dropped the oneshot or the deadline passed
					Ok(Err(_)) | Err(_) => None,
				}
			} else {
				None
			};

			match outcome {
				Some(Ok(frame)) => {
					let out = bincode::deserialize(&frame.body)
						.map_err(|e| FsError::io(format!("response decode: {}", e)))?;
					return Ok((out, frame.bulk));
				}
				Some(Err(_)) | None => {
					attempt += 1;
					if attempt >= tries {
						warn!("rpc '{}' to host {} failed after {} tries", tag, host, attempt);
						return Err(FsError::Busy);
					}
					debug!("rpc '{}' to host {} timed out, retrying", tag, host);
				}
			}
		}
	}
}

/// Startup probe implementing the bounded randomized-backoff lookup
async fn probe(addr: &str) -> Result<(), FsError> {
	let mut attempt = 0;
	loop {
		match TcpStream::connect(addr).await {
			Ok(_) => return Ok(()),
			Err(e) => {
				attempt += 1;
				if attempt >= config::LOOKUP_TRIES {
					return Err(FsError::io(format!("address lookup for '{}' failed: {}", addr, e)));
				}
				tokio::time::sleep(hosts::backoff()).await;
			}
		}
	}
}

enum SessionEnd {
	/// RpcClient dropped; actor exits
	Shutdown,
	/// Connection broke; reconnect on the next request
	Broken,
}

async fn endpoint_actor(addr: String, mut rx: mpsc::Receiver<Pending>) {
	let mut carry: Option<Pending> = None;
	loop {
		let first = match carry.take() {
			Some(p) => p,
			None => match rx.recv().await {
				Some(p) => p,
				None => return,
			},
		};
		let stream = match TcpStream::connect(&addr).await {
			Ok(s) => s,
			Err(e) => {
				debug!("connect to {} failed: {}", addr, e);
				let _ = first.resp.send(Err(FsError::Busy));
				continue;
			}
		};
		let _ = stream.set_nodelay(true);
		match session(stream, first, &mut rx).await {
			SessionEnd::Shutdown => return,
			SessionEnd::Broken => {}
		}
	}
}

/// Drive one established connection until it breaks or the client goes
/// away. In-flight requests on a broken connection fail with Busy; the
/// caller's retry triggers a fresh connection.
async fn session(
	stream: TcpStream,
	first: Pending,
	rx: &mut mpsc::Receiver<Pending>,
) -> SessionEnd {
	let (mut read_half, mut write_half) = stream.into_split();
	let mut in_flight: HashMap<u64, ResponseTx> = HashMap::new();

	// dedicated reader task; frames come back through a channel so the
	// select below stays cancellation-safe
	let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(64);
	let reader = tokio::spawn(async move {
		loop {
			match wire::read_frame(&mut read_half).await {
				Ok(Some(frame)) => {
					if frame_tx.send(frame).await.is_err() {
						return;
					}
				}
				Ok(None) => return,
				Err(e) => {
					trace!("connection read error: {}", e);
					return;
				}
			}
		}
	});

	let mut next = Some(first);
	let end = loop {
		if let Some(pending) = next.take() {
			// responses are only drained by the select below, so the
			// insert cannot race the matching response
			match wire::write_frame(&mut write_half, &pending.frame).await {
				Ok(()) => {
					in_flight.insert(pending.frame.id, pending.resp);
				}
				Err(e) => {
					debug!("connection write error: {}", e);
					let _ = pending.resp.send(Err(FsError::Busy));
					break SessionEnd::Broken;
				}
			}
		}
		tokio::select! {
			req = rx.recv() => match req {
				Some(pending) => next = Some(pending),
				None => break SessionEnd::Shutdown,
			},
			frame = frame_rx.recv() => match frame {
				Some(frame) => {
					if let Some(tx) = in_flight.remove(&frame.id) {
						let _ = tx.send(Ok(frame));
					}
				}
				// reader finished: connection closed or broke
				None => break SessionEnd::Broken,
			},
		}
	};

	reader.abort();
	for (_, tx) in in_flight.drain() {
		let _ = tx.send(Err(FsError::Busy));
	}
	end
}

// vim: ts=4
