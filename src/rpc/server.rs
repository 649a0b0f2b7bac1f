//! Inbound RPC dispatch loop shared by daemon and proxy
//!
//! Per accepted connection: a reader task decodes frames and spawns one
//! handler task per request, a writer task serializes responses back.
//! Handler tasks may suspend on disk I/O or (in the proxy) on nested
//! RPCs without stalling the connection.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::logging::*;
use crate::rpc::wire::{self, Frame};

/// Inbound request handler. Implementations never fail the frame:
/// application errors are encoded into the response body's `err` field.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
	/// Returns `(body, bulk)` of the response frame
	async fn handle(&self, tag: &str, body: Vec<u8>, bulk: Vec<u8>) -> (Vec<u8>, Vec<u8>);
}

/// Accept loop. Runs until the shutdown signal flips to true.
pub async fn serve(
	listener: TcpListener,
	handler: Arc<dyn Handler>,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			accepted = listener.accept() => match accepted {
				Ok((socket, peer)) => {
					trace!("accepted connection from {}", peer);
					let _ = socket.set_nodelay(true);
					tokio::spawn(process_socket(socket, handler.clone()));
				}
				Err(e) => {
					warn!("accept failed: {}", e);
				}
			},
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					return;
				}
			}
		}
	}
}

async fn process_socket(socket: TcpStream, handler: Arc<dyn Handler>) {
	let (mut read_half, mut write_half) = socket.into_split();
	let (reply_tx, mut reply_rx) = mpsc::channel::<Frame>(64);

	// writer task: serializes responses in completion order
	let writer = tokio::spawn(async move {
		while let Some(frame) = reply_rx.recv().await {
			if let Err(e) = wire::write_frame(&mut write_half, &frame).await {
				trace!("response write failed: {}", e);
				return;
			}
		}
	});

	// reader loop: one spawned handler task per request, so a slow
	// request does not block the ones behind it
	loop {
		let frame = match wire::read_frame(&mut read_half).await {
			Ok(Some(frame)) => frame,
			Ok(None) => break,
			Err(e) => {
				trace!("request read failed: {}", e);
				break;
			}
		};
		let handler = handler.clone();
		let reply_tx = reply_tx.clone();
		tokio::spawn(async move {
			let Frame { id, tag, body, bulk } = frame;
			let (out_body, out_bulk) = handler.handle(&tag, body, bulk).await;
			// the peer may have vanished mid-call; dropping the reply
			// is the correct behavior then
			let _ = reply_tx.send(Frame::new(id, &tag, out_body, out_bulk)).await;
		});
	}

	drop(reply_tx);
	let _ = writer.await;
}

// vim: ts=4
