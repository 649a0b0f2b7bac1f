//! RPC plumbing shared by client, proxy and daemon
//!
//! The surface consists of tagged request/response frames over TCP with
//! an attached bulk payload. `messages` defines the wire structs and the
//! exact tag strings, `wire` the framing, `bulk` the registered-region
//! capability plus the chunk layout arithmetic both sides must agree on,
//! `client` the outbound call wrapper with timeout/retry, and `server`
//! the inbound dispatch loop.

pub mod bulk;
pub mod client;
pub mod messages;
pub mod server;
pub mod wire;

pub use bulk::{ChunkLayout, ReadRegion, WriteRegion};
pub use client::RpcClient;
pub use server::{serve, Handler};

// vim: ts=4
