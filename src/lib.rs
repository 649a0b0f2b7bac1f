//! # BurstFS - Ephemeral Burst-Buffer File System
//!
//! BurstFS aggregates the node-local storage of a set of compute nodes into
//! a single POSIX-like namespace for the lifetime of a job. File data is
//! striped across the participating nodes in fixed-size chunks; metadata is
//! sharded across the same nodes by a hash of the full path.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use burstfs::client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), burstfs::error::FsError> {
//!     let client = Client::init().await?;
//!     client.create("/hello", 0o644).await?;
//!     client.pwrite("/hello", b"abc", 0).await?;
//!     let md = client.stat("/hello").await?;
//!     assert_eq!(md.size, 3);
//!     Ok(())
//! }
//! ```
//!
//! The daemon side is started via the `burstfsd` binary (one per node), the
//! optional per-node aggregator via `burstfs-proxy`.

#![deny(unsafe_code)]

pub mod arithmetic;
pub mod client;
pub mod config;
pub mod daemon;
pub mod distributor;
pub mod error;
pub mod hosts;
pub mod kv;
pub mod logging;
pub mod malleability;
pub mod metadata;
pub mod path;
pub mod proxy;
pub mod rpc;
pub mod storage;
pub mod util;

// Re-export commonly used types and functions
pub use client::Client;
pub use distributor::{Distributor, ForwardingDistributor, SimpleHashDistributor};
pub use error::{FsError, KvError};
pub use hosts::HostEntry;
pub use metadata::Metadata;

// vim: ts=4
