//! Logging prelude module for convenient access to tracing macros.
//!
//! This module provides convenient re-exports of common tracing macros
//! to reduce verbosity and maintain consistency across the codebase.

pub use tracing::{debug, error, info, trace, warn};

/// Initialize the tracing subscriber for a daemon or proxy process.
///
/// Logs at INFO level and above by default; control the level with the
/// `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug burstfsd ...
/// RUST_LOG=burstfs::daemon=trace,burstfs::rpc=debug burstfsd ...
/// ```
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.try_init();
}

/// Initialize tracing for the client library.
///
/// The client runs inside an unsuspecting application process, so the
/// level comes from `LIBGKFS_LOG_LEVEL` (not `RUST_LOG`) and output can
/// be redirected to `LIBGKFS_LOG_PATH` instead of polluting the
/// application's stderr. Both init functions are idempotent.
pub fn init_client_tracing(level: Option<&str>, log_path: Option<&str>) {
	let filter = tracing_subscriber::EnvFilter::new(level.unwrap_or("warn"));

	match log_path {
		Some(path) => {
			let file = std::fs::OpenOptions::new().create(true).append(true).open(path);
			match file {
				Ok(file) => {
					let _ = tracing_subscriber::fmt()
						.with_env_filter(filter)
						.with_ansi(false)
						.with_writer(std::sync::Mutex::new(file))
						.try_init();
				}
				Err(_) => {
					// Fall back to stderr when the log file cannot be opened
					let _ = tracing_subscriber::fmt()
						.with_env_filter(filter)
						.with_writer(std::io::stderr)
						.try_init();
				}
			}
		}
		None => {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_writer(std::io::stderr)
				.try_init();
		}
	}
}

// vim: ts=4
