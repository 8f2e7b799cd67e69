//! # Sandstone
//!
//! An embedded-storage key-value server with a thread-pooled reactor.
//!
//! Sandstone is a complete server implementation with:
//! - Length-prefixed binary protocol, safe for arbitrary payloads
//! - Single-threaded event loop driving non-blocking connections
//! - Reader pool for concurrent reads, one writer thread serializing
//!   every mutation
//! - Ordered key-value and hash-map storage over a lock-free skip list
//! - Slot-based key placement with online migration between servers
//! - IP allow/deny filtering and password authentication
//!
//! ## Example
//!
//! ```no_run
//! use sandstone::server::{Config, NetworkServer};
//!
//! fn main() -> sandstone::Result<()> {
//!     let config = Config::default();
//!     let mut server = NetworkServer::new(config)?;
//!     server.run()
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/sandstone/0.1.0")]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::all,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]
#![allow(clippy::module_name_repetitions)]

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Process lifecycle: arguments, pid file, daemonization.
pub mod app;
/// Blocking wire client, used for migration and tooling.
pub mod client;
/// Command table and dispatch machinery.
pub mod commands;
/// Error types and result aliases.
pub mod error;
/// Wire format: request parsing and response framing.
pub mod protocol;
/// Reactor, worker pools, and connection management.
pub mod server;
/// Slot placement and migration between servers.
pub mod slots;
/// Ordered key-value and hash-map storage engine.
pub mod storage;

// ─────────────────────────────────────────────────────────────────────────────
// Common Re-exports
// ─────────────────────────────────────────────────────────────────────────────

// Error handling
pub use error::{Error, Result};

// Protocol
pub use protocol::{Request, RequestParser, Response};

// Server
pub use server::{Config, NetworkServer};

// Storage
pub use storage::Store;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port.
pub const DEFAULT_PORT: u16 = 8888;

/// Maximum size of a single request packet (128 MiB).
pub const MAX_PACKET_SIZE: usize = 128 * 1024 * 1024;

/// Maximum decimal digits in a field length header.
pub const MAX_LENGTH_HEADER: usize = 20;

/// Default number of reader pool threads.
pub const DEFAULT_READER_THREADS: usize = 10;

/// The writer pool always has exactly one thread.
pub const WRITER_THREADS: usize = 1;
