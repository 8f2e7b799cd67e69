//! Command table and dispatch machinery.
//!
//! Every command declares how the reactor must run it through
//! [`CommandFlags`]: directly on the event loop, on the shared reader pool,
//! or on the single writer thread that serializes all mutations. A [`Job`]
//! carries the connection through a pool and back to the reactor.

mod job;
mod registry;

pub mod hash;
pub mod kv;
pub mod server_cmds;
pub mod slots_cmds;

pub use job::Job;
pub use registry::{Command, CommandRegistry};

use crate::protocol::{Request, Response};
use crate::server::link::Link;
use crate::server::ServerContext;

/// Handler signature shared by every command.
pub type Proc = fn(&ServerContext, &mut Link, &Request, &mut Response) -> ProcResult;

/// Connection takeover installed by a `BACKEND` command.
///
/// The reactor invokes the closure with the [`Link`] after removing it from
/// the connection table; the closure owns the connection from then on.
pub type Takeover = Box<dyn FnOnce(Link) + Send + 'static>;

/// Outcome of a command handler.
pub enum ProcResult {
    /// Response is complete; the connection stays under reactor control.
    Ok,
    /// The connection is in an unrecoverable state and must be dropped.
    Error,
    /// The connection leaves the reactor; the takeover owns it from here.
    Backend(Takeover),
}

impl std::fmt::Debug for ProcResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcResult::Ok => f.write_str("Ok"),
            ProcResult::Error => f.write_str("Error"),
            ProcResult::Backend(_) => f.write_str("Backend(..)"),
        }
    }
}

bitflags::bitflags! {
    /// Dispatch flags for a command.
    ///
    /// Uses bitflags for compact representation (1 byte vs 4 for booleans).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        /// Command only reads data.
        const READ    = 1 << 0;
        /// Command mutates data.
        const WRITE   = 1 << 1;
        /// Command hands the connection over to its own thread.
        const BACKEND = 1 << 2;
        /// Command runs on a worker pool instead of the event loop.
        const THREAD  = 1 << 3;
    }
}

impl CommandFlags {
    /// Flags for read commands executed on the reader pool.
    #[inline]
    pub const fn read() -> Self {
        Self::READ.union(Self::THREAD)
    }

    /// Flags for write commands executed on the writer thread.
    #[inline]
    pub const fn write() -> Self {
        Self::WRITE.union(Self::THREAD)
    }

    /// Flags for lightweight commands executed directly on the event loop.
    #[inline]
    pub const fn inline() -> Self {
        Self::READ
    }

    /// Flags for commands that detach the connection onto a backend thread.
    #[inline]
    pub const fn backend() -> Self {
        Self::READ.union(Self::BACKEND)
    }

    /// True when the command must leave the event loop.
    #[inline]
    pub const fn is_threaded(self) -> bool {
        self.contains(Self::THREAD)
    }

    /// True when the command belongs on the writer thread.
    #[inline]
    pub const fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

/// Optional delta argument, defaulting when absent. `None` means the
/// field is present but not a decimal integer.
pub(crate) fn opt_delta(req: &Request, idx: usize, default: i64) -> Option<i64> {
    match req.get(idx) {
        None => Some(default),
        Some(_) => req.i64_at(idx),
    }
}

/// Result-count limit argument. `None` for anything but a non-negative
/// decimal integer.
pub(crate) fn parse_limit(req: &Request, idx: usize) -> Option<usize> {
    req.i64_at(idx).and_then(|n| usize::try_from(n).ok())
}
