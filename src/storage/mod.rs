//! Storage engine.
//!
//! One ordered map holds every row. A one-byte type tag plus, for
//! slot-addressable rows, a big-endian slot id prefix each key, which
//! keeps a slot's rows contiguous for range discovery and migration.

mod codec;
mod store;

pub use store::Store;
