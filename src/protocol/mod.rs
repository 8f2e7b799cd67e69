//! Length-framed binary wire protocol.
//!
//! Each field on the wire is its decimal ASCII length, a newline, the raw
//! bytes, and a newline; a message ends with one empty line. The format is
//! binary-safe without escaping and parses incrementally from a byte
//! stream.

mod frame;
mod parser;
pub mod responses;

pub use frame::{encode_field, encode_message, encode_to_bytes, Request};
pub use parser::RequestParser;
pub use responses::{status, Response};
