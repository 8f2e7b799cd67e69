//! Error types for sandstone.
//!
//! Transport and protocol failures tear the owning connection down;
//! everything else is answered on the wire and the connection stays usable.

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for sandstone operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sandstone.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed frame on the wire. The connection is closed without a
    /// response.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket read/write failure. The connection is closed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file or directive errors.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Storage engine errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Address parsing error.
    #[error("address parse error: {0}")]
    AddrParse(#[from] AddrParseError),

    /// Peer-server failure during slot migration.
    #[error("migration error: {0}")]
    Migrate(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Protocol-level errors while decoding the length-framed wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Length header starts with a non-digit byte.
    #[error("invalid length header byte: {0:#04x}")]
    BadLengthHeader(u8),

    /// Length header line longer than any representable field length.
    #[error("length header too long: {len} bytes (max: {max})")]
    HeaderTooLong {
        /// Actual header length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Declared field length exceeds the packet limit.
    #[error("field too large: {len} bytes (max: {max})")]
    FieldTooLarge {
        /// Declared field length
        len: u64,
        /// Maximum allowed length
        max: usize,
    },

    /// Field data is not followed by a record separator.
    #[error("missing field separator")]
    MissingSeparator,

    /// Buffered request bytes exceed the packet limit without completing
    /// a frame.
    #[error("packet too large: {size} bytes (max: {max})")]
    PacketTooLarge {
        /// Bytes buffered so far
        size: usize,
        /// Maximum allowed packet size
        max: usize,
    },

    /// Incomplete frame, need more data. Internal sentinel; the parser
    /// surface maps this to `Ok(None)`.
    #[error("incomplete frame, need more data")]
    Incomplete,
}

/// Configuration parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("config I/O error: {0}")]
    IoError(String),

    /// Parse error in the config file.
    #[error("config error at line {line}: {message}")]
    ParseError {
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },

    /// Directive value fails a startup validity check.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Storage engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Stored or supplied value is not a decimal integer.
    #[error("value is not an integer or out of range")]
    NotInteger,

    /// Increment would overflow i64.
    #[error("increment overflows")]
    Overflow,

    /// Keys and hash names must be non-empty.
    #[error("empty key")]
    EmptyKey,

    /// Key exceeds the encodable length.
    #[error("key too long: {len} > {max}")]
    KeyTooLong {
        /// Supplied length
        len: usize,
        /// Hard limit
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(ProtocolError::BadLengthHeader(b'x'));
        assert!(err.to_string().contains("protocol error"));

        let err = Error::from(StorageError::NotInteger);
        assert!(err.to_string().contains("not an integer"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_config_error_line_number() {
        let err = ConfigError::ParseError {
            line: 7,
            message: "bad port".to_string(),
        };
        assert!(err.to_string().contains("line 7"));
    }
}
