//! Incremental parser for the length-framed request protocol.
//!
//! Designed for:
//! - Streaming input (partial frames stay buffered until complete)
//! - Zero-copy field extraction (`Bytes` slices of the consumed packet)
//! - Bounded memory (header and packet size limits)
//!
//! Nothing is consumed from the buffer until a full request, terminator
//! included, is present; a malformed frame is unrecoverable.

use super::frame::Request;
use crate::error::ProtocolError;
use crate::{MAX_LENGTH_HEADER, MAX_PACKET_SIZE};
use bytes::BytesMut;
use memchr::memchr;

/// Streaming request parser.
///
/// # Usage
///
/// ```ignore
/// let mut parser = RequestParser::new();
/// parser.extend(data);
///
/// while let Some(req) = parser.parse()? {
///     // Handle request
/// }
/// ```
#[derive(Debug, Default)]
pub struct RequestParser {
    buffer: BytesMut,
}

impl RequestParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append raw socket bytes to the parse buffer.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// True if no bytes are buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Try to parse one complete request from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(request))` if a complete request was parsed (and consumed)
    /// - `Ok(None)` if more data is needed
    /// - `Err(e)` if the data is malformed
    pub fn parse(&mut self) -> Result<Option<Request>, ProtocolError> {
        match self.parse_request() {
            Ok(req) => Ok(Some(req)),
            Err(ProtocolError::Incomplete) => {
                if self.buffer.len() > MAX_PACKET_SIZE {
                    return Err(ProtocolError::PacketTooLarge {
                        size: self.buffer.len(),
                        max: MAX_PACKET_SIZE,
                    });
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Scan for one full request. Consumes nothing on `Incomplete`.
    fn parse_request(&mut self) -> Result<Request, ProtocolError> {
        let buf = &self.buffer[..];
        let mut pos = 0;

        // Empty lines before a request are tolerated and skipped.
        while pos < buf.len() && (buf[pos] == b'\n' || buf[pos] == b'\r') {
            pos += 1;
        }

        // (start, len) of each field body, relative to the buffer start.
        let mut fields: Vec<(usize, usize)> = Vec::new();

        loop {
            let rest = &buf[pos..];
            let nl = match memchr(b'\n', rest) {
                Some(nl) => nl,
                None => {
                    if rest.len() > MAX_LENGTH_HEADER {
                        return Err(ProtocolError::HeaderTooLong {
                            len: rest.len(),
                            max: MAX_LENGTH_HEADER,
                        });
                    }
                    return Err(ProtocolError::Incomplete);
                }
            };

            let mut head = &rest[..nl];
            if let [prefix @ .., b'\r'] = head {
                head = prefix;
            }
            let body_start = pos + nl + 1;

            // An empty line closes the request.
            if head.is_empty() {
                let packet = self.buffer.split_to(body_start).freeze();
                let fields = fields
                    .into_iter()
                    .map(|(start, len)| packet.slice(start..start + len))
                    .collect();
                return Ok(Request::new(fields));
            }

            if head.len() > MAX_LENGTH_HEADER {
                return Err(ProtocolError::HeaderTooLong {
                    len: head.len(),
                    max: MAX_LENGTH_HEADER,
                });
            }

            let mut body_len: u64 = 0;
            for &b in head {
                if !b.is_ascii_digit() {
                    return Err(ProtocolError::BadLengthHeader(b));
                }
                body_len = body_len * 10 + u64::from(b - b'0');
                // checked per digit: the accumulator never exceeds
                // 10 * MAX_PACKET_SIZE, which cannot overflow u64
                if body_len > MAX_PACKET_SIZE as u64 {
                    return Err(ProtocolError::FieldTooLarge {
                        len: body_len,
                        max: MAX_PACKET_SIZE,
                    });
                }
            }

            let body_len = body_len as usize;
            let body_end = body_start + body_len;
            if body_end > buf.len() {
                return Err(ProtocolError::Incomplete);
            }

            // The field body must be closed by '\n' or "\r\n".
            let sep = &buf[body_end..];
            let sep_len = match sep {
                [] => return Err(ProtocolError::Incomplete),
                [b'\n', ..] => 1,
                [b'\r'] => return Err(ProtocolError::Incomplete),
                [b'\r', b'\n', ..] => 2,
                _ => return Err(ProtocolError::MissingSeparator),
            };

            fields.push((body_start, body_len));
            pos = body_end + sep_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(data: &[u8]) -> Result<Option<Request>, ProtocolError> {
        let mut parser = RequestParser::new();
        parser.extend(data);
        parser.parse()
    }

    #[test]
    fn test_parse_simple_request() {
        let req = parse_one(b"3\nget\n3\nfoo\n\n").unwrap().unwrap();
        assert_eq!(req.len(), 2);
        assert_eq!(req.cmd(), b"get");
        assert_eq!(&req[1][..], b"foo");
    }

    #[test]
    fn test_parse_crlf_delimiters() {
        let req = parse_one(b"4\r\nping\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.len(), 1);
        assert_eq!(req.cmd(), b"ping");
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse_one(b"").unwrap().is_none());
        assert!(parse_one(b"3").unwrap().is_none());
        assert!(parse_one(b"3\nge").unwrap().is_none());
        assert!(parse_one(b"3\nget").unwrap().is_none());
        assert!(parse_one(b"3\nget\n").unwrap().is_none());
        // Terminator not yet received.
        assert!(parse_one(b"3\nget\n3\nfoo\n").unwrap().is_none());
    }

    #[test]
    fn test_incomplete_consumes_nothing() {
        let mut parser = RequestParser::new();
        parser.extend(b"3\nget\n3\nfo");
        assert!(parser.parse().unwrap().is_none());
        assert_eq!(parser.len(), 10);

        parser.extend(b"o\n\n");
        let req = parser.parse().unwrap().unwrap();
        assert_eq!(req.cmd(), b"get");
        assert!(parser.is_empty());
    }

    #[test]
    fn test_parse_binary_field_with_delimiter() {
        let req = parse_one(b"3\nset\n4\na\n\nb\n\n").unwrap().unwrap();
        assert_eq!(req.len(), 2);
        assert_eq!(&req[1][..], b"a\n\nb");
    }

    #[test]
    fn test_parse_empty_field() {
        let req = parse_one(b"3\nset\n1\nk\n0\n\n\n").unwrap().unwrap();
        assert_eq!(req.len(), 3);
        assert_eq!(&req[2][..], b"");
    }

    #[test]
    fn test_parse_skips_leading_blank_lines() {
        let req = parse_one(b"\n\r\n4\nping\n\n").unwrap().unwrap();
        assert_eq!(req.cmd(), b"ping");
    }

    #[test]
    fn test_parse_pipelined_requests() {
        let mut parser = RequestParser::new();
        parser.extend(b"4\nping\n\n4\nping\n\n");
        assert!(parser.parse().unwrap().is_some());
        assert!(parser.parse().unwrap().is_some());
        assert!(parser.parse().unwrap().is_none());
        assert!(parser.is_empty());
    }

    #[test]
    fn test_parse_bad_length_header() {
        let err = parse_one(b"x\nget\n\n").unwrap_err();
        assert_eq!(err, ProtocolError::BadLengthHeader(b'x'));
    }

    #[test]
    fn test_parse_missing_separator() {
        // Field body followed by junk instead of a delimiter.
        let err = parse_one(b"3\ngetXX").unwrap_err();
        assert_eq!(err, ProtocolError::MissingSeparator);
    }

    #[test]
    fn test_parse_header_too_long() {
        let err = parse_one(b"111111111111111111111111111111").unwrap_err();
        assert!(matches!(err, ProtocolError::HeaderTooLong { .. }));
    }

    #[test]
    fn test_parse_field_too_large() {
        let err = parse_one(b"999999999999\nx\n\n").unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTooLarge { .. }));
    }

    #[test]
    fn test_parse_length_wider_than_u64() {
        // twenty digits fit the header limit but not a u64
        let err = parse_one(b"99999999999999999999\nx\n\n").unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTooLarge { .. }));
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let wire = b"3\nset\n3\nkey\n5\nvalue\n\n";
        let mut parser = RequestParser::new();
        for &b in &wire[..wire.len() - 1] {
            parser.extend(&[b]);
            assert!(parser.parse().unwrap().is_none());
        }
        parser.extend(&wire[wire.len() - 1..]);
        let req = parser.parse().unwrap().unwrap();
        assert_eq!(req.len(), 3);
        assert_eq!(&req[2][..], b"value");
    }
}
