//! Request frames and wire encoding.
//!
//! A message is a sequence of binary-safe fields. Each field is framed as
//! its decimal ASCII byte length, a newline, the raw bytes, and a trailing
//! newline; one empty line terminates the message. Fields may contain any
//! byte, including the delimiter.

use bytes::{BufMut, Bytes, BytesMut};

/// One fully-parsed request: ordered opaque byte fields, command name first.
///
/// Immutable once parsed. Fields are zero-copy slices of the packet the
/// parser consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    fields: Vec<Bytes>,
}

impl Request {
    /// Build a request from already-split fields.
    pub fn new(fields: Vec<Bytes>) -> Self {
        Self { fields }
    }

    /// Number of fields, command name included.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the request carries no fields at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field 0, the command name. Empty for an empty request.
    #[inline]
    pub fn cmd(&self) -> &[u8] {
        self.fields.first().map(|f| f.as_ref()).unwrap_or(b"")
    }

    /// Positional field access.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Bytes> {
        self.fields.get(idx)
    }

    /// All fields in order.
    #[inline]
    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    /// Field as UTF-8, if it is valid UTF-8.
    pub fn str_at(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).and_then(|f| std::str::from_utf8(f).ok())
    }

    /// Field parsed as a decimal integer.
    pub fn i64_at(&self, idx: usize) -> Option<i64> {
        self.str_at(idx).and_then(|s| s.trim().parse().ok())
    }
}

impl std::ops::Index<usize> for Request {
    type Output = Bytes;

    fn index(&self, idx: usize) -> &Bytes {
        &self.fields[idx]
    }
}

/// Append one framed field to `buf`.
#[inline]
pub fn encode_field(buf: &mut BytesMut, field: &[u8]) {
    let mut len = itoa::Buffer::new();
    buf.put_slice(len.format(field.len()).as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(field);
    buf.put_u8(b'\n');
}

/// Append a complete message (all fields plus the terminating empty line).
pub fn encode_message<'a, I>(buf: &mut BytesMut, fields: I)
where
    I: IntoIterator<Item = &'a [u8]>,
{
    for field in fields {
        encode_field(buf, field);
    }
    buf.put_u8(b'\n');
}

/// Encode a message into a fresh buffer.
pub fn encode_to_bytes<'a, I>(fields: I) -> Bytes
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut buf = BytesMut::new();
    encode_message(&mut buf, fields);
    buf.freeze()
}
