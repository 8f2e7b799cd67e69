//! Response accumulation and reply conventions.
//!
//! Every reply starts with a status field (`ok`, `not_found`, `error`,
//! `fail`, `client_error`, `noauth`) followed by payload fields. Handlers
//! build replies through the helpers here; the reactor serializes the
//! finished response into the connection's output buffer.

use bytes::Bytes;

/// Status code fields, always field 0 of a reply.
pub mod status {
    /// Success.
    pub const OK: &[u8] = b"ok";
    /// Key (or element) does not exist.
    pub const NOT_FOUND: &[u8] = b"not_found";
    /// Server-side failure executing the command.
    pub const ERROR: &[u8] = b"error";
    /// Operation understood but refused.
    pub const FAIL: &[u8] = b"fail";
    /// The client sent a malformed or unknown command.
    pub const CLIENT_ERROR: &[u8] = b"client_error";
    /// Authentication required or rejected.
    pub const NOAUTH: &[u8] = b"noauth";
}

/// An ordered sequence of byte fields being accumulated by a handler.
///
/// Append-only; flushed into the connection's output buffer and then
/// discarded.
#[derive(Debug, Default)]
pub struct Response {
    fields: Vec<Bytes>,
}

impl Response {
    /// Create an empty response.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append one field.
    #[inline]
    pub fn push(&mut self, field: impl Into<Bytes>) {
        self.fields.push(field.into());
    }

    /// Append one field copied out of a borrowed slice.
    #[inline]
    pub fn push_slice(&mut self, field: &[u8]) {
        self.fields.push(Bytes::copy_from_slice(field));
    }

    /// Append an integer as its decimal ASCII form.
    #[inline]
    pub fn push_int(&mut self, n: i64) {
        let mut buf = itoa::Buffer::new();
        self.fields.push(Bytes::copy_from_slice(buf.format(n).as_bytes()));
    }

    /// `["ok"]`
    pub fn ok(&mut self) {
        self.push(status::OK);
    }

    /// `["not_found"]`
    pub fn not_found(&mut self) {
        self.push(status::NOT_FOUND);
    }

    /// `["error", msg]`
    pub fn error(&mut self, msg: impl Into<Bytes>) {
        self.push(status::ERROR);
        self.push(msg);
    }

    /// `["fail", msg]`
    pub fn fail(&mut self, msg: impl Into<Bytes>) {
        self.push(status::FAIL);
        self.push(msg);
    }

    /// `["client_error", msg]`
    pub fn client_error(&mut self, msg: impl Into<Bytes>) {
        self.push(status::CLIENT_ERROR);
        self.push(msg);
    }

    /// `["noauth", msg]`
    pub fn noauth(&mut self, msg: impl Into<Bytes>) {
        self.push(status::NOAUTH);
        self.push(msg);
    }

    /// `["ok", "1"]` or `["ok", "0"]`
    pub fn reply_bool(&mut self, val: bool) {
        self.ok();
        self.push(if val { &b"1"[..] } else { &b"0"[..] });
    }

    /// `["ok", n]`
    pub fn reply_int(&mut self, val: i64) {
        self.ok();
        self.push_int(val);
    }

    /// `["ok", value]` or `["not_found"]`
    pub fn reply_get(&mut self, val: Option<Bytes>) {
        match val {
            Some(v) => {
                self.ok();
                self.push(v);
            }
            None => self.not_found(),
        }
    }

    /// Fields in append order.
    #[inline]
    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    /// Number of fields appended so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if nothing has been appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Drop all fields, keeping capacity.
    pub fn clear(&mut self) {
        self.fields.clear();
    }
}
