//! Blocking client for the length-framed protocol.
//!
//! Slot migration uses this to replay rows onto the destination server;
//! tests use it to drive a live server end to end.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::{encode_to_bytes, status, RequestParser};

/// One blocking connection to a server.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    parser: RequestParser,
}

impl Client {
    /// Connect with a timeout, which also becomes the socket read and
    /// write timeout.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            parser: RequestParser::new(),
        })
    }

    /// Send one request and block for its reply fields.
    pub fn request<'a, I>(&mut self, fields: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let msg = encode_to_bytes(fields);
        self.stream.write_all(&msg)?;

        let mut buf = [0u8; 16 * 1024];
        loop {
            if let Some(reply) = self.parser.parse()? {
                return Ok(reply.fields().to_vec());
            }
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            self.parser.extend(&buf[..n]);
        }
    }

    pub fn auth(&mut self, password: &str) -> Result<()> {
        let reply = self.request([&b"auth"[..], password.as_bytes()])?;
        expect_ok("auth", &reply)
    }

    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        let reply = self.request([&b"set"[..], key, val])?;
        expect_ok("set", &reply)
    }

    pub fn hset(&mut self, name: &[u8], field: &[u8], val: &[u8]) -> Result<()> {
        let reply = self.request([&b"hset"[..], name, field, val])?;
        expect_ok("hset", &reply)
    }
}

fn expect_ok(cmd: &str, reply: &[Bytes]) -> Result<()> {
    match reply.first() {
        Some(code) if code.as_ref() == status::OK => Ok(()),
        Some(code) => Err(Error::Migrate(format!(
            "{cmd} on peer answered {}",
            String::from_utf8_lossy(code)
        ))),
        None => Err(Error::Migrate(format!("{cmd} on peer answered nothing"))),
    }
}
