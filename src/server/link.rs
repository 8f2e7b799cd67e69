//! Client connection state.
//!
//! A `Link` owns one socket, its receive and send buffers, and the protocol
//! parser. While registered with the multiplexer it belongs to the reactor;
//! while a job is in flight it is owned by that job; the two never overlap.
//!
//! `send` only appends to the output buffer. `flush` performs the actual
//! non-blocking writes. Reads and writes always run until `WouldBlock`
//! because readiness is edge-style.

use crate::protocol::{encode_message, Request, RequestParser, Response};
use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};

/// Read chunk size per syscall.
const READ_CHUNK: usize = 16 * 1024;

/// One client connection.
#[derive(Debug)]
pub struct Link {
    stream: TcpStream,
    token: Token,
    remote_addr: SocketAddr,
    parser: RequestParser,
    output: BytesMut,
    authed: bool,
    errored: bool,
    /// Interest currently registered with the multiplexer, if any.
    /// Maintained by the reactor only.
    interest: Option<Interest>,
}

impl Link {
    /// Wrap a freshly accepted non-blocking stream.
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, token: Token) -> Self {
        Self {
            stream,
            token,
            remote_addr,
            parser: RequestParser::new(),
            output: BytesMut::with_capacity(8 * 1024),
            authed: false,
            errored: false,
            interest: None,
        }
    }

    /// Enable TCP keepalive and nodelay on the accepted socket.
    pub fn setup_socket(&self) -> io::Result<()> {
        self.stream.set_nodelay(true)?;
        let fd = self.stream.as_raw_fd();
        let opt: libc::c_int = 1;
        // SAFETY: fd is a valid open socket for the lifetime of this call,
        // and SO_KEEPALIVE takes an int-sized option value.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                std::ptr::addr_of!(opt).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Multiplexer token assigned at accept time.
    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Mutable stream handle for multiplexer registration.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Remote peer address.
    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Remote peer IP, used by loopback-restricted commands.
    #[inline]
    pub fn remote_ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    /// True once `auth` has succeeded on this connection.
    #[inline]
    pub fn is_authed(&self) -> bool {
        self.authed
    }

    /// Record a successful authentication. Idempotent.
    pub fn set_authed(&mut self) {
        self.authed = true;
    }

    /// Mark the connection as failed, to be reaped by the reactor. Never
    /// closes the socket synchronously.
    pub fn mark_error(&mut self) {
        self.errored = true;
    }

    /// True if the connection has been marked failed.
    #[inline]
    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Interest currently registered with the multiplexer.
    #[inline]
    pub fn interest(&self) -> Option<Interest> {
        self.interest
    }

    /// Record the multiplexer registration state. Reactor-only.
    pub fn set_interest(&mut self, interest: Option<Interest>) {
        self.interest = interest;
    }

    /// Read all available bytes into the input buffer.
    ///
    /// Returns the number of bytes appended. A peer close maps to
    /// `UnexpectedEof`; any hard error is returned as-is. `WouldBlock`
    /// ends the loop normally.
    pub fn read(&mut self) -> io::Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    ));
                }
                Ok(n) => {
                    self.parser.extend(&chunk[..n]);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Try to extract one complete request from the input buffer.
    pub fn recv(&mut self) -> Result<Option<Request>, ProtocolError> {
        self.parser.parse()
    }

    /// Append a response to the output buffer. No socket I/O.
    pub fn send(&mut self, resp: &Response) {
        if resp.is_empty() {
            return;
        }
        encode_message(&mut self.output, resp.fields().iter().map(|f| f.as_ref()));
    }

    /// Flush buffered output, non-blocking.
    ///
    /// Returns bytes written; a partial write leaves the remainder
    /// buffered.
    pub fn flush(&mut self) -> io::Result<usize> {
        let mut total = 0;
        while !self.output.is_empty() {
            match self.stream.write(&self.output) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket write returned zero",
                    ));
                }
                Ok(n) => {
                    self.output.advance(n);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// True if unconsumed request bytes are buffered (pipelining).
    #[inline]
    pub fn has_input(&self) -> bool {
        !self.parser.is_empty()
    }

    /// True if unflushed response bytes are buffered.
    #[inline]
    pub fn wants_write(&self) -> bool {
        !self.output.is_empty()
    }

    /// Switch to blocking I/O for a collaborator that owns this connection
    /// on a dedicated thread. The fd must already be deregistered from the
    /// multiplexer.
    pub fn into_blocking(self) -> io::Result<BlockingLink> {
        let fd = self.stream.into_raw_fd();
        // SAFETY: into_raw_fd transfers ownership of a valid open socket;
        // exactly one std TcpStream is constructed from it.
        let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        stream.set_nonblocking(false)?;
        Ok(BlockingLink {
            stream,
            output: self.output,
        })
    }
}

/// A connection handed off to a backend thread, in blocking mode.
///
/// Used by the streaming dump: the reactor forgets the fd and the owning
/// thread drives it synchronously until the client disconnects.
#[derive(Debug)]
pub struct BlockingLink {
    stream: std::net::TcpStream,
    output: BytesMut,
}

impl BlockingLink {
    /// Append a raw field sequence to the output buffer.
    pub fn send_fields<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        encode_message(&mut self.output, fields);
    }

    /// Bytes currently buffered for write.
    #[inline]
    pub fn pending(&self) -> usize {
        self.output.len()
    }

    /// Write the whole output buffer, blocking until done.
    pub fn flush_all(&mut self) -> io::Result<()> {
        self.stream.write_all(&self.output)?;
        self.output.clear();
        Ok(())
    }

    /// Block until the peer closes the connection, discarding anything it
    /// sends.
    pub fn wait_close(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
