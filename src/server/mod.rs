//! Reactor, worker pools, and connection management.
//!
//! One thread owns every socket. Commands classified for a pool leave the
//! loop as [`Job`]s carrying their connection with them and come back
//! through a waker; everything else runs inline between poll wakeups.

pub mod config;
pub mod context;
pub(crate) mod dump;
pub mod ip_filter;
pub mod link;
pub mod worker;

pub use config::{Config, LogLevel};
pub use context::ServerContext;
pub use link::{BlockingLink, Link};
pub use worker::WorkerPool;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, info, warn};

use crate::commands::{Job, ProcResult};
use crate::protocol::Request;
use crate::Result;

const LISTENER: Token = Token(0);
const READER_WAKER: Token = Token(1);
const WRITER_WAKER: Token = Token(2);

/// Client tokens start above the reserved ones.
const FIRST_CLIENT: usize = 3;

const POLL_TIMEOUT: Duration = Duration::from_millis(50);
const STATUS_EVERY: Duration = Duration::from_secs(300);

/// What one parse attempt on a ready connection produced.
enum ParseOutcome {
    /// Connection errored or sent garbage; tear it down.
    Dead,
    /// No full request buffered yet.
    NeedMore,
    /// One request, ready for dispatch.
    Ready(Request),
}

/// Stops a running [`NetworkServer`] from any thread.
///
/// Raises the shutdown flag and nudges the reactor out of its poll wait so
/// the stop takes effect immediately instead of on the next timeout.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            warn!(%err, "shutdown wake failed");
        }
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("raised", &self.flag.load(Ordering::SeqCst))
            .finish()
    }
}

/// The server: reactor loop, listener, pools, and every live connection.
pub struct NetworkServer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    readers: WorkerPool,
    writer: WorkerPool,
    links: HashMap<Token, Link>,
    /// Tokens to service this iteration.
    ready: Vec<Token>,
    /// Tokens queued for the next iteration.
    ready_next: Vec<Token>,
    /// Scratch copy of one poll batch.
    scratch: Vec<(Token, bool, bool)>,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
    /// Pool-completion waker shared by both pools, doubling as the
    /// shutdown nudge.
    waker: Arc<Waker>,
    last_status: Instant,
}

impl NetworkServer {
    /// Bind the listener and spawn the worker pools.
    pub fn new(config: Config) -> Result<Self> {
        let addr: SocketAddr = config.listen_addr().parse()?;
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        // mio supports a single Waker per Poll instance, so both pools
        // share one; a wake drains both completion queues
        let waker = Arc::new(Waker::new(poll.registry(), READER_WAKER)?);

        let ctx = Arc::new(ServerContext::new(&config));
        let readers = WorkerPool::new(
            "reader",
            config.readers,
            Arc::clone(&ctx),
            Arc::clone(&waker),
        )?;
        let writer = WorkerPool::new(
            "writer",
            crate::WRITER_THREADS,
            Arc::clone(&ctx),
            Arc::clone(&waker),
        )?;

        info!(%addr, readers = readers.size(), auth = ctx.need_auth(), "server listening");
        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            ctx,
            readers,
            writer,
            links: HashMap::new(),
            ready: Vec::new(),
            ready_next: Vec::new(),
            scratch: Vec::new(),
            next_token: FIRST_CLIENT,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
            last_status: Instant::now(),
        })
    }

    /// Shared context, mainly for tests and tooling.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Drive the reactor until the shutdown flag is raised.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            // skip the wait while connections still have buffered requests
            let timeout = if self.ready_next.is_empty() {
                POLL_TIMEOUT
            } else {
                Duration::ZERO
            };
            if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            self.scratch.clear();
            for event in self.events.iter() {
                self.scratch
                    .push((event.token(), event.is_readable(), event.is_writable()));
            }
            for i in 0..self.scratch.len() {
                let (token, readable, writable) = self.scratch[i];
                match token {
                    LISTENER => self.accept_ready(),
                    READER_WAKER | WRITER_WAKER => {
                        self.drain_readers();
                        self.drain_writer();
                    }
                    _ => self.client_event(token, readable, writable),
                }
            }

            std::mem::swap(&mut self.ready, &mut self.ready_next);
            for i in 0..self.ready.len() {
                let token = self.ready[i];
                self.proc_link(token);
            }
            self.ready.clear();

            if self.last_status.elapsed() >= STATUS_EVERY {
                self.last_status = Instant::now();
                info!(
                    links = self.ctx.link_count(),
                    total_calls = self.ctx.registry.total_calls(),
                    "status"
                );
            }
        }

        info!("shutting down");
        self.readers.shutdown();
        self.writer.shutdown();
        Ok(())
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: mio::net::TcpStream, addr: SocketAddr) {
        if !self.ctx.ip_filter.read().check_pass(addr.ip()) {
            info!(peer = %addr, "connection refused by ip filter");
            return; // dropping the stream closes it
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!(peer = %addr, %err, "could not watch new connection");
            return;
        }
        let mut link = Link::new(stream, addr, token);
        if let Err(err) = link.setup_socket() {
            debug!(peer = %addr, %err, "socket option setup failed");
        }
        link.set_interest(Some(Interest::READABLE));
        self.links.insert(token, link);
        self.ctx.incr_links();
        debug!(peer = %addr, ?token, "connection accepted");
    }

    fn drain_readers(&mut self) {
        while let Some(job) = self.readers.pop() {
            self.finish_job(job);
        }
    }

    fn drain_writer(&mut self) {
        while let Some(job) = self.writer.pop() {
            self.finish_job(job);
        }
    }

    /// Socket readiness for one client connection.
    fn client_event(&mut self, token: Token, readable: bool, writable: bool) {
        let mut queue = false;
        let mut clear_write = false;
        if let Some(link) = self.links.get_mut(&token) {
            if readable {
                match link.read() {
                    Ok(_) => {
                        if link.has_input() {
                            queue = true;
                        }
                    }
                    Err(err) => {
                        debug!(?token, %err, "read failed");
                        link.mark_error();
                        // never freed here; the ready pass reaps it
                        queue = true;
                    }
                }
            }
            if writable && !link.is_errored() {
                match link.flush() {
                    Ok(_) => {
                        if !link.wants_write() {
                            clear_write = true;
                        }
                    }
                    Err(err) => {
                        debug!(?token, %err, "flush failed");
                        link.mark_error();
                        queue = true;
                    }
                }
            }
        }
        if queue {
            self.ready_next.push(token);
        }
        if clear_write {
            self.rearm(token);
        }
    }

    /// Parse at most one request off a ready connection and dispatch it.
    /// One request per pass keeps a pipelining client from starving the
    /// rest; leftovers re-queue for the next iteration.
    fn proc_link(&mut self, token: Token) {
        let outcome = match self.links.get_mut(&token) {
            None => return,
            Some(link) if link.is_errored() => ParseOutcome::Dead,
            Some(link) => match link.recv() {
                Ok(Some(req)) => ParseOutcome::Ready(req),
                Ok(None) => ParseOutcome::NeedMore,
                Err(err) => {
                    debug!(?token, %err, "protocol error");
                    ParseOutcome::Dead
                }
            },
        };
        match outcome {
            ParseOutcome::Dead => self.destroy(token),
            ParseOutcome::NeedMore => self.rearm(token),
            ParseOutcome::Ready(req) => self.dispatch(token, req),
        }
    }

    /// Route one request: answer the auth gate and registry misses right
    /// here, run inline commands, hand pool commands their connection.
    fn dispatch(&mut self, token: Token, req: Request) {
        let Some(link) = self.links.remove(&token) else {
            return;
        };
        let mut job = Job::new(link, req);
        // the fd leaves the poll set while its job is in flight, which is
        // what bounds each connection to one job at a time
        if let Err(err) = self.poll.registry().deregister(job.link.stream_mut()) {
            debug!(?token, %err, "deregister failed");
        }
        job.link.set_interest(None);

        let name = job.req.cmd();
        if self.ctx.need_auth() && !job.link.is_authed() && name != b"auth" {
            job.resp.noauth("authentication required");
            job.link.send(&job.resp);
            self.finish_job(job);
            return;
        }

        let Some(cmd) = self.ctx.registry.get(name).cloned() else {
            let msg = format!("Unknown Command: {}", String::from_utf8_lossy(name));
            job.resp.client_error(msg);
            job.link.send(&job.resp);
            self.finish_job(job);
            return;
        };
        if !cmd.check_arity(job.req.len()) {
            job.resp.client_error("wrong number of arguments");
            job.link.send(&job.resp);
            self.finish_job(job);
            return;
        }

        let flags = cmd.flags;
        job.cmd = Some(cmd);
        if flags.is_threaded() {
            if flags.is_write() {
                self.writer.push(job);
            } else {
                self.readers.push(job);
            }
            return; // completion arrives through the waker
        }

        job.run(&self.ctx);
        job.link.send(&job.resp);
        self.finish_job(job);
    }

    /// Post-execution bookkeeping shared by the inline path and the pool
    /// drain: stats, teardown on failure, backend handoff, or flush and
    /// re-arm.
    fn finish_job(&mut self, mut job: Job) {
        if let Some(cmd) = &job.cmd {
            cmd.record(job.time_wait(), job.time_proc());
        }
        let token = job.link.token();
        match std::mem::replace(&mut job.result, ProcResult::Ok) {
            ProcResult::Error => {
                info!(?token, peer = %job.link.remote_addr(), "processing failed, dropping connection");
                self.ctx.decr_links();
            }
            ProcResult::Backend(takeover) => {
                debug!(?token, "connection handed to a backend thread");
                self.ctx.decr_links();
                takeover(job.link);
            }
            ProcResult::Ok => {
                if let Err(err) = job.link.flush() {
                    debug!(?token, %err, "flush failed, dropping connection");
                    self.ctx.decr_links();
                    return;
                }
                let more_input = job.link.has_input();
                let interest = if job.link.wants_write() {
                    Interest::READABLE.add(Interest::WRITABLE)
                } else {
                    Interest::READABLE
                };
                if let Err(err) =
                    self.poll
                        .registry()
                        .register(job.link.stream_mut(), token, interest)
                {
                    warn!(?token, %err, "re-register failed, dropping connection");
                    self.ctx.decr_links();
                    return;
                }
                job.link.set_interest(Some(interest));
                self.links.insert(token, job.link);
                if more_input {
                    self.ready_next.push(token);
                }
            }
        }
    }

    /// Point the poll interest at what the connection actually needs.
    fn rearm(&mut self, token: Token) {
        let Some(link) = self.links.get_mut(&token) else {
            return;
        };
        let interest = if link.wants_write() {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        };
        if link.interest() == Some(interest) {
            return;
        }
        match self
            .poll
            .registry()
            .reregister(link.stream_mut(), token, interest)
        {
            Ok(()) => link.set_interest(Some(interest)),
            Err(err) => {
                debug!(?token, %err, "reregister failed");
                link.mark_error();
                self.ready_next.push(token);
            }
        }
    }

    fn destroy(&mut self, token: Token) {
        if let Some(mut link) = self.links.remove(&token) {
            let _ = self.poll.registry().deregister(link.stream_mut());
            self.ctx.decr_links();
            debug!(?token, peer = %link.remote_addr(), "connection closed");
        }
    }
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("links", &self.links.len())
            .field("next_token", &self.next_token)
            .finish_non_exhaustive()
    }
}
