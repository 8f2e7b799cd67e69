//! Worker pools executing commands off the event loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::Waker;
use tracing::{debug, error};

use crate::commands::{CommandFlags, Job, ProcResult};
use crate::server::ServerContext;
use crate::Result;

/// A pool of threads running command handlers.
///
/// Jobs enter through an unbounded channel so the reactor never blocks on
/// [`push`](Self::push). Finished jobs queue on a done channel and the pool
/// wakes the reactor, which drains them with [`pop`](Self::pop). A pool of
/// size 1 processes jobs strictly in push order; the writer pool relies on
/// this for its serialization guarantee.
pub struct WorkerPool {
    name: &'static str,
    job_tx: Sender<Job>,
    done_rx: Receiver<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads sharing one job queue.
    pub fn new(
        name: &'static str,
        size: usize,
        ctx: Arc<ServerContext>,
        waker: Arc<Waker>,
    ) -> Result<Self> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (done_tx, done_rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let ctx = Arc::clone(&ctx);
            let waker = Arc::clone(&waker);
            let handle = thread::Builder::new()
                .name(format!("{name}-{id}"))
                .spawn(move || worker_main(name, id, &job_rx, &done_tx, &ctx, &waker))?;
            handles.push(handle);
        }
        Ok(Self {
            name,
            job_tx,
            done_rx,
            handles,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job for execution. Never blocks.
    pub fn push(&self, job: Job) {
        // the receiver outlives every push; send only fails after shutdown
        let _ = self.job_tx.send(job);
    }

    /// Take one finished job, if any.
    pub fn pop(&self) -> Option<Job> {
        self.done_rx.try_recv().ok()
    }

    /// Stop accepting jobs and join the worker threads.
    ///
    /// Queued jobs are still executed before the threads exit. Jobs
    /// pushed afterwards are silently discarded.
    pub fn shutdown(&mut self) {
        let (closed_tx, _) = unbounded::<Job>();
        drop(std::mem::replace(&mut self.job_tx, closed_tx));
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!(pool = self.name, "worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.handles.len())
            .finish()
    }
}

fn worker_main(
    pool: &'static str,
    id: usize,
    job_rx: &Receiver<Job>,
    done_tx: &Sender<Job>,
    ctx: &ServerContext,
    waker: &Waker,
) {
    debug!(pool, worker = id, "worker started");
    while let Ok(mut job) = job_rx.recv() {
        job.run(ctx);
        job.link.send(&job.resp);
        if job.has_flag(CommandFlags::READ) {
            // reads may answer straight from the worker; writes leave
            // socket I/O to the reactor
            if let Err(err) = job.link.flush() {
                debug!(pool, worker = id, error = %err, "flush failed");
                job.result = ProcResult::Error;
            }
        }
        if done_tx.send(job).is_err() {
            break;
        }
        if let Err(err) = waker.wake() {
            error!(pool, worker = id, error = %err, "reactor wake failed");
        }
    }
    debug!(pool, worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::protocol::{Request, Response};
    use crate::server::config::Config;
    use crate::server::link::Link;
    use bytes::Bytes;
    use mio::{Poll, Token};
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    static SEEN: Mutex<Vec<i64>> = Mutex::new(Vec::new());

    fn record_order(
        _ctx: &ServerContext,
        _link: &mut Link,
        req: &Request,
        resp: &mut Response,
    ) -> ProcResult {
        SEEN.lock().push(req.i64_at(1).unwrap());
        resp.ok();
        ProcResult::Ok
    }

    fn reply_ok(
        _ctx: &ServerContext,
        _link: &mut Link,
        _req: &Request,
        resp: &mut Response,
    ) -> ProcResult {
        resp.ok();
        ProcResult::Ok
    }

    fn test_link(token: usize) -> Link {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(client);
        Link::new(stream, addr, Token(token))
    }

    fn drain(pool: &WorkerPool, want: usize) -> Vec<Job> {
        let mut jobs = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while jobs.len() < want && Instant::now() < deadline {
            match pool.pop() {
                Some(job) => jobs.push(job),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        jobs
    }

    #[test]
    fn single_thread_pool_preserves_push_order() {
        SEEN.lock().clear();
        let ctx = Arc::new(ServerContext::new(&Config::default()));
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let mut pool = WorkerPool::new("writer", 1, Arc::clone(&ctx), waker).unwrap();

        let cmd = Arc::new(Command::new(
            "touch",
            2,
            2,
            CommandFlags::write(),
            record_order,
        ));
        let count = 16;
        for i in 0..count {
            let req = Request::new(vec![
                Bytes::from_static(b"touch"),
                Bytes::from(i.to_string()),
            ]);
            let mut job = Job::new(test_link(100 + i as usize), req);
            job.cmd = Some(Arc::clone(&cmd));
            pool.push(job);
        }

        let jobs = drain(&pool, count as usize);
        assert_eq!(jobs.len(), count as usize);
        assert_eq!(*SEEN.lock(), (0..count).collect::<Vec<i64>>());
        assert_eq!(cmd.calls(), count as u64);
        pool.shutdown();
    }

    #[test]
    fn finished_jobs_carry_the_response() {
        let ctx = Arc::new(ServerContext::new(&Config::default()));
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let mut pool = WorkerPool::new("reader", 2, Arc::clone(&ctx), waker).unwrap();

        let cmd = Arc::new(Command::new(
            "touch",
            1,
            -1,
            CommandFlags::write(),
            reply_ok,
        ));
        let req = Request::new(vec![Bytes::from_static(b"touch"), Bytes::from_static(b"7")]);
        let mut job = Job::new(test_link(200), req);
        job.cmd = Some(Arc::clone(&cmd));
        pool.push(job);

        let jobs = drain(&pool, 1);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].resp.fields()[0].as_ref(), b"ok");
        // write commands leave the serialized response for the reactor
        assert!(jobs[0].link.wants_write());
        pool.shutdown();
    }
}
