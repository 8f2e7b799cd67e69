//! A request bound to the connection it arrived on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::commands::{Command, CommandFlags, ProcResult};
use crate::protocol::{Request, Response};
use crate::server::link::Link;
use crate::server::ServerContext;

/// One request travelling through the server.
///
/// The Job owns the [`Link`] while the connection is detached from the
/// reactor; result processing moves the link back into the connection
/// table. At most one Job exists per connection at any time.
pub struct Job {
    /// The connection, owned for the duration of the job.
    pub link: Link,
    /// The parsed request.
    pub req: Request,
    /// Response under construction.
    pub resp: Response,
    /// Resolved command; `None` when dispatch answered without a handler.
    pub cmd: Option<Arc<Command>>,
    /// Handler outcome.
    pub result: ProcResult,
    stime: Instant,
    time_wait: Duration,
    time_proc: Duration,
}

impl Job {
    pub fn new(link: Link, req: Request) -> Self {
        Self {
            link,
            req,
            resp: Response::new(),
            cmd: None,
            result: ProcResult::Ok,
            stime: Instant::now(),
            time_wait: Duration::ZERO,
            time_proc: Duration::ZERO,
        }
    }

    /// Run the resolved handler, timing queue wait and execution.
    ///
    /// Called from a worker thread for pool commands and from the reactor
    /// for inline ones. A job without a resolved command already carries
    /// its response and is left untouched. The caller serializes
    /// `self.resp` onto the link afterwards.
    pub fn run(&mut self, ctx: &ServerContext) {
        let cmd = match &self.cmd {
            Some(cmd) => Arc::clone(cmd),
            None => return,
        };
        self.time_wait = self.stime.elapsed();
        self.result = (cmd.handler)(ctx, &mut self.link, &self.req, &mut self.resp);
        self.time_proc = self.stime.elapsed().saturating_sub(self.time_wait);
    }

    /// Queue-wait time, from job creation to handler entry.
    pub fn time_wait(&self) -> Duration {
        self.time_wait
    }

    /// Handler execution time.
    pub fn time_proc(&self) -> Duration {
        self.time_proc
    }

    /// Whether the resolved command carries the given flag.
    pub fn has_flag(&self, flag: CommandFlags) -> bool {
        self.cmd.as_ref().is_some_and(|cmd| cmd.flags.contains(flag))
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("token", &self.link.token())
            .field("cmd", &self.cmd.as_ref().map(|cmd| cmd.name))
            .field("result", &self.result)
            .finish()
    }
}
