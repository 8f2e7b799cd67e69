//! Administrative commands: liveness, stats, authentication, the live
//! IP filter, and the streaming dump.

use bytes::Bytes;

use crate::commands::{parse_limit, Command, CommandFlags, CommandRegistry, ProcResult};
use crate::protocol::{Request, Response};
use crate::server::dump;
use crate::server::link::Link;
use crate::server::ServerContext;
use crate::VERSION;

pub fn register(registry: &mut CommandRegistry) {
    registry.register(Command::new("ping", 1, -1, CommandFlags::inline(), ping));
    registry.register(Command::new("info", 1, 2, CommandFlags::inline(), info));
    registry.register(Command::new("auth", 2, 2, CommandFlags::inline(), auth));
    registry.register(Command::new("dump", 1, 4, CommandFlags::backend(), dump_cmd));
    registry.register(Command::new("list_allow_ip", 1, 1, CommandFlags::inline(), list_allow_ip));
    registry.register(Command::new("add_allow_ip", 2, 2, CommandFlags::inline(), add_allow_ip));
    registry.register(Command::new("del_allow_ip", 2, 2, CommandFlags::inline(), del_allow_ip));
    registry.register(Command::new("list_deny_ip", 1, 1, CommandFlags::inline(), list_deny_ip));
    registry.register(Command::new("add_deny_ip", 2, 2, CommandFlags::inline(), add_deny_ip));
    registry.register(Command::new("del_deny_ip", 2, 2, CommandFlags::inline(), del_deny_ip));
}

fn ping(_ctx: &ServerContext, _link: &mut Link, _req: &Request, resp: &mut Response) -> ProcResult {
    resp.ok();
    ProcResult::Ok
}

fn info(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.ok();
    resp.push_slice(b"sandstone-server");
    resp.push(VERSION);
    resp.push_slice(b"links");
    resp.push_int(i64::from(ctx.link_count()));
    resp.push_slice(b"total_calls");
    resp.push_int(ctx.registry.total_calls() as i64);

    if req.get(1).is_some_and(|topic| topic.as_ref() == b"cmd") {
        for cmd in ctx.registry.commands() {
            resp.push(format!("cmd.{}", cmd.name));
            resp.push(format!(
                "calls: {} time_wait: {} time_proc: {}",
                cmd.calls(),
                cmd.time_wait_us(),
                cmd.time_proc_us()
            ));
        }
    }
    ProcResult::Ok
}

fn auth(ctx: &ServerContext, link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    if !ctx.need_auth() {
        resp.error("no password is set");
    } else if ctx.check_password(&req[1]) {
        link.set_authed();
        resp.reply_bool(true);
    } else {
        resp.error("invalid password");
    }
    ProcResult::Ok
}

fn dump_cmd(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let start = req.get(1).cloned().unwrap_or_else(Bytes::new);
    let end = req.get(2).cloned().unwrap_or_else(Bytes::new);
    let limit = match req.get(3) {
        None => None,
        Some(_) => match parse_limit(req, 3) {
            Some(n) => Some(n),
            None => {
                resp.client_error("invalid limit");
                return ProcResult::Ok;
            }
        },
    };
    ProcResult::Backend(dump::takeover(ctx.store.clone(), start, end, limit))
}

// The filter mutation commands bypass authentication state on purpose;
// reaching them requires being on the machine already.
fn require_local(link: &Link, resp: &mut Response) -> bool {
    if link.remote_ip().is_loopback() {
        return true;
    }
    resp.noauth("this command is only available from 127.0.0.1");
    false
}

fn list_allow_ip(
    ctx: &ServerContext,
    link: &mut Link,
    _req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if require_local(link, resp) {
        resp.ok();
        let filter = ctx.ip_filter.read();
        if filter.allows_all() {
            resp.push_slice(b"all");
        }
        for rule in filter.allow_rules() {
            resp.push_slice(rule.as_bytes());
        }
    }
    ProcResult::Ok
}

fn add_allow_ip(
    ctx: &ServerContext,
    link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if require_local(link, resp) {
        match req.str_at(1) {
            Some(rule) => {
                ctx.ip_filter.write().add_allow(rule);
                resp.ok();
            }
            None => resp.client_error("invalid ip rule"),
        }
    }
    ProcResult::Ok
}

fn del_allow_ip(
    ctx: &ServerContext,
    link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if require_local(link, resp) {
        match req.str_at(1) {
            Some(rule) => {
                ctx.ip_filter.write().del_allow(rule);
                resp.ok();
            }
            None => resp.client_error("invalid ip rule"),
        }
    }
    ProcResult::Ok
}

fn list_deny_ip(
    ctx: &ServerContext,
    link: &mut Link,
    _req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if require_local(link, resp) {
        resp.ok();
        let filter = ctx.ip_filter.read();
        if !filter.allows_all() {
            resp.push_slice(b"all");
        }
        for rule in filter.deny_rules() {
            resp.push_slice(rule.as_bytes());
        }
    }
    ProcResult::Ok
}

fn add_deny_ip(
    ctx: &ServerContext,
    link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if require_local(link, resp) {
        match req.str_at(1) {
            Some(rule) => {
                ctx.ip_filter.write().add_deny(rule);
                resp.ok();
            }
            None => resp.client_error("invalid ip rule"),
        }
    }
    ProcResult::Ok
}

fn del_deny_ip(
    ctx: &ServerContext,
    link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if require_local(link, resp) {
        match req.str_at(1) {
            Some(rule) => {
                ctx.ip_filter.write().del_deny(rule);
                resp.ok();
            }
            None => resp.client_error("invalid ip rule"),
        }
    }
    ProcResult::Ok
}
