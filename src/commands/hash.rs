//! Hash-map commands.

use crate::commands::{opt_delta, parse_limit, Command, CommandFlags, CommandRegistry, ProcResult};
use crate::protocol::{Request, Response};
use crate::server::link::Link;
use crate::server::ServerContext;

pub fn register(registry: &mut CommandRegistry) {
    registry.register(Command::new("hget", 3, 3, CommandFlags::read(), hget));
    registry.register(Command::new("hset", 4, 4, CommandFlags::write(), hset));
    registry.register(Command::new("hdel", 3, 3, CommandFlags::write(), hdel));
    registry.register(Command::new("hincr", 3, 4, CommandFlags::write(), hincr));
    registry.register(Command::new("hsize", 2, 2, CommandFlags::read(), hsize));
    registry.register(Command::new("hgetall", 2, 2, CommandFlags::read(), hgetall));
    registry.register(Command::new("hscan", 5, 5, CommandFlags::read(), hscan));
    registry.register(Command::new("hclear", 2, 2, CommandFlags::write(), hclear));
}

fn hget(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.reply_get(ctx.store.hget(&req[1], &req[2]));
    ProcResult::Ok
}

fn hset(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    match ctx.store.hset(&req[1], &req[2], req[3].clone()) {
        Ok(created) => resp.reply_bool(created),
        Err(err) => resp.error(err.to_string()),
    }
    ProcResult::Ok
}

fn hdel(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    match ctx.store.hdel(&req[1], &req[2]) {
        Ok(existed) => resp.reply_bool(existed),
        Err(err) => resp.error(err.to_string()),
    }
    ProcResult::Ok
}

fn hincr(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let Some(delta) = opt_delta(req, 3, 1) else {
        resp.client_error("invalid delta");
        return ProcResult::Ok;
    };
    match ctx.store.hincr(&req[1], &req[2], delta) {
        Ok(n) => resp.reply_int(n),
        Err(err) => resp.error(err.to_string()),
    }
    ProcResult::Ok
}

fn hsize(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.reply_int(ctx.store.hsize(&req[1]));
    ProcResult::Ok
}

fn hgetall(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.ok();
    for (field, val) in ctx.store.hgetall(&req[1]) {
        resp.push(field);
        resp.push(val);
    }
    ProcResult::Ok
}

fn hscan(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let Some(limit) = parse_limit(req, 4) else {
        resp.client_error("invalid limit");
        return ProcResult::Ok;
    };
    resp.ok();
    for (field, val) in ctx.store.hscan(&req[1], &req[2], &req[3], limit) {
        resp.push(field);
        resp.push(val);
    }
    ProcResult::Ok
}

fn hclear(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let removed = ctx.store.hclear(&req[1]);
    resp.reply_int(removed as i64);
    ProcResult::Ok
}
