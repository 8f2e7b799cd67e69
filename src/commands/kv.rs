//! Plain key-value commands.

use crate::commands::{opt_delta, parse_limit, Command, CommandFlags, CommandRegistry, ProcResult};
use crate::protocol::{Request, Response};
use crate::server::link::Link;
use crate::server::ServerContext;

pub fn register(registry: &mut CommandRegistry) {
    registry.register(Command::new("get", 2, 2, CommandFlags::read(), get));
    registry.register(Command::new("set", 3, 3, CommandFlags::write(), set));
    registry.register(Command::new("setnx", 3, 3, CommandFlags::write(), setnx));
    registry.register(Command::new("del", 2, 2, CommandFlags::write(), del));
    registry.register(Command::new("exists", 2, 2, CommandFlags::read(), exists));
    registry.register(Command::new("incr", 2, 3, CommandFlags::write(), incr));
    registry.register(Command::new("decr", 2, 3, CommandFlags::write(), decr));
    registry.register(Command::new("multi_get", 2, -1, CommandFlags::read(), multi_get));
    registry.register(Command::new("scan", 4, 4, CommandFlags::read(), scan));
    registry.register(Command::new("rscan", 4, 4, CommandFlags::read(), rscan));
}

fn get(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.reply_get(ctx.store.get(&req[1]));
    ProcResult::Ok
}

fn set(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    match ctx.store.set(&req[1], req[2].clone()) {
        Ok(()) => resp.reply_bool(true),
        Err(err) => resp.error(err.to_string()),
    }
    ProcResult::Ok
}

fn setnx(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    match ctx.store.setnx(&req[1], req[2].clone()) {
        Ok(created) => resp.reply_bool(created),
        Err(err) => resp.error(err.to_string()),
    }
    ProcResult::Ok
}

fn del(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.reply_bool(ctx.store.del(&req[1]));
    ProcResult::Ok
}

fn exists(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    resp.reply_bool(ctx.store.exists(&req[1]));
    ProcResult::Ok
}

fn incr(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let Some(delta) = opt_delta(req, 2, 1) else {
        resp.client_error("invalid delta");
        return ProcResult::Ok;
    };
    incr_by(ctx, req, resp, delta);
    ProcResult::Ok
}

fn decr(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let Some(delta) = opt_delta(req, 2, 1).and_then(i64::checked_neg) else {
        resp.client_error("invalid delta");
        return ProcResult::Ok;
    };
    incr_by(ctx, req, resp, delta);
    ProcResult::Ok
}

fn incr_by(ctx: &ServerContext, req: &Request, resp: &mut Response, delta: i64) {
    match ctx.store.incr(&req[1], delta) {
        Ok(n) => resp.reply_int(n),
        Err(err) => resp.error(err.to_string()),
    }
}

fn multi_get(
    ctx: &ServerContext,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    resp.ok();
    for key in &req.fields()[1..] {
        if let Some(val) = ctx.store.get(key) {
            resp.push(key.clone());
            resp.push(val);
        }
    }
    ProcResult::Ok
}

fn scan(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let Some(limit) = parse_limit(req, 3) else {
        resp.client_error("invalid limit");
        return ProcResult::Ok;
    };
    resp.ok();
    for (key, val) in ctx.store.scan(&req[1], &req[2], limit) {
        resp.push(key);
        resp.push(val);
    }
    ProcResult::Ok
}

fn rscan(ctx: &ServerContext, _link: &mut Link, req: &Request, resp: &mut Response) -> ProcResult {
    let Some(limit) = parse_limit(req, 3) else {
        resp.client_error("invalid limit");
        return ProcResult::Ok;
    };
    resp.ok();
    for (key, val) in ctx.store.rscan(&req[1], &req[2], limit) {
        resp.push(key);
        resp.push(val);
    }
    ProcResult::Ok
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mio::Token;

    use super::*;
    use crate::server::config::Config;

    fn ctx() -> ServerContext {
        ServerContext::new(&Config::default())
    }

    fn test_link() -> Link {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        Link::new(mio::net::TcpStream::from_std(client), addr, Token(9))
    }

    fn req(parts: &[&[u8]]) -> Request {
        Request::new(parts.iter().map(|p| Bytes::copy_from_slice(p)).collect())
    }

    fn flat(resp: &Response) -> Vec<&[u8]> {
        resp.fields().iter().map(|f| f.as_ref()).collect()
    }

    #[test]
    fn set_then_get() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        set(&ctx, &mut link, &req(&[b"set", b"k", b"v"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"1"]);

        resp.clear();
        get(&ctx, &mut link, &req(&[b"get", b"k"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"v"]);

        resp.clear();
        get(&ctx, &mut link, &req(&[b"get", b"absent"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"not_found"[..]]);
    }

    #[test]
    fn del_and_exists_report_presence() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        ctx.store.set(b"k", Bytes::from_static(b"v")).unwrap();
        exists(&ctx, &mut link, &req(&[b"exists", b"k"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"1"]);

        resp.clear();
        del(&ctx, &mut link, &req(&[b"del", b"k"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"1"]);

        resp.clear();
        del(&ctx, &mut link, &req(&[b"del", b"k"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"0"]);
    }

    #[test]
    fn setnx_keeps_the_first_value() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        setnx(&ctx, &mut link, &req(&[b"setnx", b"k", b"a"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"1"]);

        resp.clear();
        setnx(&ctx, &mut link, &req(&[b"setnx", b"k", b"b"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"0"]);
        assert_eq!(ctx.store.get(b"k"), Some(Bytes::from_static(b"a")));
    }

    #[test]
    fn incr_and_decr_share_the_counter() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        incr(&ctx, &mut link, &req(&[b"incr", b"n", b"5"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"5"]);

        resp.clear();
        decr(&ctx, &mut link, &req(&[b"decr", b"n"]), &mut resp);
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"4"]);

        resp.clear();
        incr(&ctx, &mut link, &req(&[b"incr", b"n", b"oops"]), &mut resp);
        assert_eq!(flat(&resp)[0], b"client_error");
    }

    #[test]
    fn incr_on_text_reports_an_error() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        ctx.store.set(b"s", Bytes::from_static(b"text")).unwrap();
        incr(&ctx, &mut link, &req(&[b"incr", b"s"]), &mut resp);
        assert_eq!(flat(&resp)[0], b"error");
    }

    #[test]
    fn multi_get_returns_hits_only() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        ctx.store.set(b"a", Bytes::from_static(b"1")).unwrap();
        ctx.store.set(b"c", Bytes::from_static(b"3")).unwrap();
        multi_get(
            &ctx,
            &mut link,
            &req(&[b"multi_get", b"a", b"b", b"c"]),
            &mut resp,
        );
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"a", b"1", b"c", b"3"]);
    }

    #[test]
    fn scan_replies_pairs() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        for key in [&b"{s}a"[..], b"{s}b", b"{s}c"] {
            ctx.store.set(key, Bytes::from_static(b"x")).unwrap();
        }
        scan(
            &ctx,
            &mut link,
            &req(&[b"scan", b"{s}a", b"", b"10"]),
            &mut resp,
        );
        assert_eq!(
            flat(&resp),
            vec![&b"ok"[..], b"{s}b", b"x", b"{s}c", b"x"]
        );

        resp.clear();
        scan(
            &ctx,
            &mut link,
            &req(&[b"scan", b"", b"", b"-1"]),
            &mut resp,
        );
        assert_eq!(flat(&resp)[0], b"client_error");
    }

    #[test]
    fn rscan_walks_down() {
        let ctx = ctx();
        let mut link = test_link();
        let mut resp = Response::new();

        for key in [&b"{s}a"[..], b"{s}b", b"{s}c"] {
            ctx.store.set(key, Bytes::from_static(b"x")).unwrap();
        }
        rscan(
            &ctx,
            &mut link,
            &req(&[b"rscan", b"{s}c", b"", b"1"]),
            &mut resp,
        );
        assert_eq!(flat(&resp), vec![&b"ok"[..], b"{s}b", b"x"]);
    }
}
