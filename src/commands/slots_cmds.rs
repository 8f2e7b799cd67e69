//! Slot inspection and migration commands, plus the compatibility stubs
//! cluster tooling expects to find.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::warn;

use crate::commands::{Command, CommandFlags, CommandRegistry, ProcResult};
use crate::protocol::{status, Request, Response};
use crate::server::link::Link;
use crate::server::ServerContext;
use crate::slots::{key_slot, SlotStatus, SLOT_COUNT};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(Command::new("slotshashkey", 2, -1, CommandFlags::read(), slotshashkey));
    registry.register(Command::new("slotsinfo", 1, 3, CommandFlags::read(), slotsinfo));
    registry.register(Command::new("slotsmgrtslot", 5, 5, CommandFlags::write(), slotsmgrtslot));
    registry.register(Command::new("slotsmgrttagslot", 5, 5, CommandFlags::write(), slotsmgrtslot));
    registry.register(Command::new("slotsmgrtone", 5, 5, CommandFlags::write(), slotsmgrtone));
    registry.register(Command::new("slotsmgrttagone", 5, 5, CommandFlags::write(), slotsmgrtone));
    registry.register(Command::new("slotsmgrtstop", 1, 1, CommandFlags::write(), slotsmgrtstop));
    registry.register(Command::new("config", 2, 3, CommandFlags::inline(), config_stub));
    registry.register(Command::new("slaveof", 1, -1, CommandFlags::inline(), slaveof_stub));
}

fn slotshashkey(
    _ctx: &ServerContext,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    resp.ok();
    for key in &req.fields()[1..] {
        resp.push_int(i64::from(key_slot(key)));
    }
    ProcResult::Ok
}

fn slotsinfo(
    ctx: &ServerContext,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    let start = match req.get(1) {
        None => 0,
        Some(_) => match parse_slot(req, 1) {
            Some(slot) => slot,
            None => {
                resp.client_error("invalid slot");
                return ProcResult::Ok;
            }
        },
    };
    let count = match req.get(2) {
        None => None,
        Some(_) => match req.i64_at(2).and_then(|n| u16::try_from(n).ok()) {
            Some(n) => Some(n),
            None => {
                resp.client_error("invalid count");
                return ProcResult::Ok;
            }
        },
    };

    resp.ok();
    for (slot, range) in ctx.slots.slots_info(start, count) {
        resp.push(format!(
            "{slot} {}-{}",
            String::from_utf8_lossy(&range.kv_begin),
            String::from_utf8_lossy(&range.kv_end)
        ));
    }
    ProcResult::Ok
}

fn slotsmgrtslot(
    ctx: &ServerContext,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    let (Some((dst, timeout)), Some(slot)) = (parse_dst(req), parse_slot(req, 4)) else {
        resp.client_error("invalid destination or slot");
        return ProcResult::Ok;
    };

    match ctx.slots.slot_status(slot) {
        Ok(SlotStatus::Empty) => {
            resp.ok();
            resp.push_slice(b"0");
            resp.push_slice(b"0");
        }
        Ok(SlotStatus::Normal | SlotStatus::Migrating) => {
            match ctx.slots.migrate_slot(dst, timeout, slot, ctx.password()) {
                Ok(_moved) => {
                    resp.ok();
                    resp.push_slice(b"1");
                    resp.push_slice(b"1");
                }
                Err(err) => {
                    warn!(slot, %dst, %err, "slot migration failed");
                    resp.push(status::ERROR);
                }
            }
        }
        Err(err) => {
            warn!(slot, %err, "slot status unreadable");
            resp.push(status::ERROR);
        }
    }
    ProcResult::Ok
}

fn slotsmgrtone(
    ctx: &ServerContext,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    let Some((dst, timeout)) = parse_dst(req) else {
        resp.client_error("invalid destination");
        return ProcResult::Ok;
    };

    match ctx.slots.migrate_key(dst, timeout, &req[4], ctx.password()) {
        Ok(moved) => resp.reply_bool(moved > 0),
        Err(err) => {
            warn!(%dst, %err, "single-key migration failed");
            resp.push(status::ERROR);
        }
    }
    ProcResult::Ok
}

fn slotsmgrtstop(
    ctx: &ServerContext,
    _link: &mut Link,
    _req: &Request,
    resp: &mut Response,
) -> ProcResult {
    resp.reply_bool(ctx.slots.clear_statuses());
    ProcResult::Ok
}

/// `config get <key>` always answers `"0"`; anything else is an error.
/// Cluster dashboards probe this before taking a node seriously.
fn config_stub(
    _ctx: &ServerContext,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> ProcResult {
    if req.len() == 3 && &req[1] == "get" {
        resp.ok();
        resp.push(req[2].clone());
        resp.push_slice(b"0");
    } else {
        resp.push(status::ERROR);
    }
    ProcResult::Ok
}

fn slaveof_stub(
    _ctx: &ServerContext,
    _link: &mut Link,
    _req: &Request,
    resp: &mut Response,
) -> ProcResult {
    resp.ok();
    ProcResult::Ok
}

fn parse_slot(req: &Request, idx: usize) -> Option<u16> {
    req.i64_at(idx)
        .and_then(|n| u16::try_from(n).ok())
        .filter(|slot| *slot < SLOT_COUNT)
}

fn parse_dst(req: &Request) -> Option<(SocketAddr, Duration)> {
    let host = req.str_at(1)?;
    let port = req.i64_at(2).and_then(|p| u16::try_from(p).ok())?;
    let ms = req.i64_at(3).and_then(|t| u64::try_from(t).ok())?;
    let addr = (host, port).to_socket_addrs().ok()?.next()?;
    Some((addr, Duration::from_millis(ms.max(1))))
}
