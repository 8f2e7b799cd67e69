//! End-to-end tests over the wire protocol.
//!
//! Each test boots a server on an ephemeral port inside the test process
//! and talks to it over a plain `TcpStream`, framing requests by hand so
//! the server-side parser is exercised against an independent encoder.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sandstone::server::{Config, NetworkServer, ServerContext, ShutdownHandle};

struct TestServer {
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    handle: ShutdownHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(mut config: Config) -> Self {
        config.ip = "127.0.0.1".to_string();
        config.port = 0;
        let mut server = NetworkServer::new(config).unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = Arc::clone(server.context());
        let handle = server.shutdown_handle();
        let thread = thread::Builder::new()
            .name("test-server".to_string())
            .spawn(move || server.run().unwrap())
            .unwrap();
        Self {
            addr,
            ctx,
            handle,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> Wire {
        Wire::connect(self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Wire {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Wire {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    fn encode(fields: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for field in fields {
            out.extend_from_slice(field.len().to_string().as_bytes());
            out.push(b'\n');
            out.extend_from_slice(field);
            out.push(b'\n');
        }
        out.push(b'\n');
        out
    }

    fn send(&mut self, fields: &[&[u8]]) {
        self.stream.write_all(&Self::encode(fields)).unwrap();
    }

    /// Several requests in one write, so they land in one read buffer on
    /// the server side.
    fn send_batch(&mut self, requests: &[&[&[u8]]]) {
        let mut out = Vec::new();
        for fields in requests {
            out.extend_from_slice(&Self::encode(fields));
        }
        self.stream.write_all(&out).unwrap();
    }

    fn recv(&mut self) -> Vec<Vec<u8>> {
        loop {
            if let Some((fields, used)) = parse_reply(&self.buf) {
                self.buf.drain(..used);
                return fields;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).unwrap();
            assert!(n > 0, "server closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn roundtrip(&mut self, fields: &[&[u8]]) -> Vec<Vec<u8>> {
        self.send(fields);
        self.recv()
    }
}

/// One complete reply from the buffer: the fields and the bytes consumed.
fn parse_reply(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let mut fields = Vec::new();
    let mut pos = 0;
    loop {
        let nl = buf[pos..].iter().position(|&b| b == b'\n')? + pos;
        let line = &buf[pos..nl];
        if line.is_empty() {
            return Some((fields, nl + 1));
        }
        let len: usize = std::str::from_utf8(line).ok()?.parse().unwrap();
        let start = nl + 1;
        let end = start + len;
        if end >= buf.len() {
            return None;
        }
        assert_eq!(buf[end], b'\n', "missing field separator");
        fields.push(buf[start..end].to_vec());
        pos = end + 1;
    }
}

fn assert_status(reply: &[Vec<u8>], status: &[u8]) {
    assert!(
        !reply.is_empty() && reply[0] == status,
        "expected {:?}, got {:?}",
        String::from_utf8_lossy(status),
        reply
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect::<Vec<_>>()
    );
}

#[test]
fn ping_answers_ok() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();
    assert_eq!(wire.roundtrip(&[b"ping"]), vec![b"ok".to_vec()]);
}

#[test]
fn unknown_command_is_reported_and_survivable() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    let reply = wire.roundtrip(&[b"frobnicate"]);
    assert_status(&reply, b"client_error");
    assert_eq!(reply[1], b"Unknown Command: frobnicate".to_vec());

    // same connection keeps working
    assert_eq!(wire.roundtrip(&[b"ping"]), vec![b"ok".to_vec()]);
}

#[test]
fn kv_lifecycle_over_the_wire() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    assert_status(&wire.roundtrip(&[b"set", b"greeting", b"hello"]), b"ok");
    assert_eq!(
        wire.roundtrip(&[b"get", b"greeting"]),
        vec![b"ok".to_vec(), b"hello".to_vec()]
    );
    assert_eq!(
        wire.roundtrip(&[b"exists", b"greeting"]),
        vec![b"ok".to_vec(), b"1".to_vec()]
    );
    assert_eq!(
        wire.roundtrip(&[b"del", b"greeting"]),
        vec![b"ok".to_vec(), b"1".to_vec()]
    );
    assert_status(&wire.roundtrip(&[b"get", b"greeting"]), b"not_found");
    assert_eq!(
        wire.roundtrip(&[b"exists", b"greeting"]),
        vec![b"ok".to_vec(), b"0".to_vec()]
    );
}

#[test]
fn binary_payloads_pass_through_unharmed() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    let value = b"\x00\r\n7\n\xff\xfe binary";
    assert_status(&wire.roundtrip(&[b"set", b"blob", value]), b"ok");
    assert_eq!(
        wire.roundtrip(&[b"get", b"blob"]),
        vec![b"ok".to_vec(), value.to_vec()]
    );
}

#[test]
fn crlf_framing_is_tolerated() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    wire.stream
        .write_all(b"3\r\nset\r\n1\r\nk\r\n2\r\nvv\r\n\r\n")
        .unwrap();
    assert_status(&wire.recv(), b"ok");
    assert_eq!(
        wire.roundtrip(&[b"get", b"k"]),
        vec![b"ok".to_vec(), b"vv".to_vec()]
    );
}

#[test]
fn pipelined_requests_answer_in_order() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    wire.send_batch(&[
        &[b"set", b"a", b"1"],
        &[b"incr", b"a"],
        &[b"get", b"a"],
        &[b"ping"],
    ]);
    assert_eq!(wire.recv(), vec![b"ok".to_vec(), b"1".to_vec()]);
    assert_eq!(wire.recv(), vec![b"ok".to_vec(), b"2".to_vec()]);
    assert_eq!(wire.recv(), vec![b"ok".to_vec(), b"2".to_vec()]);
    assert_eq!(wire.recv(), vec![b"ok".to_vec()]);
}

#[test]
fn one_request_in_flight_per_connection() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    // A writer-pool command paired with an inline one, many times over.
    // The inline reply may never overtake the queued write ahead of it.
    for _ in 0..32 {
        wire.send_batch(&[&[b"incr", b"seq"], &[b"ping"]]);
    }
    for round in 1..=32i64 {
        let counted = wire.recv();
        assert_status(&counted, b"ok");
        assert_eq!(counted[1], round.to_string().into_bytes());
        assert_eq!(wire.recv(), vec![b"ok".to_vec()]);
    }
}

#[test]
fn auth_gates_every_command_until_presented() {
    let password = "correct-horse-battery-staple-0123456789";
    let config = Config {
        auth: Some(password.to_string()),
        ..Config::default()
    };
    let server = TestServer::start(config);
    let mut wire = server.connect();

    let reply = wire.roundtrip(&[b"get", b"foo"]);
    assert_status(&reply, b"noauth");
    assert_eq!(reply[1], b"authentication required".to_vec());

    let reply = wire.roundtrip(&[b"auth", b"wrong-password"]);
    assert_status(&reply, b"error");
    assert_status(&wire.roundtrip(&[b"ping"]), b"noauth");

    assert_eq!(
        wire.roundtrip(&[b"auth", password.as_bytes()]),
        vec![b"ok".to_vec(), b"1".to_vec()]
    );
    assert_status(&wire.roundtrip(&[b"get", b"foo"]), b"not_found");

    // idempotent
    assert_eq!(
        wire.roundtrip(&[b"auth", password.as_bytes()]),
        vec![b"ok".to_vec(), b"1".to_vec()]
    );
}

#[test]
fn denied_ip_is_dropped_before_any_command() {
    let config = Config {
        deny: vec!["all".to_string()],
        ..Config::default()
    };
    let server = TestServer::start(config);

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut chunk = [0u8; 64];
    let n = stream.read(&mut chunk).unwrap_or(0);
    assert_eq!(n, 0, "filtered connection must be closed unanswered");
}

#[test]
fn concurrent_writers_serialize_and_both_count() {
    let server = TestServer::start(Config::default());

    let addr = server.addr;
    let threads: Vec<_> = (0..2)
        .map(|_| {
            thread::spawn(move || {
                let mut wire = Wire::connect(addr);
                assert_status(&wire.roundtrip(&[b"incr", b"shared"]), b"ok");
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let mut wire = server.connect();
    assert_eq!(
        wire.roundtrip(&[b"get", b"shared"]),
        vec![b"ok".to_vec(), b"2".to_vec()]
    );
    let incr = server.ctx.registry.get(b"incr").unwrap();
    assert_eq!(incr.calls(), 2);
}

#[test]
fn writer_order_is_total_under_load() {
    let server = TestServer::start(Config::default());
    let addr = server.addr;
    let per_thread = 50;

    let threads: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(move || {
                let mut wire = Wire::connect(addr);
                for _ in 0..per_thread {
                    assert_status(&wire.roundtrip(&[b"incr", b"counter"]), b"ok");
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let mut wire = server.connect();
    assert_eq!(
        wire.roundtrip(&[b"get", b"counter"]),
        vec![b"ok".to_vec(), b"200".to_vec()]
    );
}

#[test]
fn hash_commands_over_the_wire() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    assert_status(&wire.roundtrip(&[b"hset", b"h", b"f1", b"v1"]), b"ok");
    assert_status(&wire.roundtrip(&[b"hset", b"h", b"f2", b"v2"]), b"ok");
    assert_eq!(
        wire.roundtrip(&[b"hget", b"h", b"f1"]),
        vec![b"ok".to_vec(), b"v1".to_vec()]
    );
    assert_eq!(
        wire.roundtrip(&[b"hsize", b"h"]),
        vec![b"ok".to_vec(), b"2".to_vec()]
    );
    assert_eq!(
        wire.roundtrip(&[b"hgetall", b"h"]),
        vec![
            b"ok".to_vec(),
            b"f1".to_vec(),
            b"v1".to_vec(),
            b"f2".to_vec(),
            b"v2".to_vec()
        ]
    );
}

#[test]
fn slot_commands_agree_with_tagged_placement() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    assert_status(&wire.roundtrip(&[b"set", b"{t}alpha", b"1"]), b"ok");
    assert_status(&wire.roundtrip(&[b"set", b"{t}beta", b"2"]), b"ok");

    let reply = wire.roundtrip(&[b"slotshashkey", b"{t}alpha", b"{t}beta", b"t"]);
    assert_status(&reply, b"ok");
    assert_eq!(reply[1], reply[2], "hash tag must pin both keys together");
    assert_eq!(reply[1], reply[3], "tag content hashes like the bare key");

    let slot = String::from_utf8(reply[1].clone()).unwrap();
    let info = wire.roundtrip(&[b"slotsinfo"]);
    assert_status(&info, b"ok");
    assert_eq!(info.len(), 2, "exactly one slot holds data");
    let line = String::from_utf8(info[1].clone()).unwrap();
    assert_eq!(line, format!("{slot} {{t}}alpha-{{t}}beta"));
}

#[test]
fn migration_moves_a_slot_between_live_servers() {
    let src = TestServer::start(Config::default());
    let dst = TestServer::start(Config::default());
    let mut wire = src.connect();

    assert_status(&wire.roundtrip(&[b"set", b"{m}one", b"1"]), b"ok");
    assert_status(&wire.roundtrip(&[b"set", b"{m}two", b"2"]), b"ok");
    assert_status(&wire.roundtrip(&[b"hset", b"{m}map", b"f", b"v"]), b"ok");

    let reply = wire.roundtrip(&[b"slotshashkey", b"{m}one"]);
    let slot = reply[1].clone();

    let port = dst.addr.port().to_string();
    let reply = wire.roundtrip(&[b"slotsmgrtslot", b"127.0.0.1", port.as_bytes(), b"1000", &slot]);
    assert_eq!(
        reply,
        vec![b"ok".to_vec(), b"1".to_vec(), b"1".to_vec()],
        "migration must report the drained slot"
    );

    // source no longer holds the data
    assert_status(&wire.roundtrip(&[b"get", b"{m}one"]), b"not_found");
    assert_status(&wire.roundtrip(&[b"hget", b"{m}map", b"f"]), b"not_found");

    // destination now answers for it
    let mut dst_wire = dst.connect();
    assert_eq!(
        dst_wire.roundtrip(&[b"get", b"{m}one"]),
        vec![b"ok".to_vec(), b"1".to_vec()]
    );
    assert_eq!(
        dst_wire.roundtrip(&[b"get", b"{m}two"]),
        vec![b"ok".to_vec(), b"2".to_vec()]
    );
    assert_eq!(
        dst_wire.roundtrip(&[b"hget", b"{m}map", b"f"]),
        vec![b"ok".to_vec(), b"v".to_vec()]
    );

    // drained source reports the slot empty
    let reply = wire.roundtrip(&[b"slotsmgrtslot", b"127.0.0.1", port.as_bytes(), b"1000", &slot]);
    assert_eq!(reply, vec![b"ok".to_vec(), b"0".to_vec(), b"0".to_vec()]);
}

#[test]
fn dump_streams_the_whole_keyspace() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    assert_status(&wire.roundtrip(&[b"set", b"d1", b"x"]), b"ok");
    assert_status(&wire.roundtrip(&[b"set", b"d2", b"y"]), b"ok");
    assert_status(&wire.roundtrip(&[b"set", b"d3", b"z"]), b"ok");

    wire.send(&[b"dump"]);
    assert_eq!(wire.recv(), vec![b"begin".to_vec()]);

    let mut rows = Vec::new();
    loop {
        let reply = wire.recv();
        if reply[0] == b"end" {
            assert_eq!(reply[1], b"3".to_vec());
            break;
        }
        assert_eq!(reply[0], b"set".to_vec());
        rows.push((reply[1].clone(), reply[2].clone()));
    }
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (b"d1".to_vec(), b"x".to_vec()),
            (b"d2".to_vec(), b"y".to_vec()),
            (b"d3".to_vec(), b"z".to_vec()),
        ]
    );
}

#[test]
fn info_reports_server_and_per_command_stats() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    assert_status(&wire.roundtrip(&[b"ping"]), b"ok");
    let reply = wire.roundtrip(&[b"info"]);
    assert_status(&reply, b"ok");
    assert_eq!(reply[1], b"sandstone-server".to_vec());

    let reply = wire.roundtrip(&[b"info", b"cmd"]);
    assert_status(&reply, b"ok");
    let joined: Vec<String> = reply
        .iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    assert!(
        joined.iter().any(|f| f == "cmd.ping"),
        "per-command section missing: {joined:?}"
    );
}

#[test]
fn malformed_frame_drops_the_connection() {
    let server = TestServer::start(Config::default());
    let mut wire = server.connect();

    // length header must start with a digit
    wire.stream.write_all(b"x4\nping\n\n").unwrap();
    let mut chunk = [0u8; 64];
    let n = wire.stream.read(&mut chunk).unwrap_or(0);
    assert_eq!(n, 0, "protocol garbage must close the connection");
}
