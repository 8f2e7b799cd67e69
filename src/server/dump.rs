//! Streaming full-dataset dump.
//!
//! `dump` hands its connection to a dedicated thread. The reactor forgets
//! the fd entirely; the thread switches the socket back to blocking mode,
//! streams every kv row as one `["set", key, value]` message, then holds
//! the connection until the client hangs up.

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::commands::Takeover;
use crate::server::link::Link;
use crate::storage::Store;

/// Rows fetched per paging round.
const PAGE: usize = 256;

/// Flush once this many output bytes are buffered.
const FLUSH_AT: usize = 32 * 1024;

/// Builds the connection-takeover closure for one dump request.
pub(crate) fn takeover(
    store: Arc<Store>,
    start: Bytes,
    end: Bytes,
    limit: Option<usize>,
) -> Takeover {
    Box::new(move |link: Link| {
        let spawned = thread::Builder::new()
            .name("dump".to_string())
            .spawn(move || run(store, link, start, end, limit));
        if let Err(err) = spawned {
            // dropping the link closes the connection
            warn!(%err, "dump thread failed to start");
        }
    })
}

fn run(store: Arc<Store>, link: Link, start: Bytes, end: Bytes, limit: Option<usize>) {
    let peer = link.remote_addr();
    let mut link = match link.into_blocking() {
        Ok(link) => link,
        Err(err) => {
            warn!(%peer, %err, "dump connection lost before start");
            return;
        }
    };
    debug!(%peer, "dump starting");
    link.send_fields([&b"begin"[..]]);

    let mut count: u64 = 0;
    let mut cursor = start;
    let mut remaining = limit;
    loop {
        let cap = remaining.map_or(PAGE, |left| left.min(PAGE));
        if cap == 0 {
            break;
        }
        let rows = store.scan(&cursor, &end, cap);
        if rows.is_empty() {
            break;
        }
        for (key, val) in &rows {
            link.send_fields([&b"set"[..], key.as_ref(), val.as_ref()]);
            count += 1;
        }
        if let Some(left) = &mut remaining {
            *left = left.saturating_sub(rows.len());
        }
        if let Some((key, _)) = rows.last() {
            cursor = key.clone();
        }
        if link.pending() >= FLUSH_AT {
            if let Err(err) = link.flush_all() {
                warn!(%peer, %err, count, "dump aborted mid-stream");
                return;
            }
        }
    }

    let mut tail = itoa::Buffer::new();
    link.send_fields([&b"end"[..], tail.format(count).as_bytes()]);
    if let Err(err) = link.flush_all() {
        warn!(%peer, %err, count, "dump tail write failed");
        return;
    }
    debug!(%peer, count, "dump complete, holding connection open");
    let _ = link.wait_close();
}
