//! Command registry for looking up commands by wire name.

use super::{hash, kv, server_cmds, slots_cmds, CommandFlags, Proc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Command definition.
///
/// Per-command counters are plain atomics so workers on different threads
/// can record completions without a registry-wide lock.
pub struct Command {
    /// Command name as it appears on the wire
    pub name: &'static str,
    /// Minimum request field count, including the command name
    pub min_args: i32,
    /// Maximum request field count (-1 for unlimited)
    pub max_args: i32,
    /// Dispatch flags
    pub flags: CommandFlags,
    /// Handler function
    pub handler: Proc,
    calls: AtomicU64,
    time_wait_us: AtomicU64,
    time_proc_us: AtomicU64,
}

impl Command {
    /// Create a new command definition.
    pub const fn new(
        name: &'static str,
        min_args: i32,
        max_args: i32,
        flags: CommandFlags,
        handler: Proc,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            flags,
            handler,
            calls: AtomicU64::new(0),
            time_wait_us: AtomicU64::new(0),
            time_proc_us: AtomicU64::new(0),
        }
    }

    /// Check a request field count against the declared arity.
    pub fn check_arity(&self, num_fields: usize) -> bool {
        let n = num_fields as i32;
        if self.min_args >= 0 && n < self.min_args {
            return false;
        }
        if self.max_args >= 0 && n > self.max_args {
            return false;
        }
        true
    }

    /// Record one completed call with its queue-wait and handler times.
    pub fn record(&self, wait: Duration, proc_time: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.time_wait_us
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
        self.time_proc_us
            .fetch_add(proc_time.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of completed calls.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total microseconds spent waiting in pool queues.
    pub fn time_wait_us(&self) -> u64 {
        self.time_wait_us.load(Ordering::Relaxed)
    }

    /// Total microseconds spent inside the handler.
    pub fn time_proc_us(&self) -> u64 {
        self.time_proc_us.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("flags", &self.flags)
            .field("calls", &self.calls())
            .finish()
    }
}

/// Registry of all available commands, keyed by raw wire name.
///
/// Built once at startup and shared read-only afterwards, so lookups need
/// no synchronization. Name matching is exact and case-sensitive.
#[derive(Debug)]
pub struct CommandRegistry {
    commands: HashMap<&'static [u8], Arc<Command>>,
}

impl CommandRegistry {
    /// Create a new command registry with all built-in commands.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    fn register_all(&mut self) {
        server_cmds::register(self);
        kv::register(self);
        hash::register(self);
        slots_cmds::register(self);
    }

    /// Register a command.
    pub fn register(&mut self, cmd: Command) {
        self.commands.insert(cmd.name.as_bytes(), Arc::new(cmd));
    }

    /// Look up a command by its wire name.
    pub fn get(&self, name: &[u8]) -> Option<&Arc<Command>> {
        self.commands.get(name)
    }

    /// Get all registered commands.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.values()
    }

    /// Sum of completed calls across all commands.
    pub fn total_calls(&self) -> u64 {
        self.commands.values().map(|cmd| cmd.calls()).sum()
    }

    /// Get command count.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
