//! IP allow/deny filtering for incoming connections.
//!
//! Rules are dotted prefixes: `"127.0.1"` covers every address under
//! `127.0.1.*` as well as the bare `127.0.1`. The keyword `all` (or `*`)
//! targets the default verdict instead of a prefix. When rules from both
//! lists match an address, the longest match decides, allow winning ties.
//! The usual whitelist setup is `deny all` plus one `allow` per trusted
//! prefix; adding a plain allow rule flips the default to deny as well.

use std::collections::BTreeSet;
use std::net::IpAddr;

/// Connection filter over dotted IP prefixes.
#[derive(Debug, Clone)]
pub struct IpFilter {
    allow_all: bool,
    allow: BTreeSet<String>,
    deny: BTreeSet<String>,
}

impl IpFilter {
    pub fn new() -> Self {
        Self {
            allow_all: true,
            allow: BTreeSet::new(),
            deny: BTreeSet::new(),
        }
    }

    /// No rules configured, everything passes.
    pub fn is_open(&self) -> bool {
        self.allow_all && self.allow.is_empty() && self.deny.is_empty()
    }

    /// True when the default verdict for unmatched addresses is allow.
    pub fn allows_all(&self) -> bool {
        self.allow_all
    }

    pub fn add_allow(&mut self, prefix: &str) {
        if is_all(prefix) {
            self.allow_all = true;
        } else {
            self.allow.insert(rule_key(prefix));
            self.allow_all = false;
        }
    }

    pub fn del_allow(&mut self, prefix: &str) {
        if is_all(prefix) {
            self.allow_all = false;
        } else {
            self.allow.remove(&rule_key(prefix));
        }
    }

    pub fn add_deny(&mut self, prefix: &str) {
        if is_all(prefix) {
            self.allow_all = false;
        } else {
            self.deny.insert(rule_key(prefix));
        }
    }

    pub fn del_deny(&mut self, prefix: &str) {
        if is_all(prefix) {
            self.allow_all = true;
        } else {
            self.deny.remove(&rule_key(prefix));
        }
    }

    /// Allow rules as configured, without the internal terminator.
    pub fn allow_rules(&self) -> impl Iterator<Item = &str> {
        self.allow.iter().map(|rule| rule.trim_end_matches('.'))
    }

    /// Deny rules as configured, without the internal terminator.
    pub fn deny_rules(&self) -> impl Iterator<Item = &str> {
        self.deny.iter().map(|rule| rule.trim_end_matches('.'))
    }

    /// Decide whether a remote address may connect.
    pub fn check_pass(&self, ip: IpAddr) -> bool {
        if self.is_open() {
            return true;
        }
        let candidate = rule_key(&ip.to_string());
        let allow_len = longest_hit(&self.allow, &candidate);
        let deny_len = longest_hit(&self.deny, &candidate);
        match (allow_len, deny_len) {
            (Some(a), Some(d)) => a >= d,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => self.allow_all,
        }
    }
}

impl Default for IpFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_all(prefix: &str) -> bool {
    prefix == "all" || prefix == "*"
}

/// Terminate with `'.'` so `"127.0.1"` cannot match `"127.0.10.x"`.
fn rule_key(prefix: &str) -> String {
    let mut key = prefix.to_string();
    if !key.ends_with('.') {
        key.push('.');
    }
    key
}

fn longest_hit(rules: &BTreeSet<String>, candidate: &str) -> Option<usize> {
    rules
        .iter()
        .filter(|rule| candidate.starts_with(rule.as_str()))
        .map(|rule| rule.len())
        .max()
}
