/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Remote host allow-list (`remote_hosts.cfg`).
//!
//! One host name or IPv4 address per line.  Lines starting with `#` or `;`
//! and blank lines are ignored.  Names are resolved when the list is loaded;
//! names that do not resolve to an IPv4 address are logged and skipped.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::Path;

use tracing::{debug, warn};

/// Resolved set of remote addresses allowed to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    hosts: BTreeSet<Ipv4Addr>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses allow-list text, resolving each entry.
    pub fn parse(content: &str) -> Self {
        let mut hosts = BTreeSet::new();
        for line in content.lines() {
            let entry = line.trim();
            if entry.is_empty() || entry.starts_with('#') || entry.starts_with(';') {
                continue;
            }
            match resolve_ipv4(entry) {
                Some(ip) => {
                    debug!(host = entry, %ip, "allowing remote GUI RPC host");
                    hosts.insert(ip);
                }
                None => warn!("Can't resolve hostname {entry} in remote hosts file"),
            }
        }
        Self { hosts }
    }

    /// Loads the allow-list from `path`.  A missing file yields an empty
    /// list.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.hosts.contains(&v4),
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map_or(false, |v4| self.hosts.contains(&v4)),
        }
    }

    pub fn insert(&mut self, ip: Ipv4Addr) {
        self.hosts.insert(ip);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip);
    }
    (host, 0)
        .to_socket_addrs()
        .ok()?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
