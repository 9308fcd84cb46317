/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! GUI RPC server: one listening socket and the set of live client
//! connections, multiplexed on a single thread with `mio`.
//!
//! The owning loop drives it in four steps, which [`ConnectionSet::poll_once`]
//! bundles:
//!
//! ```text
//! poll()              – complete deferred replies
//! update_interests()  – watch WRITABLE only where output is pending
//! wait(timeout)       – block in the poller
//! handle_ready()      – accept, read, write; destroy failed connections
//! ```
//!
//! A failure on one connection destroys that connection only.  Dead
//! connections are collected during a pass and removed after it.

pub mod allow_list;
pub mod auth;
pub mod connection;
pub mod error;
pub mod handler;
pub mod rate_limit;
pub mod wire;

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

pub use allow_list::AllowList;
pub use connection::Connection;
pub use error::{ConnectionError, RpcError};
pub use handler::{
    CoreRequestHandler, PendingOperation, Reply, RequestHandler, RpcContext, SimSummary,
};
pub use rate_limit::{LogDecision, RateLimitedLog};

const LISTENER: Token = Token(0);
const EVENT_CAPACITY: usize = 128;

/// Where the GUI RPC server listens and which files it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSettings {
    /// `0` picks an ephemeral port.
    pub port: u16,
    /// Accept connections from any host, not only the allow-list.
    pub allow_remote: bool,
    /// Create the password file group-readable (0660).
    pub group_readable_password: bool,
    pub password_file: PathBuf,
    pub remote_hosts_file: PathBuf,
}

impl RpcSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            port: config.gui_rpc.port,
            allow_remote: config.gui_rpc.allow_remote_gui_rpc,
            group_readable_password: config.gui_rpc.sandbox_group,
            password_file: config.password_file(),
            remote_hosts_file: config.remote_hosts_file(),
        }
    }
}

/// How an incoming peer is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDecision {
    Local,
    Remote,
    Rejected,
}

pub struct ConnectionSet {
    settings: RpcSettings,
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    connections: BTreeMap<Token, Connection>,
    next_token: usize,
    password: Option<String>,
    allowed: AllowList,
    reject_log: RateLimitedLog,
    rejected: u64,
}

impl ConnectionSet {
    /// # Errors
    /// Fails only if the OS poller cannot be created.
    pub fn new(settings: RpcSettings) -> Result<Self, RpcError> {
        Ok(Self {
            settings,
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener: None,
            connections: BTreeMap::new(),
            next_token: LISTENER.0 + 1,
            password: None,
            allowed: AllowList::new(),
            reject_log: RateLimitedLog::default(),
            rejected: 0,
        })
    }

    pub fn settings(&self) -> &RpcSettings {
        &self.settings
    }

    // ── Credentials ──────────────────────────────────────────────────────────

    /// Reads the password file, creating it with a random password if
    /// absent.  Safe to call repeatedly.
    pub fn reload_password(&mut self) -> Result<(), RpcError> {
        self.password = auth::load_or_create_password(
            &self.settings.password_file,
            self.settings.group_readable_password,
        )?;
        Ok(())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Re-reads the remote host allow-list.  Errors are logged and leave
    /// the previous list in place.
    pub fn reload_allowed_hosts(&mut self) {
        match AllowList::load_from_file(&self.settings.remote_hosts_file) {
            Ok(list) => self.allowed = list,
            Err(e) => warn!(
                "Can't read {}: {e}",
                self.settings.remote_hosts_file.display()
            ),
        }
    }

    pub fn allowed_hosts(&self) -> &AllowList {
        &self.allowed
    }

    // ── Listening socket ─────────────────────────────────────────────────────

    /// Binds and registers the listening socket.
    ///
    /// Binds to loopback unless remote access is enabled or a remote host
    /// file exists, in which case all interfaces are used.  Bind failures
    /// are expected while a previous instance releases the port, so they
    /// are logged only when `is_final_attempt` is set.  Calling `init` while
    /// already listening returns the current address.
    pub fn init(&mut self, is_final_attempt: bool) -> Result<SocketAddr, RpcError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let remote = self.settings.allow_remote || self.settings.remote_hosts_file.exists();
        let ip = if remote {
            Ipv4Addr::UNSPECIFIED
        } else {
            Ipv4Addr::LOCALHOST
        };
        let addr = SocketAddr::from((ip, self.settings.port));

        let mut listener = match TcpListener::bind(addr) {
            Ok(l) => l,
            Err(source) => {
                if is_final_attempt {
                    warn!("GUI RPC bind to {addr} failed: {source}");
                } else {
                    debug!("GUI RPC bind to {addr} failed: {source}");
                }
                return Err(RpcError::Bind { addr, source });
            }
        };
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local = listener.local_addr()?;
        self.listener = Some(listener);

        if remote {
            self.reload_allowed_hosts();
        }
        info!(addr = %local, remote, "GUI RPC server listening");
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    // ── Admission ────────────────────────────────────────────────────────────

    /// Classifies a peer address.  Non-loopback peers trigger an allow-list
    /// reload so edits take effect without a restart.
    pub fn check_peer(&mut self, ip: IpAddr) -> PeerDecision {
        let is_loopback = match ip {
            IpAddr::V4(v4) => v4.is_loopback(),
            IpAddr::V6(v6) => {
                v6.is_loopback() || v6.to_ipv4_mapped().map_or(false, |v4| v4.is_loopback())
            }
        };
        if is_loopback {
            return PeerDecision::Local;
        }
        self.reload_allowed_hosts();
        if self.settings.allow_remote || self.allowed.contains(ip) {
            PeerDecision::Remote
        } else {
            PeerDecision::Rejected
        }
    }

    /// Adds an accepted stream to the live set, or closes it at once if the
    /// peer is not allowed.  Returns the new connection's token.
    pub fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr, now: Instant) -> Option<Token> {
        let decision = self.check_peer(peer.ip());
        if decision == PeerDecision::Rejected {
            self.rejected += 1;
            if let LogDecision::Emit { suppressed } = self.reject_log.record(now) {
                if suppressed > 0 {
                    warn!("{suppressed} more GUI RPC connections from non-allowed hosts were refused");
                }
                warn!("GUI RPC request from non-allowed address {}", peer.ip());
            }
            let _ = stream.shutdown(Shutdown::Both);
            return None;
        }

        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!(%peer, "cannot register GUI RPC connection: {e}");
            return None;
        }

        let is_local = decision == PeerDecision::Local;
        let auth_needed = self.password.is_some();
        debug!(%peer, ?token, is_local, auth_needed, "GUI RPC connection accepted");
        self.connections.insert(
            token,
            Connection::new(stream, token, peer, auth_needed, is_local),
        );
        Some(token)
    }

    /// Peers refused so far.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, peer)) => {
                    self.admit(stream, peer, Instant::now());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("GUI RPC accept failed: {e}");
                    return;
                }
            }
        }
    }

    // ── Event loop steps ─────────────────────────────────────────────────────

    /// Completes deferred replies.  Returns `true` if any completed.
    pub fn poll<H>(&mut self, handler: &mut H) -> bool
    where
        H: RequestHandler + ?Sized,
    {
        if let Some(n) = self.reject_log.expire(Instant::now()) {
            warn!("{n} more GUI RPC connections from non-allowed hosts were refused");
        }

        let mut progressed = false;
        let mut dead = Vec::new();
        let password = self.password.as_deref();
        for (&token, conn) in self.connections.iter_mut() {
            match conn.poll_pending(password, handler) {
                Ok(done) => progressed |= done,
                Err(e) => dead.push((token, e)),
            }
        }
        self.remove_connections(dead);
        progressed
    }

    /// Registers write interest exactly for connections with buffered
    /// output.
    pub fn update_interests(&mut self) {
        let mut dead = Vec::new();
        {
            let registry = self.poll.registry();
            for (&token, conn) in self.connections.iter_mut() {
                let want = conn.desired_interest();
                if want == conn.interest {
                    continue;
                }
                match registry.reregister(conn.stream_mut(), token, want) {
                    Ok(()) => conn.interest = want,
                    Err(e) => dead.push((token, ConnectionError::Io(e))),
                }
            }
        }
        self.remove_connections(dead);
    }

    /// Blocks until a socket is ready or `timeout` passes.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<(), RpcError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.events.clear();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Services the sockets reported ready by the last [`wait`].
    ///
    /// [`wait`]: Self::wait
    pub fn handle_ready<H>(&mut self, handler: &mut H)
    where
        H: RequestHandler + ?Sized,
    {
        let ready: Vec<(Token, bool, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable(), e.is_error()))
            .collect();

        let mut dead = Vec::new();
        for (token, readable, writable, error) in ready {
            if token == LISTENER {
                self.accept_pending();
                continue;
            }
            let Some(conn) = self.connections.get_mut(&token) else {
                continue;
            };
            let result = if error {
                let e = conn
                    .stream_mut()
                    .take_error()
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "socket error"));
                Err(ConnectionError::Io(e))
            } else if readable {
                conn.handle_readable(self.password.as_deref(), handler)
            } else if writable {
                conn.flush()
            } else {
                Ok(())
            };
            if let Err(e) = result {
                dead.push((token, e));
            }
        }
        self.remove_connections(dead);
    }

    /// One full cycle.  A completed deferred reply turns the wait into a
    /// non-blocking check.
    pub fn poll_once<H>(&mut self, handler: &mut H, timeout: Option<Duration>) -> Result<bool, RpcError>
    where
        H: RequestHandler + ?Sized,
    {
        let progressed = self.poll(handler);
        self.update_interests();
        self.wait(if progressed { Some(Duration::ZERO) } else { timeout })?;
        self.handle_ready(handler);
        Ok(progressed)
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    fn remove_connections(&mut self, dead: Vec<(Token, ConnectionError)>) {
        for (token, reason) in dead {
            let Some(mut conn) = self.connections.remove(&token) else {
                continue;
            };
            match reason {
                ConnectionError::PeerClosed => {
                    debug!(peer = %conn.peer(), "GUI RPC connection closed by peer")
                }
                other => info!(peer = %conn.peer(), "GUI RPC connection dropped: {other}"),
            }
            let _ = self.poll.registry().deregister(conn.stream_mut());
        }
    }

    /// Closes every connection and the listening socket.
    pub fn shutdown(&mut self) {
        let registry = self.poll.registry();
        for (_, mut conn) in std::mem::take(&mut self.connections) {
            let _ = registry.deregister(conn.stream_mut());
        }
        if let Some(mut listener) = self.listener.take() {
            let _ = registry.deregister(&mut listener);
            info!("GUI RPC server stopped");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, token: Token) -> Option<&Connection> {
        self.connections.get(&token)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
