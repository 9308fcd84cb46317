/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One accepted GUI RPC client.
//!
//! A connection buffers inbound bytes until a complete message arrives,
//! runs the auth1/auth2 challenge when a password is set, and hands
//! everything else to the [`RequestHandler`].  Requests are answered in
//! order: while a deferred reply is outstanding, later requests wait in the
//! read buffer.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::{debug, warn};

use super::auth;
use super::error::ConnectionError;
use super::handler::{PendingOperation, Reply, RequestHandler, RpcContext};
use super::wire::{self, EOM, MAX_REQUEST_SIZE};

const READ_CHUNK: usize = 4096;

pub struct Connection {
    stream: TcpStream,
    token: Token,
    peer: SocketAddr,
    is_local: bool,
    auth_needed: bool,
    nonce: Option<String>,
    read_buf: Vec<u8>,
    /// Bytes at the end of `read_buf` after the last terminator.
    unterminated: usize,
    write_buf: Vec<u8>,
    pending: Option<Box<dyn PendingOperation>>,
    /// Interest currently registered with the poller.
    pub(super) interest: Interest,
}

impl Connection {
    pub fn new(stream: TcpStream, token: Token, peer: SocketAddr, auth_needed: bool, is_local: bool) -> Self {
        Self {
            stream,
            token,
            peer,
            is_local,
            auth_needed,
            nonce: None,
            read_buf: Vec::new(),
            unterminated: 0,
            write_buf: Vec::new(),
            pending: None,
            interest: Interest::READABLE,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_authenticated(&self) -> bool {
        !self.auth_needed
    }

    pub fn has_pending_output(&self) -> bool {
        !self.write_buf.is_empty()
    }

    pub fn has_pending_operation(&self) -> bool {
        self.pending.is_some()
    }

    /// Interest the poller should watch for this connection.
    pub fn desired_interest(&self) -> Interest {
        if self.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub(super) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Drains the socket, answers every complete request and starts
    /// flushing the replies.
    pub fn handle_readable<H>(
        &mut self,
        password: Option<&str>,
        handler: &mut H,
    ) -> Result<(), ConnectionError>
    where
        H: RequestHandler + ?Sized,
    {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ConnectionError::PeerClosed),
                Ok(n) => {
                    self.append_input(&chunk[..n])?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.process_requests(password, handler)?;
        self.flush()
    }

    /// Checks an outstanding deferred reply.  Returns `true` if it completed.
    pub fn poll_pending<H>(
        &mut self,
        password: Option<&str>,
        handler: &mut H,
    ) -> Result<bool, ConnectionError>
    where
        H: RequestHandler + ?Sized,
    {
        let Some(op) = self.pending.as_mut() else {
            return Ok(false);
        };
        let Some(body) = op.poll() else {
            return Ok(false);
        };
        self.pending = None;
        self.queue_reply(&body);
        self.process_requests(password, handler)?;
        self.flush()?;
        Ok(true)
    }

    /// Writes as much buffered output as the socket accepts.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Buffers inbound bytes.  Complete messages waiting behind a deferred
    /// reply do not count towards the limit; the unterminated tail does.
    fn append_input(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.unterminated = match bytes.iter().rposition(|&b| b == EOM) {
            Some(pos) => bytes.len() - pos - 1,
            None => self.unterminated + bytes.len(),
        };
        if self.unterminated > MAX_REQUEST_SIZE {
            return Err(ConnectionError::RequestTooLarge);
        }
        self.read_buf.extend_from_slice(bytes);
        Ok(())
    }

    fn process_requests<H>(
        &mut self,
        password: Option<&str>,
        handler: &mut H,
    ) -> Result<(), ConnectionError>
    where
        H: RequestHandler + ?Sized,
    {
        while self.pending.is_none() {
            let Some(msg) = wire::take_message(&mut self.read_buf) else {
                break;
            };
            let text = String::from_utf8_lossy(&msg);
            self.handle_request(&text, password, handler)?;
        }
        Ok(())
    }

    fn handle_request<H>(
        &mut self,
        request: &str,
        password: Option<&str>,
        handler: &mut H,
    ) -> Result<(), ConnectionError>
    where
        H: RequestHandler + ?Sized,
    {
        let op = wire::request_op(request).unwrap_or("");
        debug!(peer = %self.peer, op, "GUI RPC request");

        match op {
            "auth1" => {
                let nonce = auth::make_nonce();
                self.queue_reply(&format!("<nonce>{nonce}</nonce>\n"));
                self.nonce = Some(nonce);
            }
            "auth2" => {
                let expected = self
                    .nonce
                    .take()
                    .map(|n| auth::nonce_hash(&n, password.unwrap_or("")));
                let given = wire::extract_tag(request, "nonce_hash");
                if expected.is_some() && given == expected {
                    self.auth_needed = false;
                    self.queue_reply("<authorized/>\n");
                } else {
                    warn!(peer = %self.peer, "GUI RPC authentication failure");
                    self.queue_reply("<unauthorized/>\n");
                    let _ = self.flush();
                    return Err(ConnectionError::Unauthorized);
                }
            }
            _ if self.auth_needed => self.queue_reply("<unauthorized/>\n"),
            _ => {
                let ctx = RpcContext {
                    peer: self.peer,
                    is_local: self.is_local,
                };
                match handler.handle(op, request, &ctx) {
                    Reply::Now(body) => self.queue_reply(&body),
                    Reply::Deferred(pending) => self.pending = Some(pending),
                }
            }
        }
        Ok(())
    }

    fn queue_reply(&mut self, body: &str) {
        self.write_buf.extend_from_slice(&wire::wrap_reply(body));
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token)
            .field("peer", &self.peer)
            .field("is_local", &self.is_local)
            .field("auth_needed", &self.auth_needed)
            .field("buffered_in", &self.read_buf.len())
            .field("unterminated", &self.unterminated)
            .field("buffered_out", &self.write_buf.len())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
