/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error types for the GUI RPC server.
//!
//! * [`RpcError`]: failures of the server as a whole, such as the listening
//!   socket or the password file.  Bind failures are expected at startup and
//!   retried by the caller.
//! * [`ConnectionError`]: failures of a single client connection.  The
//!   connection set destroys that connection and carries on.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use super::wire::MAX_REQUEST_SIZE;

/// Server-level GUI RPC failure.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Creating, binding or listening on the GUI RPC socket failed.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The password file could not be read or written.
    #[error("password file {}: {source}", .path.display())]
    PasswordFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An operation needs the listening socket but [`init`] has not
    /// succeeded.
    ///
    /// [`init`]: super::ConnectionSet::init
    #[error("GUI RPC server is not listening")]
    NotListening,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of one client connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("request exceeds {} bytes without a terminator", MAX_REQUEST_SIZE)]
    RequestTooLarge,

    /// The client answered the challenge with a wrong hash.
    #[error("authentication failed")]
    Unauthorized,

    #[error(transparent)]
    Io(#[from] io::Error),
}
