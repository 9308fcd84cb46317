/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! rpc-probe – manual GUI RPC client for a running Synecdoche client.
//!
//! Connects, authenticates when a password is available, sends one request
//! and prints the reply.
//!
//! Example:
//!   rpc-probe --password-file /var/lib/synecdoche/gui_rpc_auth.cfg get_rr_sim

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, error, info};

use synecdoche_client::config::DEFAULT_GUI_RPC_PORT;
use synecdoche_client::gui_rpc::auth::nonce_hash;
use synecdoche_client::gui_rpc::wire;

// ── CLI argument definition ───────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "rpc-probe", about = "Send one GUI RPC request and print the reply")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short = 'p', long, default_value_t = DEFAULT_GUI_RPC_PORT)]
    port: u16,

    /// Password; takes precedence over --password-file.
    #[arg(long)]
    password: Option<String>,

    /// File holding the password on its first line.
    #[arg(long = "password-file")]
    password_file: Option<PathBuf>,

    /// Read timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Operation to send, e.g. `get_cc_status`.
    #[arg(default_value = "get_cc_status")]
    op: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let password = match (cli.password, &cli.password_file) {
        (Some(p), _) => Some(p),
        (None, Some(path)) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read password file: {}", path.display()))?;
            Some(content.lines().next().unwrap_or("").trim().to_string())
                .filter(|p| !p.is_empty())
        }
        (None, None) => None,
    };

    let addr = format!("{}:{}", cli.host, cli.port);
    info!("Connecting to {addr}");
    let mut stream =
        TcpStream::connect(&addr).with_context(|| format!("Cannot connect to {addr}"))?;
    stream.set_read_timeout(Some(Duration::from_secs(cli.timeout)))?;

    if let Some(password) = password {
        let reply = exchange(&mut stream, "<auth1/>")?;
        let Some(nonce) = wire::extract_tag(&reply, "nonce") else {
            bail!("auth1 reply carried no nonce: {reply}");
        };
        let hash = nonce_hash(&nonce, &password);
        let reply = exchange(
            &mut stream,
            &format!("<auth2>\n<nonce_hash>{hash}</nonce_hash>\n</auth2>"),
        )?;
        if !reply.contains("<authorized/>") {
            bail!("authentication rejected");
        }
        info!("Authenticated");
    }

    let reply = exchange(&mut stream, &format!("<{}/>", cli.op))?;
    println!("{reply}");
    Ok(())
}

/// Sends one request and reads until the terminator.
fn exchange(stream: &mut TcpStream, body: &str) -> Result<String> {
    debug!(request = body, "sending");
    stream.write_all(&wire::wrap_request(body))?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).context("reading reply")?;
        if n == 0 {
            bail!("server closed the connection");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(msg) = wire::take_message(&mut buf) {
            return Ok(String::from_utf8_lossy(&msg).into_owned());
        }
    }
}
