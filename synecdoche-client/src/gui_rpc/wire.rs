/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! GUI RPC message framing.
//!
//! Each request and reply is a small XML document terminated by a single
//! `0x03` byte.  Only the pieces the server needs to dispatch a request are
//! parsed here: the operation tag and the occasional scalar child element.

/// End-of-message marker.
pub const EOM: u8 = 0x03;

/// Largest request accepted without a terminator.
pub const MAX_REQUEST_SIZE: usize = 256 * 1024;

const REQUEST_TAG: &str = "boinc_gui_rpc_request";
const REPLY_TAG: &str = "boinc_gui_rpc_reply";

/// Removes the first complete message from `buf`, without its terminator.
pub fn take_message(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buf.iter().position(|&b| b == EOM)?;
    let mut msg: Vec<u8> = buf.drain(..=end).collect();
    msg.pop();
    Some(msg)
}

/// Frames a reply body for the wire.
pub fn wrap_reply(body: &str) -> Vec<u8> {
    wrap(REPLY_TAG, body)
}

/// Frames a request body for the wire (used by clients).
pub fn wrap_request(body: &str) -> Vec<u8> {
    wrap(REQUEST_TAG, body)
}

fn wrap(tag: &str, body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2 * tag.len() + 8);
    out.extend_from_slice(format!("<{tag}>\n").as_bytes());
    out.extend_from_slice(body.as_bytes());
    if !body.is_empty() && !body.ends_with('\n') {
        out.push(b'\n');
    }
    out.extend_from_slice(format!("</{tag}>\n").as_bytes());
    out.push(EOM);
    out
}

/// Name of the first element inside the request wrapper, e.g. `"auth1"`
/// for `<boinc_gui_rpc_request><auth1/></boinc_gui_rpc_request>`.
///
/// Unwrapped messages are accepted as well.
pub fn request_op(msg: &str) -> Option<&str> {
    let mut rest = msg;
    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        if rest.starts_with('?') || rest.starts_with('/') || rest.starts_with('!') {
            continue;
        }
        let end = rest
            .find(|c: char| c == '>' || c == '/' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..end];
        if name.is_empty() || name == REQUEST_TAG || name == REPLY_TAG {
            continue;
        }
        return Some(name);
    }
    None
}

/// Text content of the first `<tag>…</tag>` element, trimmed.
pub fn extract_tag(msg: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = msg.find(&open)? + open.len();
    let len = msg[start..].find(&close)?;
    Some(msg[start..start + len].trim().to_string())
}

/// Escapes the five XML special characters.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
