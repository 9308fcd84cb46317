/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! GUI RPC password file and challenge/response helpers.
//!
//! The password file holds one line, the shared secret.  A client proves it
//! knows the secret by answering a server nonce with
//! `md5_hex(nonce + password)`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tracing::{info, warn};

use super::error::RpcError;

/// Reads the password from `path`, creating the file with a fresh random
/// password if it does not exist.
///
/// Returns `None` when the file exists but is empty: authentication is then
/// disabled.  `group_readable` selects mode 0660 instead of 0600.
///
/// # Errors
/// Returns [`RpcError::PasswordFile`] if the file exists but cannot be read,
/// or if a new file cannot be written.
pub fn load_or_create_password(
    path: &Path,
    group_readable: bool,
) -> Result<Option<String>, RpcError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let password = content.lines().next().unwrap_or("").trim().to_string();
            if password.is_empty() {
                warn!(
                    "{} is empty; GUI RPC authentication is disabled",
                    path.display()
                );
                Ok(None)
            } else {
                Ok(Some(password))
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let password = generate_password();
            write_password_file(path, &password, group_readable).map_err(|source| {
                RpcError::PasswordFile {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            info!("Created GUI RPC password file {}", path.display());
            Ok(Some(password))
        }
        Err(source) => Err(RpcError::PasswordFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// 32 hex characters from the OS random source, or a host-identity digest
/// if the OS source is unavailable.
pub fn generate_password() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Err(e) => {
            warn!("OS random source unavailable ({e}); deriving password from host identity");
            let host = fs::read_to_string("/etc/hostname")
                .map(|h| h.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "localhost".to_string());
            let seed = format!("{host}{}{}", std::process::id(), now_nanos());
            format!("{:x}", md5::compute(seed))
        }
    }
}

fn write_password_file(path: &Path, password: &str, group_readable: bool) -> io::Result<()> {
    let mode = if group_readable { 0o660 } else { 0o600 };
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(path)?;
    writeln!(file, "{password}")?;

    // The umask may have stripped the group bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// A fresh challenge for `<auth1/>`.
pub fn make_nonce() -> String {
    let salt: u64 = rand::thread_rng().gen();
    format!("{:.6}{salt:016x}", now_nanos() as f64 / 1e9)
}

/// The expected `<nonce_hash>` for `nonce` and `password`.
pub fn nonce_hash(nonce: &str, password: &str) -> String {
    format!("{:x}", md5::compute(format!("{nonce}{password}")))
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_password_is_32_hex_chars() {
        let p = generate_password();
        assert_eq!(p.len(), 32);
        assert!(p.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(p, generate_password());
    }

    #[test]
    fn missing_file_is_created_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gui_rpc_auth.cfg");

        let first = load_or_create_password(&path, false).unwrap().unwrap();
        assert!(path.exists());
        let second = load_or_create_password(&path, false).unwrap().unwrap();
        assert_eq!(first, second, "reload must be idempotent");
    }

    #[cfg(unix)]
    #[test]
    fn created_file_has_restricted_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let owner_only = dir.path().join("a.cfg");
        load_or_create_password(&owner_only, false).unwrap();
        let mode = fs::metadata(&owner_only).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let group = dir.path().join("b.cfg");
        load_or_create_password(&group, true).unwrap();
        let mode = fs::metadata(&group).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);
    }

    #[test]
    fn existing_file_first_line_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gui_rpc_auth.cfg");
        fs::write(&path, "  secret  \nignored\n").unwrap();
        assert_eq!(
            load_or_create_password(&path, false).unwrap().as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn empty_file_disables_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gui_rpc_auth.cfg");
        fs::write(&path, "").unwrap();
        assert_eq!(load_or_create_password(&path, false).unwrap(), None);
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let path = Path::new("/nonexistent/dir/gui_rpc_auth.cfg");
        assert!(matches!(
            load_or_create_password(path, false),
            Err(RpcError::PasswordFile { .. })
        ));
    }

    #[test]
    fn nonce_hash_is_md5_of_concatenation() {
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(nonce_hash("a", "bc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn nonces_differ() {
        assert_ne!(make_nonce(), make_nonce());
    }
}
