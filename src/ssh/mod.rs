// ============================================================================
// File: src/ssh/mod.rs
// ----------------------------------------------------------------------------
// SSH transport and remote orchestration
// ============================================================================

mod bootstrap;
mod client_config;
mod keys;
mod pty;
mod remote_file;

pub use bootstrap::{
    BootstrapOutcome, Checkpoints, OsFlavor, RemoteEnvFacts, Waiters, bootstrap,
    LINUX_DEFAULT_SOURCE_DIR,
};
pub use client_config::SshClientConfig;
pub use pty::run_with_pty;
pub use remote_file::{CopyItem, write_via_sftp, write_via_shell};

use std::net::TcpStream;

use log::info;
use ssh2::Session;

use crate::config::ConnectionEntry;
use crate::error::{Error, Result};

/// Open a password-authenticated SSH session to the remote VM.
///
/// Host-key verification is intentionally skipped: the remote host is
/// ephemeral CI infrastructure with no stable fingerprint. A TCP dial
/// failure is classified as [`Error::Connectivity`] so the caller can show a
/// reachability hint, distinct from authentication failures.
pub(crate) fn connect(entry: &ConnectionEntry) -> Result<Session> {
    let password = entry
        .password
        .as_deref()
        .ok_or_else(|| Error::remote("connect", "no password supplied for this session"))?;

    let tcp = TcpStream::connect((entry.host_name.as_str(), entry.port)).map_err(|e| {
        Error::Connectivity {
            details: e.to_string(),
        }
    })?;

    let mut session = Session::new().map_err(|e| Error::remote("create session", e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| Error::remote("SSH handshake", e.to_string()))?;

    session
        .userauth_password(&entry.user, password)
        .map_err(|e| Error::remote("password authentication", e.to_string()))?;

    if !session.authenticated() {
        return Err(Error::remote("password authentication", "rejected by host"));
    }

    info!("Connected to {}:{}", entry.host_name, entry.port);
    Ok(session)
}
