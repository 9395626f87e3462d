// ============================================================================
// File: src/config/mod.rs
// ----------------------------------------------------------------------------
// Connection parameter validation and SSH snippet parsing
// ============================================================================

use std::net::{IpAddr, ToSocketAddrs};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed host pattern representing "the current remote CI VM" in the local
/// SSH configuration, decoupled from the VM's real hostname.
pub const HOST_PATTERN: &str = "BitriseRunningVM";

/// Name of the generated local key pair under `~/.ssh`
pub const SSH_KEY_NAME: &str = "id_bitrise_remote_access";

/// Validated connection descriptor, created once per invocation.
///
/// The password is kept in memory only and is never written into the SSH
/// configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// Managed host alias ([`HOST_PATTERN`])
    pub host: String,
    /// Real remote hostname or IP address
    pub host_name: String,
    /// Username for the SSH connection
    pub user: String,
    /// TCP port, 1..=65535
    pub port: u16,
    /// Password for the initial password-authenticated session. `None` for
    /// reconnect sessions where the host entry was provisioned previously.
    pub password: Option<String>,
}

impl ConnectionEntry {
    /// `[host]:port` form used by known_hosts tooling
    pub fn bracketed_host_port(&self) -> String {
        format!("[{}]:{}", self.host_name, self.port)
    }
}

/// Build a validated [`ConnectionEntry`] from raw flag values.
///
/// Fails when host, port or user is missing, when the port does not parse
/// into 1..=65535, or when a non-literal hostname does not resolve. No
/// connection attempt is made here.
pub fn validate(
    host: &str,
    port: &str,
    user: &str,
    password: Option<String>,
) -> Result<ConnectionEntry> {
    let host = host.trim();
    let user = user.trim();
    let port = port.trim();

    if host.is_empty() {
        return Err(Error::validation("SSH hostname is required"));
    }
    if user.is_empty() {
        return Err(Error::validation("SSH username is required"));
    }
    if port.is_empty() {
        return Err(Error::validation("SSH port is required"));
    }

    let port: u16 = match port.parse() {
        Ok(0) | Err(_) => {
            return Err(Error::validation(format!(
                "invalid SSH port '{port}': expected a number between 1 and 65535"
            )));
        }
        Ok(p) => p,
    };

    // Literal IPs are taken as-is, anything else must resolve
    if host.parse::<IpAddr>().is_err() {
        (host, port).to_socket_addrs().map_err(|e| {
            Error::validation(format!("cannot resolve SSH hostname '{host}': {e}"))
        })?;
    }

    Ok(ConnectionEntry {
        host: HOST_PATTERN.to_string(),
        host_name: host.to_string(),
        user: user.to_string(),
        port,
        password,
    })
}

/// Parse the `ssh ... user@host -p PORT` snippet copied from the build page.
pub fn parse_ssh_snippet(snippet: &str, password: Option<String>) -> Result<ConnectionEntry> {
    let re = Regex::new(r"ssh .* (.*)@(.*) -p (\d+)").expect("snippet pattern is valid");
    let captures = re
        .captures(snippet)
        .ok_or_else(|| Error::validation(format!("invalid SSH snippet: {snippet}")))?;

    validate(&captures[2], &captures[3], &captures[1], password)
}
