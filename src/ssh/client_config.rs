// ============================================================================
// File: src/ssh/client_config.rs
// ----------------------------------------------------------------------------
// Managed entry in the local SSH client configuration
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use log::info;

use crate::config::{ConnectionEntry, SSH_KEY_NAME};
use crate::error::{Error, Result};

const INCLUDE_HEADER: &str = "# Added by Bitrise\n# This will be added again if you remove it.";
const BLOCK_START: &str = "# --- Bitrise Generated ---";
const BLOCK_END: &str = "# -------------------------";

/// Editor for the user's local SSH client configuration.
///
/// The primary config (`~/.ssh/config`) only ever gains a one-time `Include`
/// directive; the managed host block itself lives in a dedicated file
/// (`~/.bitrise/remote-access/ssh_config`) that is rewritten in full on
/// every invocation. Only one managed host is tracked per local machine.
#[derive(Debug, Clone)]
pub struct SshClientConfig {
    primary_path: PathBuf,
    managed_path: PathBuf,
}

impl SshClientConfig {
    /// Paths under the current user's home directory
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| Error::Configuration {
            details: "cannot determine home directory".to_string(),
        })?;

        Ok(Self {
            primary_path: home.join(".ssh").join("config"),
            managed_path: home
                .join(".bitrise")
                .join("remote-access")
                .join("ssh_config"),
        })
    }

    /// Explicit paths, for tests
    pub fn with_paths(primary_path: PathBuf, managed_path: PathBuf) -> Self {
        Self {
            primary_path,
            managed_path,
        }
    }

    fn include_line(&self) -> String {
        format!("Include {}", self.managed_path.display())
    }

    /// Ensure the primary config includes the managed file. Idempotent.
    ///
    /// The include line is prepended, not appended: the managed block must
    /// take effect before any conflicting user entries, since the SSH client
    /// uses the first obtained value for each option.
    pub fn ensure_include(&self) -> Result<()> {
        let include_line = self.include_line();

        let existing = match fs::read_to_string(&self.primary_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.primary_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.primary_path, format!("{include_line}\n"))?;
                info!("Created {:?} with managed include", self.primary_path);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if existing.lines().any(|line| line == include_line) {
            return Ok(());
        }

        let mut content = format!("{INCLUDE_HEADER}\n{include_line}\n");
        content.push_str(&existing);
        if !content.ends_with('\n') {
            content.push('\n');
        }
        fs::write(&self.primary_path, content)?;
        info!("Prepended managed include to {:?}", self.primary_path);

        Ok(())
    }

    /// Overwrite the managed file with exactly one host block for `entry`.
    ///
    /// Overwrite, never merge. With `use_identity_key` the block references
    /// the generated identity file; password-based sessions instead get a
    /// preferred-authentication hint so the client does not waste attempts
    /// on missing keys.
    pub fn write_managed_host(&self, entry: &ConnectionEntry, use_identity_key: bool) -> Result<()> {
        if let Some(parent) = self.managed_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.managed_path, render_host_block(entry, use_identity_key))?;
        info!("Updated managed SSH config entry at {:?}", self.managed_path);

        Ok(())
    }
}

fn render_host_block(entry: &ConnectionEntry, use_identity_key: bool) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "{BLOCK_START}");
    let _ = writeln!(block, "Host {} # Bitrise CI VM", entry.host);
    let _ = writeln!(block, "  HostName {}", entry.host_name);
    let _ = writeln!(block, "  User {}", entry.user);
    let _ = writeln!(block, "  Port {}", entry.port);
    // The VM has no stable fingerprint, so don't prompt about known_hosts
    let _ = writeln!(block, "  StrictHostKeyChecking no");
    let _ = writeln!(block, "  CheckHostIP no");
    if use_identity_key {
        let _ = writeln!(block, "  IdentityFile ~/.ssh/{SSH_KEY_NAME}");
        let _ = writeln!(block, "  IdentitiesOnly yes");
    } else {
        let _ = writeln!(block, "  PreferredAuthentications password");
    }
    let _ = writeln!(block, "{BLOCK_END}");
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HOST_PATTERN;
    use assert_fs::TempDir;

    fn entry(host_name: &str, port: u16) -> ConnectionEntry {
        ConnectionEntry {
            host: HOST_PATTERN.to_string(),
            host_name: host_name.to_string(),
            user: "bitrise".to_string(),
            port,
            password: Some("pw".to_string()),
        }
    }

    fn config_in(dir: &TempDir) -> SshClientConfig {
        SshClientConfig::with_paths(
            dir.path().join(".ssh").join("config"),
            dir.path().join("remote-access").join("ssh_config"),
        )
    }

    #[test]
    fn ensure_include_creates_missing_config() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);

        cfg.ensure_include().expect("ensure include");

        let content = fs::read_to_string(&cfg.primary_path).expect("config written");
        assert_eq!(content, format!("{}\n", cfg.include_line()));
    }

    #[test]
    fn ensure_include_is_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);

        cfg.ensure_include().expect("first call");
        cfg.ensure_include().expect("second call");

        let content = fs::read_to_string(&cfg.primary_path).expect("config written");
        let occurrences = content
            .lines()
            .filter(|line| *line == cfg.include_line())
            .count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn include_is_prepended_before_user_entries() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);

        fs::create_dir_all(cfg.primary_path.parent().unwrap()).unwrap();
        fs::write(&cfg.primary_path, "Host personal\n  HostName example.com\n").unwrap();

        cfg.ensure_include().expect("ensure include");

        let content = fs::read_to_string(&cfg.primary_path).unwrap();
        let include_pos = content.find(&cfg.include_line()).expect("include present");
        let user_pos = content.find("Host personal").expect("user entry kept");
        assert!(include_pos < user_pos);
    }

    #[test]
    fn managed_host_is_overwritten_not_merged() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);

        cfg.write_managed_host(&entry("10.0.0.1", 22), false)
            .expect("first write");
        cfg.write_managed_host(&entry("10.0.0.2", 2222), true)
            .expect("second write");

        let content = fs::read_to_string(&cfg.managed_path).unwrap();
        let host_blocks = content
            .lines()
            .filter(|line| line.starts_with("Host "))
            .count();
        assert_eq!(host_blocks, 1);
        assert!(content.contains("HostName 10.0.0.2"));
        assert!(content.contains("Port 2222"));
        assert!(!content.contains("10.0.0.1"));
    }

    #[test]
    fn identity_key_toggles_auth_options() {
        let with_key = render_host_block(&entry("10.0.0.1", 22), true);
        assert!(with_key.contains(&format!("IdentityFile ~/.ssh/{SSH_KEY_NAME}")));
        assert!(with_key.contains("IdentitiesOnly yes"));
        assert!(!with_key.contains("PreferredAuthentications"));

        let without_key = render_host_block(&entry("10.0.0.1", 22), false);
        assert!(!without_key.contains("IdentityFile"));
        assert!(without_key.contains("PreferredAuthentications password"));
    }

    #[test]
    fn block_is_delimited() {
        let block = render_host_block(&entry("10.0.0.1", 22), false);
        assert!(block.starts_with(BLOCK_START));
        assert!(block.trim_end().ends_with(BLOCK_END));
    }
}
