// ============================================================================
// File: src/ssh/remote_file.rs
// ----------------------------------------------------------------------------
// Idempotent remote file writes, via SFTP or a command-based fallback
// ============================================================================

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use log::info;
use ssh2::{OpenFlags, OpenType, Session};

use crate::error::{Error, Result};

use super::pty::run_with_pty;

/// One remote file write request.
#[derive(Debug, Clone, Default)]
pub struct CopyItem {
    /// File content before placeholder substitution
    pub content: String,
    /// Absolute remote destination path
    pub remote_path: String,
    /// Literal find/replace pairs applied to the content before writing.
    /// Keys are distinct environment-variable tokens, so iteration order
    /// does not matter.
    pub replacements: HashMap<String, String>,
    /// Append to an existing file instead of failing on it
    pub append: bool,
    /// When appending, fail with [`Error::RemoteFileExists`] if the
    /// substituted content is already a substring of the file. Used for
    /// idempotent re-runs; callers treat that error as success-equivalent.
    pub reject_if_present: bool,
}

impl CopyItem {
    fn substituted_content(&self) -> String {
        let mut content = self.content.clone();
        for (key, value) in &self.replacements {
            content = content.replace(key, value);
        }
        content
    }

    fn already_exists(&self) -> Error {
        Error::RemoteFileExists {
            path: self.remote_path.clone(),
        }
    }

    /// Parent directory of the remote path, if it has one
    fn remote_parent(&self) -> Option<&str> {
        match self.remote_path.rsplit_once('/') {
            Some(("", _)) | None => None,
            Some((parent, _)) => Some(parent),
        }
    }
}

/// Write a [`CopyItem`] through an SFTP channel.
pub fn write_via_sftp(session: &Session, item: &CopyItem) -> Result<()> {
    let sftp = session
        .sftp()
        .map_err(|e| Error::remote("create SFTP channel", e.to_string()))?;

    let remote_path = Path::new(&item.remote_path);
    let exists = sftp.stat(remote_path).is_ok();

    if exists && !item.append {
        return Err(item.already_exists());
    }

    let content = item.substituted_content();

    if item.reject_if_present && exists {
        let mut file = sftp
            .open(remote_path)
            .map_err(|e| Error::remote("read remote file", e.to_string()))?;
        let mut existing = String::new();
        file.read_to_string(&mut existing)
            .map_err(|e| Error::remote("read remote file", e.to_string()))?;

        if is_duplicate(&existing, &content, false) {
            return Err(item.already_exists());
        }
    }

    if let Some(parent) = item.remote_parent() {
        sftp_mkdir_all(&sftp, parent)?;
    }

    let mut flags = OpenFlags::WRITE | OpenFlags::CREATE;
    flags |= if item.append && exists {
        OpenFlags::APPEND
    } else {
        OpenFlags::TRUNCATE
    };

    info!("Writing to {:?}", item.remote_path);
    let mut file = sftp
        .open_mode(remote_path, flags, 0o644, OpenType::File)
        .map_err(|e| Error::remote("open remote file", e.to_string()))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::remote("write remote file", e.to_string()))?;

    Ok(())
}

/// Write a [`CopyItem`] without a file-transfer channel, using only POSIX
/// shell constructs over the pty runner.
///
/// Content is written line by line through quoted `echo` redirections; a
/// single multi-line here-doc would be a quoting hazard over the pty
/// channel. Paths go into the commands unquoted so `~` still expands.
pub fn write_via_shell(session: &Session, item: &CopyItem) -> Result<()> {
    let check = format!(
        "if [ -f {} ]; then echo exists; else echo missing; fi",
        item.remote_path
    );
    let results = run_with_pty(session, std::slice::from_ref(&check), "", true)?;
    let exists = results
        .get(&check)
        .is_some_and(|out| out.contains("exists"));

    if exists && !item.append {
        return Err(item.already_exists());
    }

    let content = item.substituted_content();

    if item.reject_if_present && exists {
        let read = format!("cat {} | tr '\\n' ' '", item.remote_path);
        let results = run_with_pty(session, std::slice::from_ref(&read), "", true)?;
        let existing = results.get(&read).map(String::as_str).unwrap_or_default();

        if is_duplicate(existing, &content, true) {
            return Err(item.already_exists());
        }
    }

    if let Some(parent) = item.remote_parent() {
        let mkdir = format!("mkdir -p {parent}");
        run_with_pty(session, std::slice::from_ref(&mkdir), "", false)?;
    }

    info!("Writing to {:?}", item.remote_path);
    let appending = exists && item.append;
    let commands = line_write_commands(&content, &item.remote_path, appending);
    run_with_pty(session, &commands, "", false)?;

    Ok(())
}

/// Decide whether `content` is already present in the existing remote file.
/// The shell read path flattens newlines to spaces (`tr '\n' ' '`), so the
/// candidate content is flattened the same way before the substring check.
fn is_duplicate(existing: &str, content: &str, flatten_newlines: bool) -> bool {
    if flatten_newlines {
        existing.contains(&content.replace('\n', " "))
    } else {
        existing.contains(content)
    }
}

/// Build the per-line `echo` redirections that write `content` remotely.
/// The first line truncates unless we are appending to an existing file.
fn line_write_commands(content: &str, remote_path: &str, appending: bool) -> Vec<String> {
    let mut appending = appending;
    content
        .split('\n')
        .map(|line| {
            let operator = if appending { ">>" } else { ">" };
            appending = true;
            format!("echo '{line}' {operator} {remote_path}")
        })
        .collect()
}

/// Recursively create remote directories over SFTP. Creation failures on
/// intermediate components are ignored, they usually mean "already exists";
/// a genuinely unwritable path surfaces when the file itself is opened.
fn sftp_mkdir_all(sftp: &ssh2::Sftp, dir: &str) -> Result<()> {
    let mut current = String::new();
    for component in dir.split('/').filter(|c| !c.is_empty()) {
        if dir.starts_with('/') || !current.is_empty() {
            current.push('/');
        }
        current.push_str(component);

        let path = Path::new(&current);
        if sftp.stat(path).is_err() {
            let _ = sftp.mkdir(path, 0o755);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_replaces_all_tokens() {
        let item = CopyItem {
            content: "dir: BITRISE_SOURCE_DIR\nrev: STACK_REV\n".into(),
            replacements: HashMap::from([
                ("BITRISE_SOURCE_DIR".to_string(), "/bitrise/src".to_string()),
                ("STACK_REV".to_string(), "osx-xcode-16".to_string()),
            ]),
            ..Default::default()
        };

        assert_eq!(
            item.substituted_content(),
            "dir: /bitrise/src\nrev: osx-xcode-16\n"
        );
    }

    #[test]
    fn substitution_without_replacements_is_identity() {
        let item = CopyItem {
            content: "unchanged".into(),
            ..Default::default()
        };
        assert_eq!(item.substituted_content(), "unchanged");
    }

    #[test]
    fn remote_parent_of_nested_path() {
        let item = CopyItem {
            remote_path: "/bitrise/src/README.md".into(),
            ..Default::default()
        };
        assert_eq!(item.remote_parent(), Some("/bitrise/src"));
    }

    #[test]
    fn remote_parent_of_root_level_path_is_none() {
        let item = CopyItem {
            remote_path: "/README.md".into(),
            ..Default::default()
        };
        assert_eq!(item.remote_parent(), None);
    }

    #[test]
    fn exact_duplicate_is_rejected() {
        assert!(is_duplicate("ssh-ed25519 AAAA key\n", "ssh-ed25519 AAAA key\n", false));
    }

    #[test]
    fn substring_duplicate_is_rejected() {
        let authorized_keys = "ssh-rsa BBBB other\nssh-ed25519 AAAA key\n";
        assert!(is_duplicate(authorized_keys, "ssh-ed25519 AAAA key\n", false));
    }

    #[test]
    fn flattened_read_still_detects_multiline_duplicate() {
        // What `cat file | tr '\n' ' '` hands back for a two-line file
        let flattened = "cat /etc/motd ssh-ed25519 AAAA key ";
        assert!(is_duplicate(flattened, "ssh-ed25519 AAAA key", true));
        assert!(is_duplicate(flattened, "cat /etc/motd\nssh-ed25519 AAAA key", true));
    }

    #[test]
    fn new_content_is_not_a_duplicate() {
        let authorized_keys = "ssh-rsa BBBB other\n";
        assert!(!is_duplicate(authorized_keys, "ssh-ed25519 AAAA key\n", false));
        assert!(!is_duplicate(authorized_keys, "ssh-ed25519 AAAA key", true));
    }

    #[test]
    fn fresh_write_truncates_then_appends() {
        let commands = line_write_commands("one\ntwo", "/tmp/f", false);
        assert_eq!(
            commands,
            vec![
                "echo 'one' > /tmp/f".to_string(),
                "echo 'two' >> /tmp/f".to_string(),
            ]
        );
    }

    #[test]
    fn append_write_never_truncates() {
        let commands = line_write_commands("one\ntwo", "/tmp/f", true);
        assert!(commands.iter().all(|c| c.contains(">>")));
    }
}
