// ============================================================================
// File: src/ssh/keys.rs
// ----------------------------------------------------------------------------
// Local key pair management and remote authorized_keys provisioning
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;
use ssh2::Session;

use crate::config::{ConnectionEntry, SSH_KEY_NAME};
use crate::error::{Error, ProvisioningWarning, Result};

use super::remote_file::{CopyItem, write_via_shell};

/// Remove any stale known_hosts entry for the target host:port.
///
/// The VM address gets recycled between builds, so a leftover key would make
/// the subsequent connection fail outright. Failure here is fatal to the
/// whole bootstrap.
pub(crate) fn remove_host_key(entry: &ConnectionEntry) -> Result<()> {
    let host_port = entry.bracketed_host_port();
    let output = Command::new("ssh-keygen")
        .args(["-R", &host_port])
        .output()
        .map_err(|e| Error::Configuration {
            details: format!("run ssh-keygen -R: {e}"),
        })?;

    if !output.status.success() {
        return Err(Error::Configuration {
            details: format!(
                "remove host key for {host_port}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(())
}

/// Generate the local ed25519 key pair if it does not exist yet and return
/// the private key path.
pub(crate) fn ensure_local_keypair() -> std::result::Result<PathBuf, ProvisioningWarning> {
    let ssh_dir = dirs::home_dir()
        .map(|home| home.join(".ssh"))
        .ok_or_else(|| ProvisioningWarning::KeyProvisioning {
            details: "cannot determine home directory".to_string(),
        })?;

    ensure_keypair_at(&ssh_dir)
}

fn ensure_keypair_at(ssh_dir: &Path) -> std::result::Result<PathBuf, ProvisioningWarning> {
    let key_path = ssh_dir.join(SSH_KEY_NAME);
    if key_path.exists() {
        return Ok(key_path);
    }

    fs::create_dir_all(ssh_dir).map_err(|e| ProvisioningWarning::KeyProvisioning {
        details: format!("create {ssh_dir:?}: {e}"),
    })?;

    info!("Generating local SSH key pair at {key_path:?}");
    let output = Command::new("ssh-keygen")
        .arg("-t")
        .arg("ed25519")
        .arg("-f")
        .arg(&key_path)
        .args(["-C", "Bitrise remote access key", "-N", ""])
        .output()
        .map_err(|e| ProvisioningWarning::KeyProvisioning {
            details: format!("run ssh-keygen: {e}"),
        })?;

    if !output.status.success() {
        return Err(ProvisioningWarning::KeyProvisioning {
            details: format!(
                "generate SSH key: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(key_path)
}

/// Append the local public key to the remote `authorized_keys`, suppressing
/// duplicates across re-runs. An already-present key is success.
///
/// Uses the command-based writer so `~` expands on the remote side; this
/// also keeps the step working when the remote stack has no SFTP subsystem.
pub(crate) fn provision_authorized_key(
    session: &Session,
    key_path: &Path,
) -> std::result::Result<(), ProvisioningWarning> {
    let public_key = fs::read_to_string(key_path.with_extension("pub")).map_err(|e| {
        ProvisioningWarning::KeyProvisioning {
            details: format!("read public key: {e}"),
        }
    })?;

    let item = CopyItem {
        content: public_key.trim_end().to_string(),
        remote_path: "~/.ssh/authorized_keys".to_string(),
        append: true,
        reject_if_present: true,
        ..Default::default()
    };

    match write_via_shell(session, &item) {
        Ok(()) => {
            info!("Public key installed on the remote host");
            Ok(())
        }
        Err(err) if err.is_already_exists() => {
            info!("Public key already installed on the remote host");
            Ok(())
        }
        Err(err) => Err(ProvisioningWarning::KeyProvisioning {
            details: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ssh_keygen_available() -> bool {
        Command::new("ssh-keygen")
            .arg("-?")
            .output()
            .is_ok()
    }

    #[test]
    fn keypair_is_generated_once() {
        if !ssh_keygen_available() {
            return; // skip where openssh client tools are missing
        }

        let dir = tempdir().expect("temp dir");
        let key_path = ensure_keypair_at(dir.path()).expect("generate key");
        assert!(key_path.exists());
        assert!(key_path.with_extension("pub").exists());

        let first = fs::read(&key_path).unwrap();
        let again = ensure_keypair_at(dir.path()).expect("reuse key");
        assert_eq!(again, key_path);
        assert_eq!(fs::read(&key_path).unwrap(), first);
    }
}
