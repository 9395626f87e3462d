// ============================================================================
// File: src/ssh/bootstrap.rs
// ----------------------------------------------------------------------------
// Remote environment bootstrap: detection, provisioning, checkpoints.
//
// Sequential state machine, no backtracking:
//   Init -> HostKeyCleared -> Connected -> EnvironmentDetected
//        -> {MacPath | LinuxPath | UnknownOsPath} -> Done
//
// Two one-shot checkpoints are fired exactly once along the way. The auth
// mode is known before the slower provisioning work finishes, so a
// concurrent consumer can already write the local SSH config entry while
// the bootstrap continues.
// ============================================================================

use std::collections::HashMap;

use log::{info, warn};
use ssh2::Session;
use tokio::sync::oneshot;

use crate::config::ConnectionEntry;
use crate::error::{ProvisioningWarning, Result};

use super::keys::{ensure_local_keypair, provision_authorized_key, remove_host_key};
use super::pty::run_with_pty;
use super::remote_file::{CopyItem, write_via_sftp, write_via_shell};

const SOURCE_DIR_ENV: &str = "BITRISE_SOURCE_DIR";
const OS_TYPE_ENV: &str = "OSTYPE";
const MAC_REVISION_ENV: &str = "BITRISE_OSX_STACK_REV_ID";
const LINUX_REVISION_ENV: &str = "BITRISE_STACK_REV_ID";

/// Fallback source directory on Linux stacks, where the env var is often
/// unset inside the build container.
pub const LINUX_DEFAULT_SOURCE_DIR: &str = "/bitrise/src";

const REMOTE_README_NAME: &str = "README_REMOTE_ACCESS.md";
const README_CONTENT: &str = include_str!("../../assets/README_REMOTE_ACCESS.md");

/// Remote OS flavor, resolved once from the raw `OSTYPE` string and never
/// re-matched at use sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFlavor {
    MacOs,
    Linux,
    Unknown,
}

impl OsFlavor {
    pub fn from_os_type(os_type: &str) -> Self {
        if os_type.contains("darwin") {
            OsFlavor::MacOs
        } else if os_type.contains("linux") {
            OsFlavor::Linux
        } else {
            OsFlavor::Unknown
        }
    }
}

/// Facts gathered once per session by interrogating remote env vars.
#[derive(Debug, Clone, Default)]
pub struct RemoteEnvFacts {
    pub os_type: String,
    pub source_dir: String,
    pub stack_revision: String,
}

impl RemoteEnvFacts {
    pub fn flavor(&self) -> OsFlavor {
        OsFlavor::from_os_type(&self.os_type)
    }
}

/// The essentials the editor launch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub use_identity_key: bool,
    pub source_dir: String,
}

/// Sender half of the two bootstrap checkpoints. Each fires exactly once;
/// firing consumes the sender, so a double fire is impossible by
/// construction.
#[derive(Debug)]
pub struct Checkpoints {
    auth_mode: Option<oneshot::Sender<bool>>,
    essentials: Option<oneshot::Sender<String>>,
}

/// Receiver half, consumed by the editor launch coordinator.
#[derive(Debug)]
pub struct Waiters {
    pub auth_mode: oneshot::Receiver<bool>,
    pub essentials: oneshot::Receiver<String>,
}

impl Checkpoints {
    pub fn channel() -> (Checkpoints, Waiters) {
        let (auth_tx, auth_rx) = oneshot::channel();
        let (essentials_tx, essentials_rx) = oneshot::channel();
        (
            Checkpoints {
                auth_mode: Some(auth_tx),
                essentials: Some(essentials_tx),
            },
            Waiters {
                auth_mode: auth_rx,
                essentials: essentials_rx,
            },
        )
    }

    pub(crate) fn fire_auth_mode(&mut self, use_identity_key: bool) {
        if let Some(tx) = self.auth_mode.take() {
            let _ = tx.send(use_identity_key);
        }
    }

    pub(crate) fn fire_essentials(&mut self, source_dir: &str) {
        if let Some(tx) = self.essentials.take() {
            let _ = tx.send(source_dir.to_string());
        }
    }
}

/// Bootstrap the remote environment.
///
/// Host-key cleanup and connection failures abort the whole sequence and
/// propagate. Everything after a successful connection is best effort:
/// provisioning failures are logged and swallowed, because degraded remote
/// ergonomics must never prevent the editor from launching.
///
/// Both checkpoints have fired exactly once when this returns Ok; on error
/// the unfired senders are dropped, which fails the waiters cleanly.
pub fn bootstrap(entry: &ConnectionEntry, mut checkpoints: Checkpoints) -> Result<BootstrapOutcome> {
    info!("Setting up remote environment...");

    // Reconnect session: the host entry was provisioned by an earlier run,
    // there is nothing to do remotely.
    if entry.password.is_none() {
        info!("No password supplied, skipping remote setup");
        checkpoints.fire_auth_mode(false);
        checkpoints.fire_essentials("");
        return Ok(BootstrapOutcome {
            use_identity_key: false,
            source_dir: String::new(),
        });
    }

    info!("Removing old host key...");
    remove_host_key(entry)?;

    let session = super::connect(entry)?;

    let facts = detect_environment(&session)?;
    info!(
        "Remote environment: OSTYPE={:?}, source dir={:?}",
        facts.os_type, facts.source_dir
    );

    let outcome = branch_outcome(facts.flavor(), &facts.source_dir);

    match facts.flavor() {
        OsFlavor::MacOs => mac_path(&session, &facts, &outcome, &mut checkpoints),
        OsFlavor::Linux => linux_path(&session, &facts, &outcome, &mut checkpoints),
        OsFlavor::Unknown => {
            warn!(
                "Unknown remote OS type {:?}, skipping provisioning",
                facts.os_type
            );
            checkpoints.fire_auth_mode(outcome.use_identity_key);
            checkpoints.fire_essentials(&outcome.source_dir);
        }
    }

    Ok(outcome)
}

/// Per-OS launch essentials. macOS stacks get key-based auth; everything
/// else stays on password auth. Linux falls back to the well-known container
/// source directory when detection came back empty.
fn branch_outcome(flavor: OsFlavor, detected_source_dir: &str) -> BootstrapOutcome {
    match flavor {
        OsFlavor::MacOs => BootstrapOutcome {
            use_identity_key: true,
            source_dir: detected_source_dir.to_string(),
        },
        OsFlavor::Linux => BootstrapOutcome {
            use_identity_key: false,
            source_dir: linux_source_dir(detected_source_dir),
        },
        OsFlavor::Unknown => BootstrapOutcome {
            use_identity_key: false,
            source_dir: detected_source_dir.to_string(),
        },
    }
}

/// macOS stack: provision key auth and shell ergonomics, then the README.
fn mac_path(
    session: &Session,
    facts: &RemoteEnvFacts,
    outcome: &BootstrapOutcome,
    checkpoints: &mut Checkpoints,
) {
    info!("Ensuring SSH key is available...");
    match ensure_local_keypair() {
        Ok(key_path) => {
            if let Err(warning) = provision_authorized_key(session, &key_path) {
                warn!("{warning}");
            }
        }
        Err(warning) => warn!("{warning}"),
    }

    // The config entry can reference the identity file even if the copy
    // above failed; a failed key login falls back to the password prompt.
    checkpoints.fire_auth_mode(outcome.use_identity_key);

    info!("Adding message of the day to shell configs...");
    if let Err(warning) = add_motd_to_shell_configs(session) {
        warn!("{warning}");
    }

    checkpoints.fire_essentials(&outcome.source_dir);

    if let Err(warning) = copy_readme(session, facts, true) {
        warn!("{warning}");
    }
}

/// Linux stack: the VM runs the build in a Docker container and remote
/// access bridges the two with `docker exec`, so the key-copy tooling is
/// unavailable. Key provisioning and MOTD editing are skipped entirely.
fn linux_path(
    session: &Session,
    facts: &RemoteEnvFacts,
    outcome: &BootstrapOutcome,
    checkpoints: &mut Checkpoints,
) {
    checkpoints.fire_auth_mode(outcome.use_identity_key);
    checkpoints.fire_essentials(&outcome.source_dir);

    let facts = RemoteEnvFacts {
        source_dir: outcome.source_dir.clone(),
        ..facts.clone()
    };
    // No SFTP subsystem assumed inside the container
    if let Err(warning) = copy_readme(session, &facts, false) {
        warn!("{warning}");
    }
}

fn linux_source_dir(detected: &str) -> String {
    if detected.is_empty() {
        LINUX_DEFAULT_SOURCE_DIR.to_string()
    } else {
        detected.to_string()
    }
}

/// Batch-read the remote environment variables in one pty call.
///
/// Only one of the two stack-revision variables is populated depending on
/// the remote OS family, so both are read defensively.
fn detect_environment(session: &Session) -> Result<RemoteEnvFacts> {
    let vars = [
        SOURCE_DIR_ENV,
        OS_TYPE_ENV,
        MAC_REVISION_ENV,
        LINUX_REVISION_ENV,
    ];
    let commands: Vec<String> = vars.iter().map(|var| format!("echo ${var}")).collect();

    let results = run_with_pty(session, &commands, "", true)?;

    let value = |var: &str| -> String {
        results
            .get(&format!("echo ${var}"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    Ok(RemoteEnvFacts {
        os_type: value(OS_TYPE_ENV),
        source_dir: value(SOURCE_DIR_ENV),
        stack_revision: pick_revision(value(MAC_REVISION_ENV), value(LINUX_REVISION_ENV)),
    })
}

fn pick_revision(mac_revision: String, linux_revision: String) -> String {
    if mac_revision.is_empty() {
        linux_revision
    } else {
        mac_revision
    }
}

/// Grep-guarded append of the MOTD invocation to the known shell rc files,
/// so every interactive shell greets with the connection instructions.
fn add_motd_to_shell_configs(session: &Session) -> std::result::Result<(), ProvisioningWarning> {
    let commands: Vec<String> = ["~/.zshrc", "~/.bashrc"]
        .iter()
        .map(|rc| {
            format!(r#"grep -qxF "cat /etc/motd" {rc} || echo "cat /etc/motd" >> {rc}"#)
        })
        .collect();

    run_with_pty(session, &commands, "", false)
        .map(|_| ())
        .map_err(|e| ProvisioningWarning::MotdUpdate {
            details: e.to_string(),
        })
}

/// Best-effort copy of the README artifact into the source directory, with
/// the environment placeholders substituted. Purely cosmetic: failures are
/// warnings, and an already-present README counts as done.
fn copy_readme(
    session: &Session,
    facts: &RemoteEnvFacts,
    via_sftp: bool,
) -> std::result::Result<(), ProvisioningWarning> {
    if facts.source_dir.is_empty() {
        return Err(ProvisioningWarning::ReadmeCopy {
            details: "source directory is unknown".to_string(),
        });
    }

    let item = CopyItem {
        content: README_CONTENT.to_string(),
        remote_path: format!("{}/{REMOTE_README_NAME}", facts.source_dir),
        replacements: HashMap::from([
            (SOURCE_DIR_ENV.to_string(), facts.source_dir.clone()),
            (MAC_REVISION_ENV.to_string(), facts.stack_revision.clone()),
        ]),
        append: false,
        reject_if_present: false,
    };

    info!("Copying README file to remote...");
    let written = if via_sftp {
        write_via_sftp(session, &item)
    } else {
        write_via_shell(session, &item)
    };

    match written {
        Ok(()) => {
            info!("README file copied");
            Ok(())
        }
        Err(err) if err.is_already_exists() => {
            info!("README file already present");
            Ok(())
        }
        Err(err) => Err(ProvisioningWarning::ReadmeCopy {
            details: err.to_string(),
        }),
    }
}
