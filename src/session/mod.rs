// ============================================================================
// File: src/session/mod.rs
// ----------------------------------------------------------------------------
// Editor launch coordination.
//
// At most two concurrent tasks run beside the sequential bootstrap: the
// local-config write (needs only the auth-mode checkpoint) and the editor
// launch (needs the config write AND the essentials checkpoint). True
// overlap: the SSH config entry is written while the bootstrap is still
// provisioning the remote host.
// ============================================================================

use std::sync::Arc;

use log::{info, warn};
use tokio::task;

use crate::config::{ConnectionEntry, HOST_PATTERN};
use crate::error::{Error, Result};
use crate::ide::Ide;
use crate::ssh::{BootstrapOutcome, Checkpoints, SshClientConfig, Waiters, bootstrap};
use crate::ui;

/// Bootstrap the remote VM and open `entry` in the given IDE.
///
/// Blocks until the editor launch completes or fails. Bootstrap errors that
/// abort before the checkpoints fire (host-key cleanup, dial, auth) are
/// surfaced here; post-connection provisioning failures never are.
pub async fn open_in_ide(
    ide: Arc<dyn Ide>,
    entry: ConnectionEntry,
    client_config: SshClientConfig,
) -> Result<()> {
    let (checkpoints, waiters) = Checkpoints::channel();

    let boot_entry = entry.clone();
    let bootstrap_task = task::spawn_blocking(move || bootstrap(&boot_entry, checkpoints));

    let essentials = match write_config_and_await_essentials(waiters, &entry, client_config).await {
        Ok(essentials) => essentials,
        Err(err) => {
            // Collect the bootstrap before surfacing the config error so the
            // remote session is closed on this exit path too.
            join_bootstrap(bootstrap_task).await;
            return Err(err);
        }
    };

    let Some((use_identity_key, source_dir)) = essentials else {
        // A checkpoint sender was dropped: the bootstrap aborted before the
        // essentials were known. Its error is the one worth reporting.
        return match bootstrap_task.await {
            Ok(Ok(_)) => Err(Error::remote("bootstrap", "checkpoint dropped unexpectedly")),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(Error::remote("bootstrap", join_err.to_string())),
        };
    };

    let password_hint = password_hint(&entry, use_identity_key);

    let launch_ide = Arc::clone(&ide);
    let launched = task::spawn_blocking(move || -> Result<()> {
        let folder = match resolve_folder(source_dir)? {
            Some(folder) => folder,
            None => {
                info!("Ending session...");
                return Err(Error::validation(
                    "source code location could not be determined",
                ));
            }
        };
        launch_ide.launch(HOST_PATTERN, &folder, password_hint.as_deref())
    })
    .await
    .map_err(|e| Error::Launch {
        ide: "editor",
        details: e.to_string(),
    })?;

    // The bootstrap may still be copying the README; collect it so the
    // remote session is closed on every exit path.
    join_bootstrap(bootstrap_task).await;

    launched
}

/// Wait for the bootstrap task, demoting its failures to warnings. Used on
/// exit paths where another error (or a successful launch) already decides
/// the overall result.
async fn join_bootstrap(task: task::JoinHandle<Result<BootstrapOutcome>>) {
    match task.await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("bootstrap finished with an error: {err}"),
        Err(join_err) => warn!("bootstrap task failed to finish: {join_err}"),
    }
}

/// Run the config-write task and wait for the essentials checkpoint.
///
/// Returns `Ok(None)` when the bootstrap dropped its checkpoints before
/// firing them; the caller recovers the bootstrap error itself.
async fn write_config_and_await_essentials(
    waiters: Waiters,
    entry: &ConnectionEntry,
    client_config: SshClientConfig,
) -> Result<Option<(bool, String)>> {
    let Waiters {
        auth_mode,
        essentials,
    } = waiters;

    let config_entry = entry.clone();
    let config_task: task::JoinHandle<Result<Option<bool>>> = tokio::spawn(async move {
        let Ok(use_identity_key) = auth_mode.await else {
            return Ok(None);
        };

        task::spawn_blocking(move || -> Result<()> {
            client_config.ensure_include()?;
            client_config.write_managed_host(&config_entry, use_identity_key)
        })
        .await
        .map_err(|e| Error::Configuration {
            details: format!("config task: {e}"),
        })??;

        info!("Bitrise SSH config inclusion ensured");
        Ok(Some(use_identity_key))
    });

    let essentials = essentials.await.ok();

    let use_identity_key = config_task.await.map_err(|e| Error::Configuration {
        details: format!("config task: {e}"),
    })??;

    match (use_identity_key, essentials) {
        (Some(use_identity_key), Some(source_dir)) => Ok(Some((use_identity_key, source_dir))),
        _ => Ok(None),
    }
}

/// Copyable credentials for the editor's own connection prompt. Only needed
/// for password-based sessions; key-based sessions log straight in.
fn password_hint(entry: &ConnectionEntry, use_identity_key: bool) -> Option<String> {
    if use_identity_key {
        return None;
    }
    entry.password.as_ref().map(|password| {
        format!("Use this password when the editor asks for it:\n{password}")
    })
}

/// Fall back to the remote root directory when the source dir is unknown,
/// behind a confirmation. `None` means the user declined.
fn resolve_folder(source_dir: String) -> Result<Option<String>> {
    if !source_dir.is_empty() {
        return Ok(Some(source_dir));
    }

    let proceed = ui::confirm(
        "Source code location is unknown.\nWould you like to use the root directory and proceed?",
        "Using root directory",
        "",
    )?;

    Ok(proceed.then(String::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionEntry;
    use crate::ssh::Checkpoints;
    use assert_fs::TempDir;
    use std::fs;

    fn entry() -> ConnectionEntry {
        ConnectionEntry {
            host: HOST_PATTERN.to_string(),
            host_name: "203.0.113.1".to_string(),
            user: "bitrise".to_string(),
            port: 22,
            password: Some("pw".to_string()),
        }
    }

    fn config_in(dir: &TempDir) -> SshClientConfig {
        SshClientConfig::with_paths(
            dir.path().join("config"),
            dir.path().join("managed").join("ssh_config"),
        )
    }

    #[tokio::test]
    async fn config_is_written_before_essentials_are_delivered() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);
        let managed_path = dir.path().join("managed").join("ssh_config");

        let (mut checkpoints, waiters) = Checkpoints::channel();
        checkpoints.fire_auth_mode(true);
        checkpoints.fire_essentials("/bitrise/src");

        let result = write_config_and_await_essentials(waiters, &entry(), cfg)
            .await
            .expect("coordination succeeds");

        assert_eq!(result, Some((true, "/bitrise/src".to_string())));
        let managed = fs::read_to_string(managed_path).expect("managed config written");
        assert!(managed.contains("IdentityFile"));
    }

    #[tokio::test]
    async fn password_mode_omits_identity_file() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);
        let managed_path = dir.path().join("managed").join("ssh_config");

        let (mut checkpoints, waiters) = Checkpoints::channel();
        checkpoints.fire_auth_mode(false);
        checkpoints.fire_essentials("");

        let result = write_config_and_await_essentials(waiters, &entry(), cfg)
            .await
            .expect("coordination succeeds");

        assert_eq!(result, Some((false, String::new())));
        let managed = fs::read_to_string(managed_path).expect("managed config written");
        assert!(!managed.contains("IdentityFile"));
    }

    #[tokio::test]
    async fn dropped_checkpoints_yield_none_without_writing_config() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config_in(&dir);

        let (checkpoints, waiters) = Checkpoints::channel();
        drop(checkpoints); // bootstrap aborted before any checkpoint

        let result = write_config_and_await_essentials(waiters, &entry(), cfg)
            .await
            .expect("no fatal error from dropped checkpoints");

        assert_eq!(result, None);
        assert!(!dir.path().join("managed").join("ssh_config").exists());
    }

    struct NeverLaunches;

    impl Ide for NeverLaunches {
        fn identifier(&self) -> &'static str {
            "never"
        }
        fn name(&self) -> &'static str {
            "Never"
        }
        fn aliases(&self) -> &'static [&'static str] {
            &[]
        }
        fn detect(&self) -> Option<std::path::PathBuf> {
            None
        }
        fn launch(&self, _: &str, _: &str, _: Option<&str>) -> crate::error::Result<()> {
            panic!("launch must not run when the config write fails");
        }
    }

    #[tokio::test]
    async fn config_write_failure_is_surfaced_without_launching() {
        let dir = TempDir::new().expect("temp dir");
        // A directory squatting on the primary config path makes the
        // include repair fail with an I/O error.
        let primary = dir.path().join("config");
        fs::create_dir_all(&primary).expect("blocker dir");
        let cfg = SshClientConfig::with_paths(
            primary,
            dir.path().join("managed").join("ssh_config"),
        );

        // No password: the bootstrap takes its local-only path and finishes
        // without dialing, so the only failure in play is the config write.
        let no_password = ConnectionEntry {
            password: None,
            ..entry()
        };

        let result = open_in_ide(Arc::new(NeverLaunches), no_password, cfg).await;
        assert!(result.is_err());
    }

    #[test]
    fn password_hint_only_for_password_sessions() {
        let with_password = entry();
        assert!(password_hint(&with_password, true).is_none());

        let hint = password_hint(&with_password, false).expect("hint for password auth");
        assert!(hint.contains("pw"));

        let no_password = ConnectionEntry {
            password: None,
            ..entry()
        };
        assert!(password_hint(&no_password, false).is_none());
    }
}
