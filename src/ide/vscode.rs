//! Visual Studio Code integration via the Remote - SSH extension.

use std::path::PathBuf;
use std::process::Command;

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::ui;

use super::{Ide, find_command};

const IDE_IDENTIFIER: &str = "vscode";
const IDE_NAME: &str = "Visual Studio Code";
const ALIASES: &[&str] = &["code"];

const SSH_EXTENSION_IDENTIFIER: &str = "ms-vscode-remote.remote-ssh";
const SSH_EXTENSION_NAME: &str = "Remote - SSH";

const CODE_PATH_MAC: &str =
    "/Applications/Visual Studio Code.app/Contents/Resources/app/bin/code";
const URL_INSTALL_VSCODE: &str = "https://code.visualstudio.com/docs/setup/setup-overview";
const URL_ADD_VSCODE_TO_PATH: &str =
    "https://code.visualstudio.com/docs/setup/mac#_launch-vs-code-from-the-command-line";

pub struct VsCode;

impl Ide for VsCode {
    fn identifier(&self) -> &'static str {
        IDE_IDENTIFIER
    }

    fn name(&self) -> &'static str {
        IDE_NAME
    }

    fn aliases(&self) -> &'static [&'static str] {
        ALIASES
    }

    fn detect(&self) -> Option<PathBuf> {
        find_command(&["code", CODE_PATH_MAC])
    }

    fn launch(&self, host_pattern: &str, folder: &str, extra_info: Option<&str>) -> Result<()> {
        let Some(code_path) = self.detect() else {
            error!(
                "{IDE_NAME} is either not installed or it is not added to $PATH\n\
                 Please visit the following sites for more info:\n\
                 - installing: {URL_INSTALL_VSCODE}\n\
                 - adding to path: {URL_ADD_VSCODE_TO_PATH}"
            );
            return Err(Error::Launch {
                ide: IDE_IDENTIFIER,
                details: "CLI not found in $PATH".to_string(),
            });
        };

        if !ensure_ssh_extension()? {
            info!("Ending session...");
            return Err(Error::Launch {
                ide: IDE_IDENTIFIER,
                details: format!("the \"{SSH_EXTENSION_NAME}\" extension is not installed"),
            });
        }

        if let Some(extra_info) = extra_info {
            ui::print_framed("Connection details", extra_info);
        }

        info!("Opening {folder}...");
        let folder_uri =
            format!("--folder-uri=vscode-remote://ssh-remote+{host_pattern}{folder}/");

        let status = Command::new(&code_path)
            .arg(folder_uri)
            .status()
            .map_err(|e| Error::Launch {
                ide: IDE_IDENTIFIER,
                details: format!("run {code_path:?}: {e}"),
            })?;

        if !status.success() {
            return Err(Error::Launch {
                ide: IDE_IDENTIFIER,
                details: format!("open window: exit status {status}"),
            });
        }

        Ok(())
    }
}

fn is_ssh_extension_installed() -> bool {
    Command::new("code")
        .arg("--list-extensions")
        .output()
        .map(|output| {
            String::from_utf8_lossy(&output.stdout).contains(SSH_EXTENSION_IDENTIFIER)
        })
        .unwrap_or(false)
}

/// Verify the Remote - SSH extension is present, offering to install it.
fn ensure_ssh_extension() -> Result<bool> {
    if is_ssh_extension_installed() {
        return Ok(true);
    }

    warn!("{IDE_NAME} does not have the necessary \"{SSH_EXTENSION_NAME}\" extension installed");
    let install = ui::confirm(
        "Would you like to install it?",
        "Installing extensions...",
        "",
    )?;
    if !install {
        return Ok(false);
    }

    let output = Command::new("code")
        .args(["--install-extension", SSH_EXTENSION_IDENTIFIER])
        .output()
        .map_err(|e| Error::Launch {
            ide: IDE_IDENTIFIER,
            details: format!("install {SSH_EXTENSION_IDENTIFIER}: {e}"),
        })?;

    if !output.status.success() {
        error!(
            "Failed to install the {SSH_EXTENSION_IDENTIFIER} extension:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
        return Ok(false);
    }

    Ok(is_ssh_extension_installed())
}
