// ============================================================================
// File: src/ide/mod.rs
// ----------------------------------------------------------------------------
// Supported IDE registry and launch contract
// ============================================================================

mod vscode;

pub use vscode::VsCode;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use log::info;

use crate::error::{Error, Result};

/// Launch contract every supported editor implements.
///
/// `launch` detects/installs whatever the editor needs for remote access and
/// opens a window pointed at `folder` on the host behind `host_pattern`.
/// `extra_info` is copyable text (e.g. the connection password) shown to the
/// user before the window opens.
pub trait Ide: Send + Sync {
    fn identifier(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn aliases(&self) -> &'static [&'static str];
    /// Path to the editor's CLI when it is installed and reachable
    fn detect(&self) -> Option<PathBuf>;
    fn launch(&self, host_pattern: &str, folder: &str, extra_info: Option<&str>) -> Result<()>;
}

/// Explicit registry of supported IDEs, built at startup and passed into the
/// command dispatcher. No package-level state.
#[derive(Clone)]
pub struct IdeRegistry {
    ides: Vec<Arc<dyn Ide>>,
}

impl IdeRegistry {
    pub fn builtin() -> Self {
        Self {
            ides: vec![Arc::new(VsCode)],
        }
    }

    pub fn all(&self) -> &[Arc<dyn Ide>] {
        &self.ides
    }

    /// Look up an IDE by subcommand name or alias
    pub fn by_command(&self, command: &str) -> Option<Arc<dyn Ide>> {
        self.ides
            .iter()
            .find(|ide| ide.identifier() == command || ide.aliases().contains(&command))
            .cloned()
    }

    /// Detect the IDE automatically: the terminal we were started from
    /// first, then the first supported IDE found on the system.
    pub fn auto_detect(&self) -> Result<Arc<dyn Ide>> {
        if let Ok(term_program) = std::env::var("TERM_PROGRAM") {
            if let Some(ide) = self
                .ides
                .iter()
                .find(|ide| ide.identifier() == term_program)
            {
                info!("{} IDE detected automatically", ide.name());
                return Ok(ide.clone());
            }
        }

        for ide in &self.ides {
            if ide.detect().is_some() {
                info!("{} IDE found in PATH", ide.name());
                return Ok(ide.clone());
            }
        }

        Err(Error::validation(
            "IDE could not be detected automatically, please specify the IDE explicitly \
             instead of using the 'auto' subcommand",
        ))
    }
}

/// Check candidate executables: a direct path first, then `which`.
pub(crate) fn find_command(candidates: &[&str]) -> Option<PathBuf> {
    for cmd in candidates {
        if Path::new(cmd).exists() {
            return Some(PathBuf::from(cmd));
        }

        let found = Command::new("which")
            .arg(cmd)
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

        if let Some(path) = found {
            return Some(PathBuf::from(path));
        }
    }
    None
}
