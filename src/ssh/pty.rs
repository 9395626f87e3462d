//! Batched remote command execution over a pseudo terminal.
//!
//! All commands of a batch share one interactive shell, so they run in
//! program order with shared state (current directory, environment). The
//! shell, not each command, is what gets waited on: the batch is terminated
//! with an explicit `exit` so the session closes and completion becomes
//! observable.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Read, Write};

use log::debug;
use ssh2::Session;

use crate::error::{Error, Result};

/// Run `commands` on the remote host in a single pty-backed shell.
///
/// With `want_results`, each command is wrapped so its output is framed as
/// `[result<N>=<output>]` and the combined stdout stream is scanned after
/// the session ends. Any non-empty stderr fails the whole batch; there is no
/// partial-success reporting.
///
/// Extraction is best-effort string scanning, not structured: a command
/// whose own output contains the literal frame syntax can corrupt its
/// result. Known limitation.
pub fn run_with_pty(
    session: &Session,
    commands: &[String],
    command_prefix: &str,
    want_results: bool,
) -> Result<HashMap<String, String>> {
    let mut channel = session
        .channel_session()
        .map_err(|e| Error::remote("create session", e.to_string()))?;

    channel
        .request_pty("xterm", None, Some((80, 40, 0, 0)))
        .map_err(|e| Error::remote("request pty", e.to_string()))?;

    channel
        .shell()
        .map_err(|e| Error::remote("start shell", e.to_string()))?;

    // All commands go out as one joined input stream, each terminated by a
    // carriage return, followed by an explicit exit so the shell closes.
    let mut joint = String::new();
    for (i, command) in commands.iter().enumerate() {
        joint.push_str(command_prefix);
        if want_results {
            let _ = write!(
                joint,
                "{command} | awk '{{print \"[result{i}=\"$0\"]\"}}'\r"
            );
        } else {
            let _ = write!(joint, "{command}\r");
        }
    }
    joint.push_str("exit\r");

    channel
        .write_all(joint.as_bytes())
        .map_err(|e| Error::remote("send command", e.to_string()))?;
    channel
        .flush()
        .map_err(|e| Error::remote("send command", e.to_string()))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| Error::remote("read shell output", e.to_string()))?;

    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| Error::remote("read shell output", e.to_string()))?;

    channel
        .wait_close()
        .map_err(|e| Error::remote("wait for session", e.to_string()))?;

    if !stderr.is_empty() {
        return Err(Error::remote("remote shell", stderr));
    }

    if !want_results {
        return Ok(HashMap::new());
    }

    debug!("Extracting {} framed results", commands.len());
    Ok(extract_results(&stdout, commands))
}

/// Scan the combined stdout stream for each command's framed output.
///
/// The LAST occurrence of the index's frame prefix is used: the pty echoes
/// the command line itself (which contains the literal prefix) before the
/// actual output, so earlier matches are partial echoes.
fn extract_results(output: &str, commands: &[String]) -> HashMap<String, String> {
    let mut results = HashMap::new();

    for (i, command) in commands.iter().enumerate() {
        let prefix = format!("[result{i}=");
        if let Some(start) = output.rfind(&prefix) {
            let tail = &output[start + prefix.len()..];
            if let Some(end) = tail.find(']') {
                results.insert(command.clone(), tail[..end].to_string());
            }
        }
    }

    results
}
