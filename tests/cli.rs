use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    Command::cargo_bin("remote-access").expect("binary builds")
}

#[test]
fn help_lists_supported_commands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("auto").and(predicate::str::contains("vscode")));
}

#[test]
fn vscode_help_shows_connection_flags() {
    cli()
        .args(["vscode", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--host")
                .and(predicate::str::contains("--port"))
                .and(predicate::str::contains("--password")),
        );
}

#[test]
fn missing_connection_arguments_show_usage_hint() {
    cli()
        .arg("vscode")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage: remote-access vscode"));
}

#[test]
fn invalid_port_is_rejected_before_any_connection() {
    cli()
        .args([
            "vscode", "--host", "127.0.0.1", "--port", "99999", "--user", "bitrise",
            "--password", "pw",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid SSH port"));
}

#[test]
fn malformed_snippet_is_rejected() {
    cli()
        .args(["vscode", "open", "sesame"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid SSH snippet"));
}
