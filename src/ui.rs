// ============================================================================
// File: src/ui.rs
// ----------------------------------------------------------------------------
// Interactive prompts and framed output
// ============================================================================

use std::io::{self, BufRead, Write};

use log::info;

/// Ask a yes/no question on the terminal.
///
/// `on_yes`/`on_no` are optional acknowledgement lines logged after the
/// answer, so callers don't repeat themselves.
pub fn confirm(title: &str, on_yes: &str, on_no: &str) -> io::Result<bool> {
    print!("{title} (y/n): ");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().lock().read_line(&mut response)?;
    let confirmed = response.trim().eq_ignore_ascii_case("y");

    if confirmed && !on_yes.is_empty() {
        info!("{on_yes}");
    } else if !confirmed && !on_no.is_empty() {
        info!("{on_no}");
    }

    Ok(confirmed)
}

/// Print a framed header/body block, used for copyable information like the
/// connection password.
pub fn print_framed(header: &str, body: &str) {
    let width = body
        .lines()
        .chain(std::iter::once(header))
        .map(str::len)
        .max()
        .unwrap_or(0);

    println!("┌─{}─┐", "─".repeat(width));
    println!("│ {header:<width$} │");
    println!("├─{}─┤", "─".repeat(width));
    for line in body.lines() {
        println!("│ {line:<width$} │");
    }
    println!("└─{}─┘", "─".repeat(width));
}
