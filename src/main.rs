// ============================================================================
// File: src/main.rs
// ----------------------------------------------------------------------------
// CLI entry point and command dispatch
// ============================================================================

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::error;

use remote_access::config::{self, ConnectionEntry};
use remote_access::error::Error;
use remote_access::ide::{Ide, IdeRegistry};
use remote_access::session;
use remote_access::ssh::SshClientConfig;

#[derive(Parser)]
#[command(
    name = "remote-access",
    version,
    about = "Instantly connect to a running Bitrise CI build and debug it with an IDE"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Automatically detect the IDE and open the project
    Auto(ConnectionArgs),

    /// Debug the build with Visual Studio Code
    #[command(visible_alias = "code")]
    Vscode(ConnectionArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// SSH Hostname
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// SSH Port number
    #[arg(short = 'P', long)]
    port: Option<String>,

    /// Username for SSH connection
    #[arg(short = 'U', long)]
    user: Option<String>,

    /// Password for SSH connection
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Raw SSH snippet copied from the build page
    /// (`ssh ... USER@HOST -p PORT`), as an alternative to the flags
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    snippet: Vec<String>,
}

impl ConnectionArgs {
    fn into_entry(self) -> Result<ConnectionEntry, Error> {
        if !self.snippet.is_empty() {
            return config::parse_ssh_snippet(&self.snippet.join(" "), self.password);
        }

        config::validate(
            self.host.as_deref().unwrap_or_default(),
            self.port.as_deref().unwrap_or_default(),
            self.user.as_deref().unwrap_or_default(),
            self.password,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let registry = IdeRegistry::builtin();
    let cli = Cli::parse();

    let (ide, args): (Arc<dyn Ide>, ConnectionArgs) = match cli.command {
        Command::Auto(args) => (registry.auto_detect()?, args),
        Command::Vscode(args) => (
            registry
                .by_command("vscode")
                .expect("vscode is registered"),
            args,
        ),
    };

    let entry = match args.into_entry() {
        Ok(entry) => entry,
        Err(err @ Error::Validation { .. }) => {
            error!("{err}");
            eprintln!(
                "\nUsage: remote-access {} --host <HOSTNAME> --port <PORT> --user <USER> --password <PASSWORD>",
                ide.identifier()
            );
            std::process::exit(2);
        }
        Err(err) => return Err(err.into()),
    };

    let client_config = SshClientConfig::new()?;

    session::open_in_ide(ide, entry, client_config)
        .await
        .context("open remote session")?;

    Ok(())
}
