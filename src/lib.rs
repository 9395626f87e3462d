//! Remote access to running Bitrise CI builds.
//!
//! Bridges a build VM to a local editor over SSH: validates connection
//! parameters, repairs the local SSH client configuration, bootstraps the
//! remote environment (key auth, MOTD, README) and launches a supported IDE
//! pointed at the remote source directory.

pub mod config;
pub mod error;
pub mod ide;
pub mod session;
pub mod ssh;
pub mod ui;

pub use error::{Error, ProvisioningWarning, Result};
