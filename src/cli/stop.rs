//! Implementation of `ubicd stop` subcommand.

use std::path::PathBuf;

use clap::Args;

use crate::{
    daemon::{self, StopOutcome},
    Error, Result,
};

#[derive(Debug, Clone, Args, Default)]
pub struct StopArgs {
    /// Path to the daemon's pidfile
    #[arg(long = "pidfile")]
    pub pidfile: Option<PathBuf>,
}

pub fn execute(args: StopArgs) -> Result<()> {
    let pidfile = args
        .pidfile
        .ok_or_else(|| Error::Cli("pidfile is required".into()))?;

    match daemon::stop(&pidfile)? {
        StopOutcome::Stopped => println!("stopped"),
        StopOutcome::NotRunning => println!("not running"),
    }
    Ok(())
}
