//! Implementation of `ubicd check` subcommand.

use std::path::PathBuf;

use clap::Args;

use crate::{daemon, Error, Result};

#[derive(Debug, Clone, Args, Default)]
pub struct CheckArgs {
    /// Path to the daemon's pidfile
    #[arg(long = "pidfile")]
    pub pidfile: Option<PathBuf>,
}

pub fn execute(args: CheckArgs) -> Result<()> {
    let pidfile = args
        .pidfile
        .ok_or_else(|| Error::Cli("pidfile is required".into()))?;

    if daemon::check(&pidfile)? {
        println!("running");
    } else {
        println!("not running");
    }
    Ok(())
}
