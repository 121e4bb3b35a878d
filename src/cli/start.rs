//! Implementation of `ubicd start` subcommand.

use std::path::PathBuf;

use clap::Args;

use crate::{
    daemon::{self, StartConfig, Target},
    Error, Result,
};

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    /// Executable to supervise
    #[arg(long = "bin")]
    pub bin: Option<PathBuf>,

    /// Path to the pidfile identifying this daemon
    #[arg(long = "pidfile")]
    pub pidfile: Option<PathBuf>,

    /// Display name for process titles and logs (defaults to the binary path)
    #[arg(long = "name")]
    pub name: Option<String>,

    /// Append daemon stdout to this file instead of discarding it
    #[arg(long = "stdout")]
    pub stdout: Option<PathBuf>,

    /// Append daemon stderr to this file instead of discarding it
    #[arg(long = "stderr")]
    pub stderr: Option<PathBuf>,

    /// Append the guardian's own log to this file instead of discarding it
    #[arg(long = "log")]
    pub log: Option<PathBuf>,

    /// Run the daemon as this user (requires privileges)
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Arguments passed to the executable, after `--`
    #[arg(last = true)]
    pub args: Vec<String>,
}

pub fn execute(args: StartArgs) -> Result<()> {
    let bin = args.bin.ok_or_else(|| Error::Cli("bin is required".into()))?;
    let pidfile = args
        .pidfile
        .ok_or_else(|| Error::Cli("pidfile is required".into()))?;

    daemon::start(StartConfig {
        target: Target::Exec {
            binary: bin,
            args: args.args,
        },
        pidfile,
        name: args.name,
        stdout: args.stdout,
        stderr: args.stderr,
        log: args.log,
        user: args.user,
    })?;

    println!("started");
    Ok(())
}
