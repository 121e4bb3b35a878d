//! CLI parsing and dispatch; subcommands live here.

use clap::{CommandFactory, Parser, Subcommand};

use crate::Result;

pub mod check;
pub mod start;
pub mod status;
pub mod stop;

#[derive(Debug, Clone)]
pub enum Command {
    Start(start::StartArgs),
    Stop(stop::StopArgs),
    Check(check::CheckArgs),
    Status(status::StatusArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            command: Command::None,
        }
    }
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Start(s) => start::execute(s),
        Command::Stop(s) => stop::execute(s),
        Command::Check(c) => check::execute(c),
        Command::Status(s) => status::execute(s),
        Command::None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(name = "ubicd", version, about = "supervise a command as a background daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Start a daemon: a detached guardian supervises the given command and
    /// records it in the pidfile.
    Start(start::StartArgs),
    /// Stop the daemon behind a pidfile, politely, with retries.
    Stop(stop::StopArgs),
    /// Check whether the daemon behind a pidfile is running.
    Check(check::CheckArgs),
    /// Show the pidfile record together with the liveness verdict.
    Status(status::StatusArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);
    let command = match cli.command {
        Some(Subcommands::Start(args)) => Command::Start(args),
        Some(Subcommands::Stop(args)) => Command::Stop(args),
        Some(Subcommands::Check(args)) => Command::Check(args),
        Some(Subcommands::Status(args)) => Command::Status(args),
        None => Command::None,
    };

    Ok(CliArgs { command })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
