use thiserror::Error;

pub mod cli;
pub mod daemon;
pub mod identity;
pub mod logging;
pub mod pidfile;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("daemon is already running: {0}")]
    AlreadyRunning(String),
    #[error("malformed pidfile {path}: {reason}")]
    MalformedPidfile { path: String, reason: String },
    #[error("pidfile {0} carries no daemon pid; refusing to guess which process to manage")]
    IncompletePidfile(String),
    #[error("daemon start failed:\n{0}")]
    StartFailed(String),
    #[error("unable to stop daemon at {0}")]
    UnableToStop(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    // Initialize logging before doing anything else. Defaults to human format for the CLI.
    logging::init_logging(logging::LoggingConfig {
        format: logging::LogFormat::Human,
        sink: logging::LogSink::Console,
        debug: false,
    })?;

    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    cli::dispatch(cli_args)
}
