//! Implementation of `ubicd status` subcommand.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use serde::Serialize;

use crate::{
    daemon,
    pidfile::{self, PidfileState},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum StatusFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Args, Default)]
pub struct StatusArgs {
    /// Path to the daemon's pidfile
    #[arg(long = "pidfile")]
    pub pidfile: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: StatusFormat,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    guardian_pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    daemon_pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid_token: Option<u64>,
    legacy: bool,
}

pub fn execute(args: StatusArgs) -> Result<()> {
    let pidfile_path = args
        .pidfile
        .ok_or_else(|| Error::Cli("pidfile is required".into()))?;

    // Probe first: a stale record is cleaned up before being reported.
    let running = daemon::check(&pidfile_path)?;
    let report = match pidfile::read(&pidfile_path)? {
        PidfileState::Absent => StatusReport {
            running,
            guardian_pid: None,
            daemon_pid: None,
            pid_token: None,
            legacy: false,
        },
        PidfileState::Legacy { pid } => StatusReport {
            running,
            guardian_pid: Some(pid),
            daemon_pid: None,
            pid_token: None,
            legacy: true,
        },
        PidfileState::Current(record) => StatusReport {
            running,
            guardian_pid: Some(record.guardian_pid),
            daemon_pid: record.daemon_pid,
            pid_token: Some(record.token),
            legacy: false,
        },
    };

    match args.format {
        StatusFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        StatusFormat::Text => {
            println!("running={}", report.running);
            if let Some(pid) = report.guardian_pid {
                println!("guardian-pid={pid}");
            }
            if let Some(pid) = report.daemon_pid {
                println!("daemon-pid={pid}");
            }
            if let Some(token) = report.pid_token {
                println!("pid-token={token}");
            }
            if report.legacy {
                println!("legacy=true");
            }
        }
    }
    Ok(())
}
