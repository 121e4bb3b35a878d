//! Pidfile codec: the on-disk record identifying a supervised daemon.
//!
//! The pidfile doubles as the rendezvous for the guardian's advisory lock,
//! so "removing" it means truncating in place, never unlinking. Unlinking
//! would let a concurrent probe recreate the path on a fresh inode, and a
//! later guardian could then hold a second, independent lock for the same
//! logical service.

use std::{fs, io::Write, path::Path};

use anyhow::Context as _;

use crate::{Error, Result};

pub mod lock;

/// Parsed contents of a pidfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidfileState {
    /// Missing, zero-sized, or whitespace-only file.
    Absent,
    /// Bare-PID record produced by older writers. Accepted on read, never written.
    Legacy { pid: i32 },
    Current(PidRecord),
}

/// Current-format record: three labeled lines in fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    /// PID of the guardian at the moment the record was written.
    pub guardian_pid: i32,
    /// Kernel start-time token of the daemon, captured right after its fork.
    pub token: u64,
    /// PID of the daemon. Optional on read only: one older writer emitted
    /// two-line records.
    pub daemon_pid: Option<i32>,
}

pub fn read(path: &Path) -> Result<PidfileState> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PidfileState::Absent)
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read pidfile {}", path.display()))
        }
    };
    if contents.trim().is_empty() {
        return Ok(PidfileState::Absent);
    }
    parse(path, &contents)
}

/// Write the three-line current-format record, flushed before close.
pub fn write(path: &Path, guardian_pid: i32, token: u64, daemon_pid: i32) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("open pidfile {} for writing", path.display()))?;
    write!(file, "pid {guardian_pid}\npid-token {token}\ndaemon-pid {daemon_pid}\n")
        .with_context(|| format!("write pidfile {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush pidfile {}", path.display()))?;
    Ok(())
}

/// Truncate the pidfile in place. Missing files are left missing.
pub fn clear(path: &Path) -> Result<()> {
    match fs::OpenOptions::new().write(true).truncate(true).open(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("clear pidfile {}", path.display())),
    }
}

/// True when the pidfile is missing, zero-sized, or whitespace-only.
pub fn is_blank(path: &Path) -> Result<bool> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().is_empty()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err).with_context(|| format!("read pidfile {}", path.display())),
    }
}

fn parse(path: &Path, contents: &str) -> Result<PidfileState> {
    let malformed = |reason: &str| -> anyhow::Error {
        Error::MalformedPidfile {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    let text = contents.strip_suffix('\n').unwrap_or(contents);

    // Legacy format: a single decimal integer and nothing else.
    if !text.contains('\n') {
        return match digits::<i32>(text) {
            Some(pid) => Ok(PidfileState::Legacy { pid }),
            None => Err(malformed("expected a bare pid or a labeled record")),
        };
    }

    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() > 3 {
        return Err(malformed("more than three lines"));
    }
    let guardian_pid = lines[0]
        .strip_prefix("pid ")
        .and_then(digits::<i32>)
        .ok_or_else(|| malformed("first line must be `pid <n>`"))?;
    let token = lines[1]
        .strip_prefix("pid-token ")
        .and_then(digits::<u64>)
        .ok_or_else(|| malformed("second line must be `pid-token <n>`"))?;
    let daemon_pid = match lines.get(2) {
        None => None,
        Some(line) => Some(
            line.strip_prefix("daemon-pid ")
                .and_then(digits::<i32>)
                .ok_or_else(|| malformed("third line must be `daemon-pid <n>`"))?,
        ),
    };

    Ok(PidfileState::Current(PidRecord {
        guardian_pid,
        token,
        daemon_pid,
    }))
}

/// Parse an unsigned decimal field; rejects signs, whitespace and empties.
fn digits<T: std::str::FromStr>(text: &str) -> Option<T> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
