//! Reuse-resistant process identity.
//!
//! A PID alone cannot identify a process across time: the kernel recycles
//! them. Pairing the PID with the start-time counter from the per-process
//! stat record closes the reuse window at the cost of one filesystem read.
//! The counter is stamped at process creation and never changes for the
//! life of the PID, zombies included.

use std::{fs, path::PathBuf};

use anyhow::Context as _;

use crate::Result;

/// Index of the start-time field in the whitespace-split stat line
/// (`/proc/<pid>/stat`, clock ticks since boot).
const STAT_START_TIME_FIELD: usize = 21;

/// Return the start-time token for the live (or zombie) process with this
/// PID, or `None` when no such process exists.
pub fn start_time_token(pid: i32) -> Result<Option<u64>> {
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    if !proc_dir.exists() {
        return Ok(None);
    }

    let stat_path = proc_dir.join("stat");
    let contents = match fs::read_to_string(&stat_path) {
        Ok(contents) => contents,
        Err(err) => {
            // The process can exit between the directory check and the open;
            // recheck once before treating the failure as fatal.
            if !proc_dir.exists() {
                return Ok(None);
            }
            return Err(err).with_context(|| format!("read {}", stat_path.display()));
        }
    };

    let line = contents.lines().next().unwrap_or("");
    let field = line
        .split_whitespace()
        .nth(STAT_START_TIME_FIELD)
        .with_context(|| format!("{} has no start-time field", stat_path.display()))?;
    let token = field
        .parse::<u64>()
        .with_context(|| format!("unparseable start-time {field:?} in {}", stat_path.display()))?;
    Ok(Some(token))
}
