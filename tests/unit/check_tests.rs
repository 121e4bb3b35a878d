use std::fs;
use std::os::unix::process::CommandExt;
use std::process::Command;

use tempfile::tempdir;
use ubicd::daemon::{check, stop, StopOutcome};
use ubicd::identity::start_time_token;
use ubicd::pidfile;
use ubicd::Error;

#[test]
fn check_reports_not_running_for_missing_and_empty_files() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    assert!(!check(&path)?);

    fs::write(&path, b"")?;
    assert!(!check(&path)?);
    Ok(())
}

#[test]
fn legacy_record_is_left_in_place() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");
    fs::write(&path, "4242\n")?;

    assert!(!check(&path)?);
    assert_eq!("4242\n", fs::read_to_string(&path)?);
    Ok(())
}

#[test]
fn stale_record_with_dead_daemon_is_cleared() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");
    pidfile::write(&path, 1, 0, 1_999_999_999)?;

    assert!(!check(&path)?);
    assert_eq!(0, fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn reused_pid_with_mismatched_token_is_cleared_but_not_killed() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    // Use this very process as the "unrelated" occupant of the recorded pid:
    // if check escalated on a token mismatch, the test run would not survive
    // to assert anything.
    let pid = std::process::id() as i32;
    let token = start_time_token(pid)?.expect("own token");
    pidfile::write(&path, 1, token + 1, pid)?;

    assert!(!check(&path)?);
    assert_eq!(0, fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn record_without_daemon_pid_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("daemon.pid");
    fs::write(&path, "pid 10\npid-token 20\n").unwrap();

    let err = check(&path).expect_err("incomplete record must refuse analysis");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::IncompletePidfile(_))
    ));

    // The record is left for manual repair.
    assert_eq!("pid 10\npid-token 20\n", fs::read_to_string(&path).unwrap());
}

#[test]
fn unguarded_live_daemon_is_killed_and_cleared() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    // Simulate a guardian that died after recording a healthy worker. The
    // worker gets its own process group, as the real fork chain arranges.
    let mut child = Command::new("sleep").arg("60").process_group(0).spawn()?;
    let pid = child.id() as i32;
    let token = start_time_token(pid)?.expect("child token");
    pidfile::write(&path, 1, token, pid)?;

    assert!(!check(&path)?);
    assert_eq!(0, fs::metadata(&path)?.len());

    let status = child.wait()?;
    assert!(!status.success(), "worker should have been hard-killed");
    Ok(())
}

#[test]
fn stop_reports_not_running_without_a_daemon() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    assert_eq!(StopOutcome::NotRunning, stop(&path)?);

    fs::write(&path, b"")?;
    assert_eq!(StopOutcome::NotRunning, stop(&path)?);
    Ok(())
}

#[test]
fn stop_with_stale_record_converges_to_not_running() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");
    pidfile::write(&path, 1, 0, 1_999_999_999)?;

    assert_eq!(StopOutcome::NotRunning, stop(&path)?);
    assert_eq!(0, fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn stop_on_malformed_pidfile_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("daemon.pid");
    fs::write(&path, "garbage\nmore\n").unwrap();

    let err = stop(&path).expect_err("malformed pidfile must fail");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::MalformedPidfile { .. })
    ));
}
