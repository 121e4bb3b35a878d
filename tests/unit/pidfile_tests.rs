use std::fs;
use std::os::unix::fs::MetadataExt;

use tempfile::tempdir;
use ubicd::pidfile::{self, PidRecord, PidfileState};
use ubicd::Error;

#[test]
fn missing_file_reads_as_absent() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("absent.pid");

    assert_eq!(PidfileState::Absent, pidfile::read(&path)?);
    assert!(pidfile::is_blank(&path)?);
    Ok(())
}

#[test]
fn empty_and_whitespace_files_read_as_absent() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.pid");

    fs::write(&path, b"")?;
    assert_eq!(PidfileState::Absent, pidfile::read(&path)?);

    fs::write(&path, b"\n  \n")?;
    assert_eq!(PidfileState::Absent, pidfile::read(&path)?);
    assert!(pidfile::is_blank(&path)?);
    Ok(())
}

#[test]
fn write_emits_the_exact_three_line_record() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    pidfile::write(&path, 4242, 77, 4243)?;
    assert_eq!(
        "pid 4242\npid-token 77\ndaemon-pid 4243\n",
        fs::read_to_string(&path)?
    );
    Ok(())
}

#[test]
fn write_then_read_round_trips() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    pidfile::write(&path, 4242, 77, 4243)?;
    assert_eq!(
        PidfileState::Current(PidRecord {
            guardian_pid: 4242,
            token: 77,
            daemon_pid: Some(4243),
        }),
        pidfile::read(&path)?
    );
    Ok(())
}

#[test]
fn legacy_bare_pid_is_accepted() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("legacy.pid");

    fs::write(&path, "31337")?;
    assert_eq!(PidfileState::Legacy { pid: 31337 }, pidfile::read(&path)?);

    fs::write(&path, "31337\n")?;
    assert_eq!(PidfileState::Legacy { pid: 31337 }, pidfile::read(&path)?);
    Ok(())
}

#[test]
fn two_line_record_parses_without_daemon_pid() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("old.pid");

    fs::write(&path, "pid 10\npid-token 20\n")?;
    assert_eq!(
        PidfileState::Current(PidRecord {
            guardian_pid: 10,
            token: 20,
            daemon_pid: None,
        }),
        pidfile::read(&path)?
    );
    Ok(())
}

#[test]
fn malformed_contents_never_fabricate_a_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.pid");

    let corpus: &[&str] = &[
        "-5",
        "pid x",
        "pid 1\ntoken 2\n",
        "pid 1 extra\npid-token 2\n",
        "pid 1\npid-token 2\nmore junk\n",
        "pid 1\npid-token 2\ndaemon-pid 3\npid 4\n",
        "hello world\n",
        "pid\npid-token 2\n",
    ];
    for garbage in corpus {
        fs::write(&path, garbage).unwrap();
        let err = pidfile::read(&path).expect_err(&format!("input {garbage:?} should be rejected"));
        assert!(
            matches!(err.downcast_ref::<Error>(), Some(Error::MalformedPidfile { .. })),
            "input {garbage:?} produced unexpected error {err:?}"
        );
    }
}

#[test]
fn clear_truncates_in_place_preserving_the_inode() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("daemon.pid");

    pidfile::write(&path, 1, 2, 3)?;
    let inode = fs::metadata(&path)?.ino();

    pidfile::clear(&path)?;
    let meta = fs::metadata(&path)?;
    assert_eq!(0, meta.len());
    assert_eq!(inode, meta.ino());
    Ok(())
}

#[test]
fn clear_of_a_missing_file_is_a_no_op() -> ubicd::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("gone.pid");

    pidfile::clear(&path)?;
    assert!(!path.exists());
    Ok(())
}
