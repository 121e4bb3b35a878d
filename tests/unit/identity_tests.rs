use std::process::Command;

use ubicd::identity::start_time_token;

#[test]
fn live_process_token_is_stable() -> ubicd::Result<()> {
    let pid = std::process::id() as i32;

    let first = start_time_token(pid)?.expect("own process must be present");
    let second = start_time_token(pid)?.expect("own process must be present");
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn absent_pid_has_no_token() -> ubicd::Result<()> {
    // Far beyond any configured pid_max.
    assert_eq!(None, start_time_token(2_000_000_000)?);
    Ok(())
}

#[test]
fn token_vanishes_once_the_process_is_reaped() -> ubicd::Result<()> {
    let mut child = Command::new("true").spawn()?;
    let pid = child.id() as i32;

    // Even if the child already exited it stays visible as a zombie until
    // it is waited on.
    assert!(start_time_token(pid)?.is_some());

    child.wait()?;
    assert_eq!(None, start_time_token(pid)?);
    Ok(())
}
