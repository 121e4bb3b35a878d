//! Daemon lifecycle engine: `start`, `check`, `stop`.
//!
//! `start` runs a double fork: a setup child that exits immediately (so the
//! guardian is reparented to init and can never reacquire the caller's
//! terminal) and the guardian itself, which takes the pidfile lock, forks
//! the worker, records the worker's identity and supervises it until one of
//! them dies. `check` and `stop` never talk to the guardian directly; they
//! reason from the lock, the record, and the per-process table.

pub mod handshake;

use std::{
    convert::Infallible,
    ffi::CString,
    fmt,
    fs::File,
    io::Read,
    os::unix::ffi::OsStrExt,
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
    path::{Path, PathBuf},
    sync::atomic::{AtomicI32, Ordering},
    sync::OnceLock,
    thread,
    time::Duration,
};

use anyhow::Context as _;
use nix::{
    errno::Errno,
    sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
    sys::wait::{waitpid, WaitStatus},
    unistd::{execvp, fork, getpid, setpgid, setsid, setuid, ForkResult, Pid, Uid},
};
use tracing::{info, warn};

use crate::{
    identity, logging,
    pidfile::{self, lock::PidfileLock, PidfileState},
    Error, Result,
};

use self::handshake::{HandshakeWriter, Pipe, MARKER_EXEC, MARKER_PIDFILE_WRITTEN};

const NULL_DEVICE: &str = "/dev/null";

const STOP_ATTEMPTS: u32 = 5;
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

// Grace the termination handler allows between the polite signal and the
// hard kill: 6 x 500ms, kept under `stop`'s five-second retry window.
const TERM_GRACE_STEPS: u32 = 6;
const TERM_GRACE_STEP_NS: libc::c_long = 500_000_000;

/// What the worker should run.
pub enum Target {
    /// Replace the worker's image with an executable.
    Exec { binary: PathBuf, args: Vec<String> },
    /// Run a callback inside the forked worker. Only meaningful for library
    /// callers whose own process image contains the callback.
    InProcess(Box<dyn FnOnce() -> Result<()> + Send>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Exec { binary, args } => f
                .debug_struct("Exec")
                .field("binary", binary)
                .field("args", args)
                .finish(),
            Target::InProcess(_) => f.write_str("InProcess(..)"),
        }
    }
}

/// Configuration for [`start`].
#[derive(Debug)]
pub struct StartConfig {
    pub target: Target,
    /// Path of the pidfile; doubles as the lock rendezvous.
    pub pidfile: PathBuf,
    /// Display name used in process titles and logs. Defaults to the binary
    /// path, or `anonymous` for callbacks.
    pub name: Option<String>,
    /// Daemon stdout, append mode. Defaults to the null device.
    pub stdout: Option<PathBuf>,
    /// Daemon stderr, append mode. Defaults to the null device.
    pub stderr: Option<PathBuf>,
    /// The guardian's own technical log, append mode. Defaults to the null
    /// device.
    pub log: Option<PathBuf>,
    /// Run the guardian and daemon as this user.
    pub user: Option<String>,
}

impl StartConfig {
    fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.target {
            Target::Exec { binary, .. } => binary.display().to_string(),
            Target::InProcess(_) => "anonymous".to_string(),
        }
    }
}

/// Outcome of [`stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
}

/// Detach and supervise `config.target` as a background daemon.
///
/// Forks; callers embedding this as a library should invoke it from a
/// context where forking is safe. Returns once the fork chain has reported
/// back over the handshake pipe: on success the pidfile is on disk, its
/// lock is held by a live guardian, and the worker sits in its own process
/// group.
pub fn start(config: StartConfig) -> Result<()> {
    if check(&config.pidfile)? {
        return Err(Error::AlreadyRunning(config.pidfile.display().to_string()).into());
    }

    let name = config.display_name();
    let pipe = Pipe::new().context("create handshake pipe")?;

    match unsafe { fork() }.context("fork setup process")? {
        ForkResult::Parent { child } => {
            pipe.close_write();
            loop {
                match waitpid(child, None) {
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(err) => return Err(err).context("wait for setup process"),
                }
            }
            // The setup exit code is uninformative; the pipe carries the verdict.

            let mut output = String::new();
            let mut read_end = unsafe { File::from_raw_fd(pipe.read_fd) };
            read_end
                .read_to_string(&mut output)
                .context("read handshake pipe")?;

            if output.contains(MARKER_PIDFILE_WRITTEN) && output.contains(MARKER_EXEC) {
                info!(name = %name, pidfile = %config.pidfile.display(), "daemon started");
                Ok(())
            } else {
                Err(Error::StartFailed(output).into())
            }
        }
        ForkResult::Child => {
            // Setup process: fork once more and exit, reparenting the
            // guardian to init and severing any controlling terminal.
            pipe.close_read();
            let hs = HandshakeWriter::new(pipe.write_fd);
            match unsafe { fork() } {
                Ok(ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
                Ok(ForkResult::Child) => run_guardian(config, &name, hs),
                Err(err) => {
                    let _ = hs.error(&format!("fork guardian: {err}"));
                    unsafe { libc::_exit(1) }
                }
            }
        }
    }
}

/// Probe whether the daemon behind `pidfile` is present. May clear the
/// pidfile as a side effect when a well-understood stale state is found.
pub fn check(pidfile: &Path) -> Result<bool> {
    if pidfile::is_blank(pidfile)? {
        return Ok(false);
    }

    // A held lock is the guardian's heartbeat.
    let _lock = match PidfileLock::try_acquire(pidfile)? {
        None => return Ok(true),
        Some(lock) => lock,
    };

    // No live guardian, but a record exists. Diagnose under the lock so no
    // new guardian can appear mid-analysis.
    let record = match pidfile::read(pidfile)? {
        PidfileState::Absent => return Ok(false),
        PidfileState::Legacy { pid } => {
            // A bare pid cannot be identity-checked; assume the daemon is
            // gone and leave the file for manual recovery.
            warn!(pidfile = %pidfile.display(), pid, "legacy pidfile; assuming daemon is not running");
            return Ok(false);
        }
        PidfileState::Current(record) => record,
    };

    let Some(daemon_pid) = record.daemon_pid else {
        return Err(Error::IncompletePidfile(pidfile.display().to_string()).into());
    };

    match identity::start_time_token(daemon_pid)? {
        None => {
            warn!(pidfile = %pidfile.display(), daemon_pid, "daemon is gone; removing stale pidfile");
            pidfile::clear(pidfile)?;
            Ok(false)
        }
        Some(token) if token == record.token => {
            // The guardian died without cleaning up, but its daemon lives.
            warn!(pidfile = %pidfile.display(), daemon_pid, "unguarded daemon found; killing its process group");
            match kill(Pid::from_raw(-daemon_pid), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => return Err(err).context("kill unguarded daemon group"),
            }
            pidfile::clear(pidfile)?;
            Ok(false)
        }
        Some(token) => {
            warn!(
                pidfile = %pidfile.display(),
                daemon_pid,
                recorded = record.token,
                actual = token,
                "daemon pid was reused by an unrelated process; clearing record"
            );
            pidfile::clear(pidfile)?;
            Ok(false)
        }
    }
}

/// Ask the guardian to tear the daemon down, politely, with retries.
pub fn stop(pidfile: &Path) -> Result<StopOutcome> {
    if pidfile::is_blank(pidfile)? {
        return Ok(StopOutcome::NotRunning);
    }

    let guardian_pid = match pidfile::read(pidfile)? {
        PidfileState::Absent => return Ok(StopOutcome::NotRunning),
        PidfileState::Legacy { pid } => pid,
        PidfileState::Current(record) => record.guardian_pid,
    };

    let mut signalled = false;
    for _ in 0..STOP_ATTEMPTS {
        if !check(pidfile)? {
            return Ok(if signalled {
                StopOutcome::Stopped
            } else {
                StopOutcome::NotRunning
            });
        }
        match kill(Pid::from_raw(guardian_pid), Signal::SIGTERM) {
            Ok(()) => signalled = true,
            Err(Errno::ESRCH) => {}
            Err(err) => return Err(err).context("signal guardian"),
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }

    if !check(pidfile)? {
        return Ok(StopOutcome::Stopped);
    }
    Err(Error::UnableToStop(pidfile.display().to_string()).into())
}

fn run_guardian(config: StartConfig, name: &str, hs: HandshakeWriter) -> ! {
    match guardian(config, name, hs) {
        Ok(never) => match never {},
        Err(err) => {
            let _ = hs.error(&format!("{err:#}"));
            unsafe { libc::_exit(1) }
        }
    }
}

fn guardian(config: StartConfig, name: &str, hs: HandshakeWriter) -> Result<Infallible> {
    let StartConfig {
        target,
        pidfile: pidfile_path,
        name: _,
        stdout,
        stderr,
        log,
        user,
    } = config;

    redirect_streams(stdout.as_deref(), stderr.as_deref())?;

    // The dispatcher inherited over fork points at the caller's sink;
    // install a thread default aimed at our own log instead.
    let log_path = log.unwrap_or_else(|| PathBuf::from(NULL_DEVICE));
    let subscriber = logging::file_subscriber(&log_path)?;
    let _log_guard = tracing::subscriber::set_default(subscriber);

    unsafe {
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
    set_process_title(&format!("ubic-guardian {name}"));
    setsid().context("setsid")?;

    let lock = PidfileLock::try_acquire(&pidfile_path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "pidfile {} is locked by another guardian",
            pidfile_path.display()
        )
    })?;
    pidfile::clear(&pidfile_path)?;

    if let Some(user) = &user {
        drop_privileges(user)?;
    }

    let lock_fd = lock.as_raw_fd();
    let worker = match unsafe { fork() }.context("fork daemon")? {
        ForkResult::Child => {
            // The worker must not pin the pidfile lock: the flock rides on
            // the open file description shared across fork until this copy
            // of the descriptor is closed.
            let _ = unsafe { libc::close(lock_fd) };
            run_worker(target, name, hs)
        }
        ForkResult::Parent { child } => child,
    };

    let token = identity::start_time_token(worker.as_raw())?.ok_or_else(|| {
        anyhow::anyhow!("daemon {worker} disappeared before its identity was recorded")
    })?;
    pidfile::write(&pidfile_path, getpid().as_raw(), token, worker.as_raw())?;
    install_termination_handler(&pidfile_path, worker)?;

    hs.pidfile_written().context("write handshake marker")?;
    hs.close();

    info!(name = %name, daemon_pid = worker.as_raw(), "supervising daemon");
    let _lock = lock; // held until this process dies

    loop {
        match waitpid(worker, None) {
            Ok(WaitStatus::Exited(_, 0)) => {
                info!(name = %name, "daemon exited");
                clear_and_exit(&pidfile_path, 0)
            }
            Ok(WaitStatus::Exited(_, code)) => {
                warn!(name = %name, code, "daemon exited with failure");
                clear_and_exit(&pidfile_path, 1)
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                warn!(name = %name, signal = %signal, "daemon killed by signal");
                clear_and_exit(&pidfile_path, 1)
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(err) => {
                warn!(name = %name, error = %err, "wait for daemon failed");
                clear_and_exit(&pidfile_path, 1)
            }
        }
    }
}

/// Clear the pidfile and leave through the no-cleanup exit: the guardian's
/// memory image is a fork of an arbitrary caller whose destructors and exit
/// handlers must not run a second time.
fn clear_and_exit(pidfile_path: &Path, code: i32) -> ! {
    if let Err(err) = pidfile::clear(pidfile_path) {
        warn!(error = %err, "failed to clear pidfile");
    }
    unsafe { libc::_exit(code) }
}

fn run_worker(target: Target, name: &str, hs: HandshakeWriter) -> ! {
    // Failures before the marker reach the caller over the pipe.
    if let Err(err) = worker_prepare(name, &hs) {
        let _ = hs.error(&format!("{err:#}"));
        unsafe { libc::_exit(1) }
    }
    hs.close();

    // Past this point the pipe is gone; failures land on stderr and in the
    // guardian's observation of our exit status.
    match run_target(target) {
        Ok(never) => match never {},
        Err(err) => {
            eprintln!("{err:#}");
            unsafe { libc::_exit(1) }
        }
    }
}

fn worker_prepare(name: &str, hs: &HandshakeWriter) -> Result<()> {
    // Own process group, so the guardian can fell the whole subtree with a
    // single negative-pid kill.
    setpgid(Pid::from_raw(0), Pid::from_raw(0)).context("setpgid")?;
    set_process_title(&format!("ubic-daemon {name}"));

    // The marker has to go out before exec: afterwards the write end belongs
    // to a program that owes us nothing.
    hs.execing().context("write handshake marker")?;
    Ok(())
}

fn run_target(target: Target) -> Result<Infallible> {
    match target {
        Target::Exec { binary, args } => {
            let program = CString::new(binary.as_os_str().as_bytes())
                .context("binary path contains a NUL byte")?;
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(program.clone());
            for arg in args {
                argv.push(CString::new(arg).context("argument contains a NUL byte")?);
            }
            execvp(&program, &argv).with_context(|| format!("exec {}", binary.display()))
        }
        Target::InProcess(callback) => {
            callback()?;
            unsafe { libc::_exit(0) }
        }
    }
}

fn redirect_streams(stdout: Option<&Path>, stderr: Option<&Path>) -> Result<()> {
    let null = Path::new(NULL_DEVICE);

    let stdin = File::open(null).context("open null device")?;
    dup_onto(stdin.as_raw_fd(), libc::STDIN_FILENO)?;

    let out = open_append(stdout.unwrap_or(null))?;
    dup_onto(out.as_raw_fd(), libc::STDOUT_FILENO)?;

    let err = open_append(stderr.unwrap_or(null))?;
    dup_onto(err.as_raw_fd(), libc::STDERR_FILENO)?;

    Ok(())
}

fn open_append(path: &Path) -> Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {} for append", path.display()))
}

fn dup_onto(src: RawFd, dst: libc::c_int) -> Result<()> {
    if unsafe { libc::dup2(src, dst) } < 0 {
        return Err(std::io::Error::last_os_error()).context("dup2");
    }
    Ok(())
}

/// Best-effort retitle for process listings. Comm-based, so the kernel caps
/// it at 15 bytes; the `ubic-guardian` / `ubic-daemon` prefix survives.
fn set_process_title(title: &str) {
    if let Ok(title) = CString::new(title) {
        let _ = unsafe { libc::prctl(libc::PR_SET_NAME, title.as_ptr(), 0, 0, 0) };
    }
}

fn drop_privileges(user: &str) -> Result<()> {
    let account =
        users::get_user_by_name(user).ok_or_else(|| Error::UnknownUser(user.to_string()))?;
    setuid(Uid::from_raw(account.uid())).with_context(|| format!("setuid to {user}"))?;
    Ok(())
}

static TERM_WORKER_PID: AtomicI32 = AtomicI32::new(0);
static TERM_PIDFILE: OnceLock<CString> = OnceLock::new();

fn install_termination_handler(pidfile_path: &Path, worker: Pid) -> Result<()> {
    let path = CString::new(pidfile_path.as_os_str().as_bytes())
        .context("pidfile path contains a NUL byte")?;
    TERM_WORKER_PID.store(worker.as_raw(), Ordering::SeqCst);
    let _ = TERM_PIDFILE.set(path);

    let action = SigAction::new(
        SigHandler::Handler(on_termination_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGTERM, &action) }.context("install SIGTERM handler")?;
    Ok(())
}

/// SIGTERM handler: polite kill to the daemon's process group, a bounded
/// grace in which a dead daemon is reaped rather than mistaken for a
/// survivor, then the unconditional hard kill; finally truncate the pidfile
/// and leave through the no-cleanup exit. Async-signal-safe calls only.
extern "C" fn on_termination_signal(_: libc::c_int) {
    let worker = TERM_WORKER_PID.load(Ordering::SeqCst);
    if worker > 0 {
        let _ = unsafe { libc::kill(-worker, libc::SIGTERM) };
        for _ in 0..TERM_GRACE_STEPS {
            let mut status: libc::c_int = 0;
            let reaped = unsafe { libc::waitpid(worker, &mut status, libc::WNOHANG) };
            if reaped != 0 {
                break;
            }
            let interval = libc::timespec {
                tv_sec: 0,
                tv_nsec: TERM_GRACE_STEP_NS,
            };
            let _ = unsafe { libc::nanosleep(&interval, std::ptr::null_mut()) };
        }
        let _ = unsafe { libc::kill(-worker, libc::SIGKILL) };
    }
    if let Some(path) = TERM_PIDFILE.get() {
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_TRUNC) };
        if fd >= 0 {
            let _ = unsafe { libc::close(fd) };
        }
    }
    unsafe { libc::_exit(0) }
}
