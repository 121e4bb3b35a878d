//! Handshake plumbing between the caller and the fork chain.
//!
//! The caller holds the read end of an anonymous pipe; setup, guardian and
//! worker share the write end and report progress as marker lines. Success
//! is defined by both markers appearing in whatever the caller reads before
//! EOF; anything else written (error text included) rides along verbatim
//! and ends up in the caller's failure report.

use std::{io, os::unix::io::RawFd};

/// Emitted by the guardian once the pidfile record is on disk.
pub const MARKER_PIDFILE_WRITTEN: &str = "pidfile written\n";
/// Emitted by the worker right before it execs (or enters the callback).
pub const MARKER_EXEC: &str = "xexecing into daemon\n";

#[derive(Debug)]
pub struct Pipe {
    pub read_fd: RawFd,
    pub write_fd: RawFd,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    pub fn close_read(&self) {
        let _ = unsafe { libc::close(self.read_fd) };
    }

    pub fn close_write(&self) {
        let _ = unsafe { libc::close(self.write_fd) };
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HandshakeWriter {
    fd: RawFd,
}

impl HandshakeWriter {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    pub fn pidfile_written(&self) -> io::Result<()> {
        self.write_all(MARKER_PIDFILE_WRITTEN.as_bytes())
    }

    pub fn execing(&self) -> io::Result<()> {
        self.write_all(MARKER_EXEC.as_bytes())
    }

    /// Serialize an error for the caller. Descendants of the fork never
    /// propagate failures upward any other way.
    pub fn error(&self, msg: &str) -> io::Result<()> {
        self.write_all(msg.as_bytes())?;
        self.write_all(b"\n")
    }

    pub fn close(&self) {
        let _ = unsafe { libc::close(self.fd) };
    }

    fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let rc = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            let written = rc as usize;
            buf = &buf[written..];
        }
        Ok(())
    }
}
