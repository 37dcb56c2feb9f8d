//! Child process spawning — pty allocation, fork, exec.
//!
//! Isolates the `unsafe` fork/exec code from the rest of the
//! supervisor. The slave side is opened by name in the child after
//! `setsid`, which acquires the controlling terminal on System V
//! derived systems; the BSD `TIOCSCTTY` ioctl is issued as well and its
//! failure tolerated.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

use nix::libc;
use nix::fcntl::OFlag;
use nix::pty::{PtyMaster, grantpt, posix_openpt, unlockpt};
use nix::sys::termios::Termios;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execvp, fork, setsid};

use crate::error::Error;

/// Parent-terminal attributes applied to the slave before exec, so the
/// child starts with the same line discipline and dimensions as the
/// terminal the supervisor runs on.
#[derive(Debug, Clone)]
pub struct SlaveSettings {
    pub termios: Termios,
    pub winsize: libc::winsize,
}

/// A spawned child process with its pty master fd.
#[derive(Debug)]
pub struct ChildProcess {
    /// Child process PID.
    pub pid: Pid,
    /// Master side of the pty pair (non-blocking).
    pub master: OwnedFd,
}

#[cfg(target_os = "linux")]
fn slave_name(master: &PtyMaster) -> Result<String, nix::Error> {
    nix::pty::ptsname_r(master)
}

#[cfg(not(target_os = "linux"))]
fn slave_name(master: &PtyMaster) -> Result<String, nix::Error> {
    // SAFETY: ptsname is not thread-safe; called before any thread is
    // spawned and the result is copied out immediately.
    unsafe { nix::pty::ptsname(master) }
}

/// Spawn a child process on a new pty.
///
/// Opens and unlocks a master, forks, and in the child creates a new
/// session, opens the slave as the controlling terminal, optionally
/// applies `settings` to it, rewires fds 0/1/2, and execs the command.
/// The master fd is returned in non-blocking mode for async I/O.
///
/// # Safety
///
/// Uses `fork()` internally. Only async-signal-safe operations are
/// performed between fork and exec/exit in the child branch; every
/// allocation (argument C strings, the slave path) happens before.
pub fn spawn_child(
    command: &[String],
    settings: Option<&SlaveSettings>,
    nohup_child: bool,
) -> Result<ChildProcess, Error> {
    if command.is_empty() {
        return Err(Error::Usage("no command specified".into()));
    }

    // Reject arguments containing NUL bytes rather than silently
    // dropping them (which would mutate the effective argv).
    let c_args: Vec<CString> = command
        .iter()
        .map(|s| {
            CString::new(s.as_bytes())
                .map_err(|_| Error::Usage(format!("argument contains null byte: {s:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let master = posix_openpt(OFlag::O_RDWR).map_err(|e| Error::sys("posix_openpt", e))?;
    grantpt(&master).map_err(|e| Error::sys("grantpt", e))?;
    unlockpt(&master).map_err(|e| Error::sys("unlockpt", e))?;
    let slave_path = slave_name(&master).map_err(|e| Error::sys("ptsname", e))?;
    let slave_path = CString::new(slave_path)
        .map_err(|_| Error::General("slave pty name contains null byte".into()))?;

    // Plain C structs prepared before fork; the child touches no Rust
    // wrappers after it.
    let slave_termios: Option<libc::termios> = settings.map(|s| s.termios.clone().into());
    let slave_winsize: Option<libc::winsize> = settings.map(|s| s.winsize);

    let master: OwnedFd = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

    // Non-blocking for tokio AsyncFd.
    nix::fcntl::fcntl(&master, nix::fcntl::FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
        .map_err(|e| Error::sys("fcntl(O_NONBLOCK)", e))?;

    match unsafe { fork() }.map_err(|e| Error::sys("fork", e))? {
        ForkResult::Parent { child } => Ok(ChildProcess { pid: child, master }),
        ForkResult::Child => {
            // -- Child branch: async-signal-safe only --

            let master_fd = master.as_raw_fd();
            unsafe { libc::close(master_fd) };
            std::mem::forget(master);

            // New session, detached from the parent's controlling tty.
            if setsid().is_err() {
                unsafe { libc::_exit(1) };
            }

            // Opening the slave acquires the controlling terminal on
            // System V derived systems.
            let slave_fd = unsafe { libc::open(slave_path.as_ptr(), libc::O_RDWR) };
            if slave_fd < 0 {
                unsafe { libc::_exit(1) };
            }

            // The BSD way. Fails harmlessly where open() already did it.
            unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) };

            if let Some(t) = slave_termios {
                if unsafe { libc::tcsetattr(slave_fd, libc::TCSANOW, &t) } < 0 {
                    unsafe { libc::_exit(1) };
                }
            }
            if let Some(ws) = slave_winsize {
                if unsafe { libc::ioctl(slave_fd, libc::TIOCSWINSZ, &ws) } < 0 {
                    unsafe { libc::_exit(1) };
                }
            }

            // Slave becomes stdin/stdout/stderr.
            if unsafe { libc::dup2(slave_fd, 0) } < 0
                || unsafe { libc::dup2(slave_fd, 1) } < 0
                || unsafe { libc::dup2(slave_fd, 2) } < 0
            {
                unsafe { libc::_exit(1) };
            }
            if slave_fd > 2 {
                unsafe { libc::close(slave_fd) };
            }

            // Close all other inherited fds (best-effort).
            for fd in 3..1024 {
                unsafe { libc::close(fd) };
            }

            // For children that should survive the supervisor's own
            // hangup, e.g. `ssh -f`.
            if nohup_child {
                unsafe { libc::signal(libc::SIGHUP, libc::SIG_IGN) };
            }

            let _ = execvp(&c_args[0], &c_args);

            // If exec failed, exit with 127 (command not found convention).
            unsafe { libc::_exit(127) };
        }
    }
}

/// Wait for the child process to exit and return its exit code.
///
/// For signal-terminated children, returns 128 + signal number per
/// standard convention. Called after the I/O loop has already seen the
/// master report EOF, so the child has exited or is about to.
pub fn wait_for_exit(pid: Pid) -> Result<i32, Error> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG))
            .map_err(|e| Error::sys("waitpid", e))?
        {
            WaitStatus::Exited(_, code) => return Ok(code),
            WaitStatus::Signaled(_, sig, _) => return Ok(128 + sig as i32),
            _ => {
                // Still alive, stopped or continued — brief sleep then
                // retry. This path is rare (master EOF usually means
                // the child already exited).
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(args: &[&str]) -> ChildProcess {
        let command: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        spawn_child(&command, None, false).unwrap()
    }

    #[test]
    fn empty_command_rejected() {
        let err = spawn_child(&[], None, false).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn nul_byte_in_argument_rejected() {
        let cmd = vec!["echo".to_string(), "hello\0world".to_string()];
        let err = spawn_child(&cmd, None, false).unwrap_err();
        assert!(matches!(err, Error::Usage(ref msg) if msg.contains("null byte")));
    }

    #[test]
    fn spawn_true_exits_zero() {
        let child = spawn(&["true"]);
        assert_eq!(wait_for_exit(child.pid).unwrap(), 0);
    }

    #[test]
    fn spawn_false_exits_nonzero() {
        let child = spawn(&["false"]);
        assert_eq!(wait_for_exit(child.pid).unwrap(), 1);
    }

    #[test]
    fn nonexistent_command_exits_127() {
        let child = spawn(&["__ptypass_nonexistent_cmd_12345__"]);
        assert_eq!(wait_for_exit(child.pid).unwrap(), 127);
    }

    #[test]
    fn child_output_arrives_on_the_master() {
        let child = spawn(&["sh", "-c", "echo marker-$((40 + 2))"]);
        let mut buf = [0u8; 256];
        let mut output = Vec::new();
        loop {
            match nix::unistd::read(&child.master, &mut buf) {
                Ok(0) | Err(nix::Error::EIO) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                Err(nix::Error::EAGAIN) => {
                    if let Ok(WaitStatus::Exited(..)) =
                        waitpid(child.pid, Some(WaitPidFlag::WNOHANG))
                    {
                        // Drain whatever is left.
                        while let Ok(n) = nix::unistd::read(&child.master, &mut buf) {
                            if n == 0 {
                                break;
                            }
                            output.extend_from_slice(&buf[..n]);
                        }
                        break;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(e) => panic!("read error: {e}"),
            }
        }
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("marker-42"), "got: {text:?}");
    }
}
