//! Pty supervision — the single-threaded event loop.
//!
//! Spawns the command under a pseudo-terminal and multiplexes, on one
//! thread and without locks, the child's output (forwarded verbatim to
//! stdout and the log sink, and scanned for prompts), the user's
//! keystrokes (forwarded to the child; the first one permanently stops
//! prompt injection), deferred signal handling (SIGCHLD reaping,
//! SIGWINCH resize propagation), the prompt-silence timeout, and the
//! post-EOF drip that nudges shells which drop back-to-back EOF marks.

mod child;
mod sink;
mod terminal;

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::libc;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, isatty};
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{SignalKind, signal as tokio_signal};
use tokio::time::{self, MissedTickBehavior};

use child::{SlaveSettings, spawn_child, wait_for_exit};
use sink::{LogSink, mirror};
use terminal::RawModeGuard;

use crate::error::Error;
use crate::prompt::PromptMatcher;
use crate::prompt::window::{CHUNK, ScanWindow};

/// How often the loop wakes up with nothing to do, to re-check the
/// no-prompt deadline.
const POLICY_TICK: Duration = Duration::from_millis(1100);

/// Minimum spacing between EOF characters dripped at the child after
/// stdin closes. Some shells silently drop EOF marks delivered
/// back-to-back.
const EOF_DRIP_SPACING: Duration = Duration::from_millis(50);

/// How long to wait after fork for the master to become writable
/// (until the child has the slave side open, on some platforms).
const STARTUP_HANDSHAKE: Duration = Duration::from_secs(1);

/// Everything the supervisor needs to run one session. Immutable after
/// startup.
#[derive(Debug)]
pub struct SessionConfig {
    pub password: String,
    pub matcher: PromptMatcher,
    /// Upper bound on password injections; 0 means unbounded.
    pub max_tries: u32,
    /// Fail on the (max_tries+1)-th prompt instead of going quiet.
    pub fatal_more_tries: bool,
    /// Prompt-silence timeout; `None` disables it.
    pub timeout: Option<Duration>,
    /// A timeout before the first prompt is fatal.
    pub fatal_no_prompt: bool,
    /// Answer `yes\r` to a yes/no prompt seen before any password prompt.
    pub auto_yesno: bool,
    pub nohup_child: bool,
    pub log_to_pty: Option<PathBuf>,
    pub log_from_pty: Option<PathBuf>,
    pub command: Vec<String>,
}

/// Loop-owned state. The matcher state machine is three sticky flags:
/// a keystroke makes the session interactive, the try budget or the
/// silence timeout makes it give up, and none of the three ever
/// resumes scanning.
struct Session<'a> {
    cfg: &'a SessionConfig,
    master_fd: RawFd,
    window: ScanWindow,
    to_sink: Option<LogSink>,
    from_sink: Option<LogSink>,
    passwords_seen: u32,
    given_up: bool,
    now_interactive: bool,
    stdin_eof: bool,
    last_activity: Instant,
}

impl Session<'_> {
    /// Process `n` bytes just read into the window's spare tail:
    /// forward them verbatim, then (while scanning is still enabled)
    /// commit them to the scan window and apply the match policy.
    fn handle_chunk(&mut self, n: usize) -> Result<(), Error> {
        let bytes = self.window.uncommitted(n);
        write_all_fd(libc::STDOUT_FILENO, bytes)?;
        mirror(&mut self.from_sink, bytes);

        if !self.given_up {
            if let Some(limit) = self.cfg.timeout {
                if self.last_activity.elapsed() >= limit {
                    self.given_up = true;
                    tracing::debug!("prompt silence timeout, scanning disabled");
                }
            }
        }

        if self.now_interactive || self.given_up {
            self.window.clear();
            return Ok(());
        }

        // The regex refuses nothing, but a NUL would never occur in a
        // prompt; rewrite so `.` and classes can still run across it.
        self.window.mask_nuls(n);
        self.window.commit(n);
        self.apply_match_policy()?;
        self.window.compact();
        Ok(())
    }

    /// At most one injection per appended chunk; the next scan happens
    /// after the next read.
    fn apply_match_policy(&mut self) -> Result<(), Error> {
        if self.cfg.auto_yesno && self.passwords_seen == 0 {
            if let Some(end) = self.cfg.matcher.yesno_end(self.window.data()) {
                tracing::debug!("yes/no prompt matched, answering yes");
                write_all_fd(self.master_fd, b"yes\r")?;
                mirror(&mut self.to_sink, b"yes\r");
                self.window.consume(end);
                return Ok(());
            }
        }

        if let Some(end) = self.cfg.matcher.prompt_end(self.window.data()) {
            self.passwords_seen += 1;
            self.last_activity = Instant::now();

            if self.cfg.fatal_more_tries {
                if self.cfg.max_tries > 0 && self.passwords_seen > self.cfg.max_tries {
                    return Err(Error::MaxTries(self.cfg.max_tries));
                }
            } else if self.cfg.max_tries > 0 && self.passwords_seen >= self.cfg.max_tries {
                self.given_up = true;
            }

            tracing::debug!(count = self.passwords_seen, "password prompt matched, injecting");
            write_all_fd(self.master_fd, self.cfg.password.as_bytes())?;
            write_all_fd(self.master_fd, b"\r")?;
            mirror(&mut self.to_sink, b"********\r");
            self.window.consume(end);
        }
        Ok(())
    }

    /// The no-prompt deadline, checked on every policy tick.
    fn no_prompt_deadline_passed(&self) -> bool {
        match self.cfg.timeout {
            Some(limit) => {
                self.cfg.fatal_no_prompt
                    && self.passwords_seen == 0
                    && self.last_activity.elapsed() > limit
            }
            None => false,
        }
    }

    /// Write one EOF control character at the child. Returns `false`
    /// when the master no longer accepts it, which ends the session.
    fn drip_eof(&mut self) -> bool {
        let Ok(c) = terminal::eof_char(self.master_fd) else {
            return false;
        };
        if write_all_fd(self.master_fd, &[c]).is_err() {
            return false;
        }
        mirror(&mut self.to_sink, &[c]);
        true
    }
}

/// Run a supervised session for the configured command.
///
/// This is the main entry point called from `main`. Returns the
/// child's exit code on success: the forwarded exit status, or 128
/// plus the signal number if the child died from a signal.
pub async fn run_session(cfg: &SessionConfig) -> Result<i32, Error> {
    let stdin_is_tty = isatty(std::io::stdin().as_fd()).unwrap_or(false);
    let stdout_is_tty = isatty(std::io::stdout().as_fd()).unwrap_or(false);

    // Install signal streams before forking so no child event is lost.
    let mut sigchld = tokio_signal(SignalKind::child())
        .map_err(|e| Error::io("install SIGCHLD handler", e))?;
    let mut sigwinch = tokio_signal(SignalKind::window_change())
        .map_err(|e| Error::io("install SIGWINCH handler", e))?;

    // The child inherits the user terminal's line discipline and
    // dimensions when there is a user terminal to inherit from.
    let slave_settings = if stdin_is_tty {
        Some(SlaveSettings {
            termios: nix::sys::termios::tcgetattr(unsafe {
                BorrowedFd::borrow_raw(libc::STDIN_FILENO)
            })
            .map_err(|e| Error::sys("tcgetattr", e))?,
            winsize: terminal::window_size(libc::STDIN_FILENO)?,
        })
    } else {
        None
    };

    let spawned = spawn_child(&cfg.command, slave_settings.as_ref(), cfg.nohup_child)?;
    let child_pid = spawned.pid;
    let master_fd = spawned.master.as_raw_fd();

    tracing::info!(
        pid = child_pid.as_raw(),
        command = ?cfg.command,
        "session started"
    );

    let to_sink = open_sink(&cfg.log_to_pty)?;
    let from_sink = open_sink(&cfg.log_from_pty)?;

    // Raw mode wants a terminal on both ends; `ptypass ls | less` must
    // leave the tty alone so the pager still gets cooked input.
    let mut raw_guard = if stdin_is_tty && stdout_is_tty {
        Some(RawModeGuard::enter(libc::STDIN_FILENO)?)
    } else {
        None
    };

    let master_async =
        AsyncFd::new(spawned.master).map_err(|e| Error::io("register master pty", e))?;
    let stdin_async = if stdin_is_tty {
        Some(AsyncFd::new(StdinFd).map_err(|e| Error::io("register stdin", e))?)
    } else {
        None
    };

    // Wait for the child to open the slave side; on some platforms the
    // master is not usable straight after fork.
    match time::timeout(STARTUP_HANDSHAKE, master_async.writable()).await {
        Ok(Ok(_guard)) => {}
        Ok(Err(e)) => return Err(Error::io("wait for master pty", e)),
        Err(_) => {
            return Err(Error::General(
                "failed to wait for master pty to be writable".into(),
            ));
        }
    }

    let mut session = Session {
        cfg,
        master_fd,
        window: ScanWindow::new(),
        to_sink,
        from_sink,
        passwords_seen: 0,
        given_up: false,
        now_interactive: false,
        stdin_eof: false,
        last_activity: Instant::now(),
    };

    let mut policy_tick = time::interval(POLICY_TICK);
    policy_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut drip = time::interval(EOF_DRIP_SPACING);
    drip.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stdin_buf = [0u8; CHUNK];
    let mut exit_code: Option<i32> = None;

    // -- Main loop --
    'main: loop {
        tokio::select! {
            // -- Child state changes --
            _ = sigchld.recv() => {
                if let Some(code) = reap(child_pid)? {
                    exit_code = Some(code);
                    break 'main;
                }
                // Stopped, continued, or somebody else's child: keep going.
            }

            // -- Give up waiting for the first prompt --
            _ = policy_tick.tick() => {
                if session.no_prompt_deadline_passed() {
                    return Err(Error::PromptTimeout);
                }
            }

            // -- Window resize --
            _ = sigwinch.recv(), if stdin_is_tty => {
                if let Err(e) = terminal::propagate_window_size(libc::STDIN_FILENO, master_fd) {
                    tracing::warn!(error = %e, "SIGWINCH handling failed");
                }
            }

            // -- Post-EOF drip toward the child --
            _ = drip.tick(), if session.stdin_eof => {
                if !session.drip_eof() {
                    break 'main;
                }
            }

            // -- Child output → stdout + scan window --
            guard = master_async.readable() => {
                let mut guard = guard.map_err(|e| Error::io("poll master pty", e))?;
                loop {
                    match guard.try_io(|inner| {
                        nix_read(inner.as_raw_fd(), session.window.spare_mut())
                    }) {
                        Ok(Ok(0)) => break 'main,
                        Ok(Ok(n)) => session.handle_chunk(n)?,
                        Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => {
                            // All slave fds closed — the child is done.
                            break 'main;
                        }
                        Ok(Err(e)) => return Err(Error::io("read master pty", e)),
                        Err(_would_block) => break,
                    }
                }
            }

            // -- User keystrokes → child --
            guard = async {
                match stdin_async.as_ref() {
                    Some(fd) => fd.readable().await,
                    None => std::future::pending().await,
                }
            }, if stdin_is_tty && !session.stdin_eof => {
                let mut guard = guard.map_err(|e| Error::io("poll stdin", e))?;
                match guard.try_io(|_| nix_read(libc::STDIN_FILENO, &mut stdin_buf)) {
                    Ok(Ok(0)) => {
                        session.stdin_eof = true;
                        // First EOF character no sooner than one spacing
                        // interval from now.
                        drip.reset();
                    }
                    Ok(Ok(n)) => {
                        if !session.now_interactive {
                            tracing::debug!("keyboard input, prompt injection disabled");
                        }
                        session.now_interactive = true;
                        write_all_fd(master_fd, &stdin_buf[..n])?;
                        mirror(&mut session.to_sink, &stdin_buf[..n]);
                    }
                    Ok(Err(e)) => return Err(Error::io("read stdin", e)),
                    Err(_would_block) => {}
                }
            }
        }
    }

    // -- Drain phase --
    // The child has terminated (or its side of the pty is gone), but
    // the master may still hold output.
    let mut tail = [0u8; CHUNK];
    loop {
        match nix_read(master_fd, &mut tail) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                write_all_fd(libc::STDOUT_FILENO, &tail[..n])?;
                mirror(&mut session.from_sink, &tail[..n]);
            }
        }
    }

    let code = match exit_code {
        Some(code) => code,
        None => wait_for_exit(child_pid)?,
    };

    drop(session);
    if let Some(guard) = raw_guard.as_mut() {
        guard.restore()?;
    }

    tracing::info!(exit_code = code, "session ended");
    Ok(code)
}

/// Reap pending child events after a SIGCHLD.
///
/// Returns the supervisor exit code once the child has a terminal
/// disposition; stop and continue events leave the session running.
fn reap(child_pid: Pid) -> Result<Option<i32>, Error> {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(child_pid, Some(flags)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Some(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(Some(128 + sig as i32)),
            Ok(WaitStatus::Stopped(..)) | Ok(WaitStatus::Continued(..)) => continue,
            Ok(_) => return Ok(None),
            Err(nix::Error::ECHILD) => return Ok(None),
            Err(e) => return Err(Error::sys("waitpid", e)),
        }
    }
}

fn open_sink(path: &Option<PathBuf>) -> Result<Option<LogSink>, Error> {
    match path {
        Some(p) => LogSink::create(p)
            .map(Some)
            .map_err(|e| Error::io(format!("open {}", p.display()), e)),
        None => Ok(None),
    }
}

// -- Helpers --

/// Non-owning wrapper for the stdin fd, for `AsyncFd`. Does not close
/// on drop.
struct StdinFd;

impl AsRawFd for StdinFd {
    fn as_raw_fd(&self) -> RawFd {
        libc::STDIN_FILENO
    }
}

/// Read from a raw fd, converting nix errors to `io::Error`.
fn nix_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: fd is stdin or the pty master, valid for the session.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    nix::unistd::read(borrowed, buf).map_err(|e| io::Error::from_raw_os_error(e as i32))
}

/// Write all bytes to a raw fd, riding out interrupts and short writes.
fn write_all_fd(fd: RawFd, mut data: &[u8]) -> Result<(), Error> {
    // SAFETY: fd is the pty master or stdout, valid for the session.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    while !data.is_empty() {
        match nix::unistd::write(borrowed, data) {
            Ok(n) => data = &data[n..],
            Err(nix::Error::EINTR) => continue,
            Err(nix::Error::EAGAIN) => {
                // Non-blocking fd is full — brief yield then retry.
                std::thread::yield_now();
            }
            Err(e) => return Err(Error::sys(format!("write: fd {fd}"), e)),
        }
    }
    Ok(())
}
