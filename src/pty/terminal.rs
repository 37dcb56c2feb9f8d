//! Terminal management — raw mode, restoration, window size.
//!
//! [`RawModeGuard`] owns the user's saved termios and restores it
//! exactly once, on whichever exit path comes first: the explicit
//! [`restore`](RawModeGuard::restore) call or the [`Drop`] safety net.

use std::os::fd::{BorrowedFd, RawFd};

use nix::libc;
use nix::sys::termios::{
    self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};

use crate::error::Error;

// SAFETY wrapper for fds we hold but do not own (stdin, the master).
// They stay open for the life of the session.
fn borrowed(fd: RawFd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// RAII guard that restores terminal settings on drop.
///
/// Entering raw mode also sets the fd non-blocking so it can be driven
/// through `AsyncFd`; the original fcntl flags are restored together
/// with the termios.
#[derive(Debug)]
pub struct RawModeGuard {
    fd: RawFd,
    original: Termios,
    original_flags: nix::fcntl::OFlag,
    restored: bool,
}

impl RawModeGuard {
    /// Capture current settings and switch `fd` to raw mode.
    ///
    /// Raw mode turns off echo, canonical lines, extended input
    /// processing, signal keys, BREAK-to-SIGINT, CR/NL translation,
    /// parity checking, bit stripping, flow control and output
    /// post-processing; reads deliver one byte with no timer. The mode
    /// is read back after setting and every requested bit is verified;
    /// a partial application is reverted and reported as
    /// [`Error::InvalidTtyState`].
    pub fn enter(fd: RawFd) -> Result<Self, Error> {
        let original =
            termios::tcgetattr(borrowed(fd)).map_err(|e| Error::sys("tcgetattr", e))?;
        let original_flags = nix::fcntl::fcntl(borrowed(fd), nix::fcntl::FcntlArg::F_GETFL)
            .map(nix::fcntl::OFlag::from_bits_truncate)
            .map_err(|e| Error::sys("fcntl(F_GETFL)", e))?;

        let mut raw = original.clone();
        raw.local_flags &= !(LocalFlags::ECHO
            | LocalFlags::ICANON
            | LocalFlags::IEXTEN
            | LocalFlags::ISIG);
        raw.input_flags &= !(InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::IXON);
        raw.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
        raw.control_flags |= ControlFlags::CS8;
        raw.output_flags &= !OutputFlags::OPOST;
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(borrowed(fd), SetArg::TCSAFLUSH, &raw)
            .map_err(|e| Error::sys("tcsetattr", e))?;

        // tcsetattr reports success if it applied *any* of the changes;
        // read the mode back and verify every bit, reverting otherwise.
        let applied = match termios::tcgetattr(borrowed(fd)) {
            Ok(t) => t,
            Err(e) => {
                let _ = termios::tcsetattr(borrowed(fd), SetArg::TCSAFLUSH, &original);
                return Err(Error::sys("tcgetattr after raw", e));
            }
        };
        if !raw_mode_applied(&applied) {
            let _ = termios::tcsetattr(borrowed(fd), SetArg::TCSAFLUSH, &original);
            return Err(Error::InvalidTtyState);
        }

        // Non-blocking for AsyncFd integration.
        nix::fcntl::fcntl(
            borrowed(fd),
            nix::fcntl::FcntlArg::F_SETFL(original_flags | nix::fcntl::OFlag::O_NONBLOCK),
        )
        .map_err(|e| Error::sys("fcntl(F_SETFL)", e))?;

        Ok(Self {
            fd,
            original,
            original_flags,
            restored: false,
        })
    }

    /// Put the terminal back the way it was found. Idempotent.
    pub fn restore(&mut self) -> Result<(), Error> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        nix::fcntl::fcntl(
            borrowed(self.fd),
            nix::fcntl::FcntlArg::F_SETFL(self.original_flags),
        )
        .map_err(|e| Error::sys("fcntl(F_SETFL)", e))?;
        termios::tcsetattr(borrowed(self.fd), SetArg::TCSAFLUSH, &self.original)
            .map_err(|e| Error::sys("tcsetattr restore", e))?;
        Ok(())
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            eprintln!("WARNING: failed to restore terminal: {e}\r");
        }
    }
}

fn raw_mode_applied(t: &Termios) -> bool {
    !t.local_flags.intersects(
        LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::IEXTEN | LocalFlags::ISIG,
    ) && !t.input_flags.intersects(
        InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::IXON,
    ) && (t.control_flags & (ControlFlags::CSIZE | ControlFlags::PARENB))
        == ControlFlags::CS8
        && !t.output_flags.intersects(OutputFlags::OPOST)
        && t.control_chars[SpecialCharacterIndices::VMIN as usize] == 1
        && t.control_chars[SpecialCharacterIndices::VTIME as usize] == 0
}

/// Read the current window size of a terminal fd.
pub fn window_size(fd: RawFd) -> Result<libc::winsize, Error> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) } < 0 {
        return Err(Error::sys("ioctl(TIOCGWINSZ)", nix::Error::last()));
    }
    Ok(ws)
}

/// Copy the user terminal's window size onto the pty master.
///
/// Called on SIGWINCH. The kernel delivers the child's own SIGWINCH
/// when the master size changes.
pub fn propagate_window_size(tty_fd: RawFd, master_fd: RawFd) -> Result<(), Error> {
    let ws = window_size(tty_fd)?;
    if unsafe { libc::ioctl(master_fd, libc::TIOCSWINSZ, &ws) } < 0 {
        return Err(Error::sys("ioctl(TIOCSWINSZ)", nix::Error::last()));
    }
    tracing::debug!(rows = ws.ws_row, cols = ws.ws_col, "window resized");
    Ok(())
}

/// The end-of-file control character currently configured on a tty fd.
pub fn eof_char(fd: RawFd) -> Result<u8, Error> {
    let t = termios::tcgetattr(borrowed(fd)).map_err(|e| Error::sys("tcgetattr", e))?;
    Ok(t.control_chars[SpecialCharacterIndices::VEOF as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn raw_mode_needs_a_tty() {
        let f = std::fs::File::open("/dev/null").unwrap();
        let err = RawModeGuard::enter(f.as_raw_fd()).unwrap_err();
        assert!(matches!(err, Error::Sys { .. }));
    }

    #[test]
    fn eof_char_needs_a_tty() {
        let f = std::fs::File::open("/dev/null").unwrap();
        assert!(eof_char(f.as_raw_fd()).is_err());
    }

    #[test]
    fn window_size_needs_a_tty() {
        let f = std::fs::File::open("/dev/null").unwrap();
        assert!(window_size(f.as_raw_fd()).is_err());
    }
}
