//! Log sinks — append-only byte mirrors of the pty traffic.
//!
//! Two independent sinks exist per session: one for bytes written
//! toward the pty (`-l`) and one for bytes read from it (`-L`). The
//! streams are raw, with no framing or timestamps.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// One append-only log file.
///
/// Creation failures are fatal to the caller; write failures are not —
/// a sink that goes bad drops bytes with a warning rather than
/// interrupting the byte path between child and terminal.
#[derive(Debug)]
pub struct LogSink {
    file: File,
    path: PathBuf,
}

impl LogSink {
    /// Create (or truncate) the log file with owner-only permissions.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append bytes, best-effort.
    pub fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.file.write_all(bytes) {
            tracing::warn!(path = %self.path.display(), error = %e, "log sink write dropped");
        }
    }
}

/// Mirror bytes into an optional sink. No-op when logging is off.
pub fn mirror(sink: &mut Option<LogSink>, bytes: &[u8]) {
    if let Some(sink) = sink.as_mut() {
        sink.write(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn creates_with_owner_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("to.log");
        let _sink = LogSink::create(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn appends_raw_bytes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("from.log");
        let mut sink = LogSink::create(&path).unwrap();

        sink.write(b"first \xff\x00 chunk ");
        sink.write(b"second chunk");
        drop(sink);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"first \xff\x00 chunk second chunk");
    }

    #[test]
    fn truncates_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, b"stale").unwrap();

        let mut sink = LogSink::create(&path).unwrap();
        sink.write(b"new");
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn create_fails_on_bad_path() {
        assert!(LogSink::create(Path::new("/nonexistent/dir/log")).is_err());
    }

    #[test]
    fn mirror_is_a_noop_without_a_sink() {
        let mut none: Option<LogSink> = None;
        mirror(&mut none, b"dropped");
    }
}
