//! Crate-wide error type and its process exit-code mapping.
//!
//! Every fatal condition funnels through [`Error`]; `main` prints one
//! diagnostic line and exits with [`Error::exit_code`]. The child's own
//! exit status (0–127, or 128+signal) never goes through this type.

use std::io;

/// Generic internal error.
pub const EXIT_GENERAL: i32 = 201;
/// Bad flags, empty or invalid prompt pattern, missing command.
pub const EXIT_USAGE: i32 = 202;
/// Timed out waiting for the first password prompt (`-t` with `-T`).
pub const EXIT_TIMEOUT: i32 = 203;
/// A system call failed.
pub const EXIT_SYS: i32 = 204;
/// Prompted again after `-c N` tries with `-C` set.
pub const EXIT_MAX_TRIES: i32 = 205;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("timeout waiting for password prompt")]
    PromptTimeout,

    #[error("still prompted for passwords after {0} tries")]
    MaxTries(u32),

    #[error("{context}: {source}")]
    Sys {
        context: String,
        #[source]
        source: nix::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Raw mode was only partially applied and had to be reverted.
    #[error("terminal did not accept raw mode settings")]
    InvalidTtyState,

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Wrap a nix error with a short context string.
    pub fn sys(context: impl Into<String>, source: nix::Error) -> Self {
        Error::Sys {
            context: context.into(),
            source,
        }
    }

    /// Wrap an io error with a short context string.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) => EXIT_USAGE,
            Error::PromptTimeout => EXIT_TIMEOUT,
            Error::MaxTries(_) => EXIT_MAX_TRIES,
            Error::Sys { .. } | Error::Io { .. } | Error::InvalidTtyState => EXIT_SYS,
            Error::General(_) => EXIT_GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_documented_values() {
        assert_eq!(Error::Usage("x".into()).exit_code(), 202);
        assert_eq!(Error::PromptTimeout.exit_code(), 203);
        assert_eq!(Error::MaxTries(2).exit_code(), 205);
        assert_eq!(
            Error::sys("read", nix::Error::EIO).exit_code(),
            204
        );
        assert_eq!(Error::InvalidTtyState.exit_code(), 204);
        assert_eq!(Error::General("x".into()).exit_code(), 201);
    }

    #[test]
    fn max_tries_message_names_the_count() {
        let msg = Error::MaxTries(3).to_string();
        assert!(msg.contains('3'), "got: {msg}");
    }
}
