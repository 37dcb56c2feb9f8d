use std::path::PathBuf;

use clap::Parser;

/// Default password when `-p` is not given.
pub const DEFAULT_PASSWORD: &str = "password";

/// Default password-prompt pattern (POSIX basic regex).
pub const DEFAULT_PROMPT: &str = r"[Pp]assword: \{0,1\}$";

/// Default yes/no-prompt pattern (POSIX basic regex). `(`, `)` and `?`
/// are literal in the basic dialect.
pub const DEFAULT_YESNO: &str = r"(yes/no)? \{0,1\}$";

#[derive(Parser, Debug)]
#[command(
    name = "ptypass",
    about = "Run a command under a pty and answer its password prompts",
    disable_version_flag = true
)]
pub struct Cli {
    /// Send at most N passwords (0 means unlimited)
    #[arg(short = 'c', value_name = "N", default_value_t = 0)]
    pub max_tries: u32,

    /// Exit if prompted for the (N+1)-th password
    #[arg(short = 'C')]
    pub fatal_more_tries: bool,

    /// Case-insensitive prompt matching
    #[arg(short = 'i')]
    pub ignore_case: bool,

    /// Make the child ignore SIGHUP (e.g. for `ssh -f`)
    #[arg(short = 'n')]
    pub nohup_child: bool,

    /// The password, or `env:NAME`, or `file:PATH`
    #[arg(short = 'p', value_name = "SPEC")]
    pub password: Option<String>,

    /// Basic regex for the password prompt
    #[arg(short = 'P', value_name = "PATTERN", default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Basic regex for the yes/no prompt
    #[arg(short = 'Y', value_name = "PATTERN", default_value = DEFAULT_YESNO)]
    pub yesno: String,

    /// Seconds of prompt silence before giving up (0 disables)
    #[arg(short = 't', value_name = "SEC", default_value_t = 0)]
    pub timeout: u64,

    /// Exit if the timeout elapses before the first prompt
    #[arg(short = 'T')]
    pub fatal_no_prompt: bool,

    /// Auto-answer an initial `(yes/no)?` prompt with `yes`
    #[arg(short = 'y')]
    pub auto_yesno: bool,

    /// Log bytes written toward the pty
    #[arg(short = 'l', value_name = "FILE")]
    pub log_to_pty: Option<PathBuf>,

    /// Log bytes read from the pty
    #[arg(short = 'L', value_name = "FILE")]
    pub log_from_pty: Option<PathBuf>,

    /// Command to run
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true
    )]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults() {
        let cli = parse(&["ptypass", "true"]);
        assert_eq!(cli.max_tries, 0);
        assert!(!cli.fatal_more_tries);
        assert!(!cli.ignore_case);
        assert_eq!(cli.password, None);
        assert_eq!(cli.prompt, DEFAULT_PROMPT);
        assert_eq!(cli.yesno, DEFAULT_YESNO);
        assert_eq!(cli.timeout, 0);
        assert_eq!(cli.command, vec!["true"]);
    }

    #[test]
    fn command_keeps_its_own_flags() {
        let cli = parse(&["ptypass", "-p", "pw", "ssh", "-l", "root", "host"]);
        assert_eq!(cli.password.as_deref(), Some("pw"));
        assert_eq!(cli.command, vec!["ssh", "-l", "root", "host"]);
        assert!(cli.log_to_pty.is_none());
    }

    #[test]
    fn all_short_flags_parse() {
        let cli = parse(&[
            "ptypass", "-c", "3", "-C", "-i", "-n", "-y", "-T", "-t", "5", "-P", "pass:", "-l",
            "/tmp/to", "-L", "/tmp/from", "cat",
        ]);
        assert_eq!(cli.max_tries, 3);
        assert!(cli.fatal_more_tries);
        assert!(cli.ignore_case);
        assert!(cli.nohup_child);
        assert!(cli.auto_yesno);
        assert!(cli.fatal_no_prompt);
        assert_eq!(cli.timeout, 5);
        assert_eq!(cli.prompt, "pass:");
        assert_eq!(cli.log_to_pty.as_deref().unwrap().to_str(), Some("/tmp/to"));
    }

    #[test]
    fn missing_command_is_an_error() {
        assert!(Cli::try_parse_from(["ptypass"]).is_err());
        assert!(Cli::try_parse_from(["ptypass", "-p", "pw"]).is_err());
    }

    #[test]
    fn non_numeric_count_is_an_error() {
        assert!(Cli::try_parse_from(["ptypass", "-c", "many", "true"]).is_err());
    }
}
