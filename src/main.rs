mod cli;
mod error;
mod password;
mod prompt;
mod pty;

use std::io::Write;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use error::{EXIT_USAGE, Error};
use prompt::PromptMatcher;
use pty::SessionConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Diagnostics go to stderr; stdout belongs to the child's bytes.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            let _ = e.print();
            return 0;
        }
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };

    let config = match session_config(cli) {
        Ok(config) => config,
        Err(e) => return fail(e),
    };

    match pty::run_session(&config).await {
        Ok(code) => code,
        Err(e) => fail(e),
    }
}

fn session_config(cli: Cli) -> Result<SessionConfig, Error> {
    let password = match &cli.password {
        Some(spec) => {
            let resolved = password::resolve(spec)?;
            // Keep the literal out of `ps` output.
            password::mask_cmdline(spec);
            resolved
        }
        None => cli::DEFAULT_PASSWORD.to_string(),
    };

    let matcher = PromptMatcher::new(&cli.prompt, &cli.yesno, cli.ignore_case)
        .map_err(|e| Error::Usage(e.to_string()))?;

    Ok(SessionConfig {
        password,
        matcher,
        max_tries: cli.max_tries,
        fatal_more_tries: cli.fatal_more_tries,
        timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
        fatal_no_prompt: cli.fatal_no_prompt,
        auto_yesno: cli.auto_yesno,
        nohup_child: cli.nohup_child,
        log_to_pty: cli.log_to_pty,
        log_from_pty: cli.log_from_pty,
        command: cli.command,
    })
}

fn fail(e: Error) -> i32 {
    // stdout and stderr may share the terminal; order the diagnostic
    // after everything already forwarded. The terminal may have been
    // raw until a moment ago, hence the explicit carriage return.
    let _ = std::io::stdout().flush();
    eprint!("!! {e}\r\n");
    tracing::error!(error = %e, "fatal");
    e.exit_code()
}
