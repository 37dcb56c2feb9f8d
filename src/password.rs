//! Password resolution and command-line hygiene.
//!
//! The `-p` argument is either the password itself, `env:NAME` to read
//! an environment variable, or `file:PATH` to read the first token of a
//! file. After resolution the literal argument is scrubbed from the
//! process argument vector so it does not show up in `ps` output.

use crate::error::Error;

/// Resolve a `-p` argument to the actual password bytes.
///
/// `file:PATH` takes the first whitespace-delimited token of the file's
/// first line; a blank first line yields an empty password. `env:NAME`
/// reads the named variable. Anything else is the password verbatim.
pub fn resolve(spec: &str) -> Result<String, Error> {
    if let Some(path) = spec.strip_prefix("file:") {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Usage(format!("failed to get password from {path}: {e}")))?;
        let first_line = text.lines().next().unwrap_or("");
        Ok(first_line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string())
    } else if let Some(name) = spec.strip_prefix("env:") {
        std::env::var(name)
            .map_err(|_| Error::Usage(format!("failed to get password from ${name}")))
    } else {
        Ok(spec.to_string())
    }
}

/// Overwrite the `-p` argument in this process's argument vector with
/// asterisks.
///
/// Only implemented on Linux, where the kernel reports the argv region
/// in `/proc/self/stat`. Best-effort: failure to locate the argument
/// leaves the command line untouched.
pub fn mask_cmdline(spec: &str) {
    #[cfg(target_os = "linux")]
    if mask_cmdline_linux(spec.as_bytes()).is_none() {
        tracing::debug!("could not locate -p argument in argv region");
    }
    #[cfg(not(target_os = "linux"))]
    let _ = spec;
}

#[cfg(target_os = "linux")]
fn mask_cmdline_linux(secret: &[u8]) -> Option<()> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Fields after the parenthesized comm, which may itself contain
    // spaces. arg_start and arg_end are stat fields 48 and 49; the
    // first field after the comm is field 3.
    let rest = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let arg_start: usize = fields.get(45)?.parse().ok()?;
    let arg_end: usize = fields.get(46)?.parse().ok()?;
    if arg_start == 0 || arg_end <= arg_start {
        return None;
    }

    // SAFETY: [arg_start, arg_end) is this process's own argv region as
    // reported by the kernel. It stays mapped and writable for the
    // process lifetime, and nothing else mutates it concurrently.
    let region = unsafe {
        std::slice::from_raw_parts_mut(arg_start as *mut u8, arg_end - arg_start)
    };

    let (offset, len) = locate_secret(region, secret)?;
    region[offset..offset + len].fill(b'*');
    Some(())
}

/// Find the byte range of the `-p` value inside a NUL-separated argv
/// region. Handles both `-p SPEC` and the attached `-pSPEC` / `-p=SPEC`
/// forms. Matching on the `-p` flag itself avoids clobbering an
/// identical token that belongs to another option or to the command.
fn locate_secret(region: &[u8], secret: &[u8]) -> Option<(usize, usize)> {
    if secret.is_empty() {
        return None;
    }

    let mut offset = 0;
    let mut after_flag = false;
    for token in region.split(|&b| b == 0) {
        if after_flag && token == secret {
            return Some((offset, token.len()));
        }
        after_flag = token == b"-p";

        if let Some(rest) = token.strip_prefix(b"-p") {
            let (skip, value) = match rest.first() {
                Some(b'=') => (3, &rest[1..]),
                _ => (2, rest),
            };
            if !value.is_empty() && value == secret {
                return Some((offset + skip, value.len()));
            }
        }

        offset += token.len() + 1;
    }
    None
}
