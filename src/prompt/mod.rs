//! Prompt detection — compiled password and yes/no patterns.
//!
//! Patterns arrive in the POSIX basic dialect (see [`bre`]), are
//! translated once at startup, and are matched as byte regexes over the
//! live region of the sliding [`window::ScanWindow`]. Byte matching
//! matters: child output is not guaranteed to be UTF-8, and NULs in the
//! window have already been rewritten to `0xFF`.

pub mod bre;
pub mod window;

use regex::bytes::{Regex, RegexBuilder};

/// Errors from pattern translation or compilation. All of them are
/// usage errors as far as the exit code is concerned.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("empty prompt pattern")]
    Empty,
    #[error("back-references are not supported: \\{0}")]
    Backref(char),
    #[error("trailing backslash in pattern")]
    TrailingBackslash,
    #[error("invalid prompt pattern: {0}")]
    Invalid(#[from] regex::Error),
}

/// The two prompt patterns, compiled once.
#[derive(Debug)]
pub struct PromptMatcher {
    prompt: Regex,
    yesno: Regex,
}

impl PromptMatcher {
    pub fn new(
        prompt_bre: &str,
        yesno_bre: &str,
        ignore_case: bool,
    ) -> Result<Self, PatternError> {
        if prompt_bre.is_empty() || yesno_bre.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            prompt: compile(prompt_bre, ignore_case)?,
            yesno: compile(yesno_bre, ignore_case)?,
        })
    }

    /// End offset of the first password-prompt match in `window`.
    pub fn prompt_end(&self, window: &[u8]) -> Option<usize> {
        self.prompt.find(window).map(|m| m.end())
    }

    /// End offset of the first yes/no-prompt match in `window`.
    pub fn yesno_end(&self, window: &[u8]) -> Option<usize> {
        self.yesno.find(window).map(|m| m.end())
    }
}

fn compile(pattern: &str, ignore_case: bool) -> Result<Regex, PatternError> {
    let translated = bre::translate(pattern)?;
    // Non-unicode mode so `.` and classes range over raw bytes.
    Ok(RegexBuilder::new(&translated)
        .case_insensitive(ignore_case)
        .unicode(false)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{DEFAULT_PROMPT, DEFAULT_YESNO};

    fn matcher(ignore_case: bool) -> PromptMatcher {
        PromptMatcher::new(DEFAULT_PROMPT, DEFAULT_YESNO, ignore_case).unwrap()
    }

    #[test]
    fn default_prompt_matches_at_window_end() {
        let m = matcher(false);
        assert_eq!(m.prompt_end(b"Password:"), Some(9));
        assert_eq!(m.prompt_end(b"Password: "), Some(10));
        assert_eq!(m.prompt_end(b"login\r\npassword:"), Some(16));
        assert_eq!(m.prompt_end(b"Password: x"), None);
    }

    #[test]
    fn dollar_anchors_to_the_window_not_to_lines() {
        let m = matcher(false);
        // A prompt followed by more output is no longer at the end.
        assert_eq!(m.prompt_end(b"Password: \r\nwrong\r\n"), None);
    }

    #[test]
    fn default_yesno_matches_literal_punctuation() {
        let m = matcher(false);
        let text = b"Are you sure you want to continue connecting (yes/no)? ";
        assert_eq!(m.yesno_end(text), Some(text.len()));
        assert_eq!(m.yesno_end(b"yes/no? "), None);
    }

    #[test]
    fn case_insensitive_flag() {
        assert_eq!(matcher(false).prompt_end(b"PASSWORD: "), None);
        assert_eq!(matcher(true).prompt_end(b"PASSWORD: "), Some(10));
    }

    #[test]
    fn matches_across_rewritten_nul_bytes() {
        let m = matcher(false);
        let mut text = b"\xff\xffPassword: ".to_vec();
        assert_eq!(m.prompt_end(&text), Some(text.len()));
        text.extend_from_slice(b"\xff");
        assert_eq!(m.prompt_end(&text), None);
    }

    #[test]
    fn custom_pattern_in_basic_dialect() {
        let m = PromptMatcher::new(r"pass\(word\)\{1,2\}:", DEFAULT_YESNO, false).unwrap();
        assert_eq!(m.prompt_end(b"passwordword: here"), Some(13));
    }

    #[test]
    fn empty_pattern_rejected() {
        assert!(matches!(
            PromptMatcher::new("", DEFAULT_YESNO, false),
            Err(PatternError::Empty)
        ));
    }

    #[test]
    fn invalid_pattern_rejected() {
        assert!(matches!(
            PromptMatcher::new(r"a\{2,1\}", DEFAULT_YESNO, false),
            Err(PatternError::Invalid(_))
        ));
    }
}
