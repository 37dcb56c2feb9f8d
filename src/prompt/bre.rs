//! POSIX basic-regex to `regex`-crate dialect translation.
//!
//! The prompt patterns are specified in the historical basic dialect,
//! where `( ) { } ? + |` are ordinary characters unless escaped and
//! `\( \) \{m,n\} \? \+ \|` carry the operator meanings. The `regex`
//! crate speaks the modern dialect, so patterns are rewritten once at
//! startup: escapes are flipped, ordinary metacharacters are escaped,
//! and position-dependent specials (`^`, `$`, leading `*`) are resolved
//! from context. Bracket expressions pass through verbatim apart from
//! backslashes, which are ordinary inside POSIX brackets.

use super::PatternError;

/// Translate a basic regular expression into `regex`-crate syntax.
///
/// Back-references (`\1`..`\9`) have no counterpart in the `regex`
/// crate and are rejected.
pub fn translate(pattern: &str) -> Result<String, PatternError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;

    // True at positions where a `*` is an ordinary character: the very
    // start of the pattern and right after `^`, `\(` or `\|`.
    let mut at_expr_start = true;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let Some(&next) = chars.get(i + 1) else {
                    return Err(PatternError::TrailingBackslash);
                };
                match next {
                    '(' => {
                        out.push('(');
                        at_expr_start = true;
                    }
                    ')' => {
                        out.push(')');
                        at_expr_start = false;
                    }
                    '{' => {
                        out.push('{');
                        at_expr_start = false;
                    }
                    '}' => {
                        out.push('}');
                        at_expr_start = false;
                    }
                    '?' | '+' => {
                        out.push(next);
                        at_expr_start = false;
                    }
                    '|' => {
                        out.push('|');
                        at_expr_start = true;
                    }
                    '<' | '>' => {
                        out.push_str(r"\b");
                        at_expr_start = false;
                    }
                    '1'..='9' => return Err(PatternError::Backref(next)),
                    _ => {
                        // Escaped literal (`\.`, `\*`, `\\`, ...) or a
                        // class escape like `\w`; both survive as-is.
                        out.push('\\');
                        out.push(next);
                        at_expr_start = false;
                    }
                }
                i += 2;
            }
            '[' => {
                i += copy_bracket_expression(&chars[i..], &mut out);
                at_expr_start = false;
            }
            '^' => {
                if i == 0 {
                    out.push('^');
                    // An anchor does not consume the "start" position.
                } else {
                    out.push_str(r"\^");
                    at_expr_start = false;
                }
                i += 1;
            }
            '$' => {
                // Anchor at the very end, or just before `\)` / `\|`;
                // an ordinary character elsewhere.
                let at_end = i + 1 == chars.len()
                    || (chars[i + 1] == '\\'
                        && matches!(chars.get(i + 2).copied(), Some(')' | '|')));
                if at_end {
                    out.push('$');
                } else {
                    out.push_str(r"\$");
                }
                at_expr_start = false;
                i += 1;
            }
            '*' if at_expr_start => {
                out.push_str(r"\*");
                at_expr_start = false;
                i += 1;
            }
            '(' | ')' | '{' | '}' | '?' | '+' | '|' => {
                out.push('\\');
                out.push(c);
                at_expr_start = false;
                i += 1;
            }
            _ => {
                out.push(c);
                if c != '*' {
                    at_expr_start = false;
                }
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Copy a bracket expression starting at `chars[0] == '['` into `out`,
/// returning the number of characters consumed. A `]` directly after
/// the opening `[` (or after `[^`) is a member, and `[: :]`-style
/// classes may contain `]`. Backslashes are ordinary inside POSIX
/// brackets and are escaped for the `regex` crate. An unterminated
/// expression is copied as-is; compilation reports it.
fn copy_bracket_expression(chars: &[char], out: &mut String) -> usize {
    out.push('[');
    let mut i = 1;

    if chars.get(i) == Some(&'^') {
        out.push('^');
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        out.push_str(r"\]");
        i += 1;
    }

    while i < chars.len() {
        match chars[i] {
            ']' => {
                out.push(']');
                return i + 1;
            }
            '[' if matches!(chars.get(i + 1).copied(), Some(':' | '.' | '=')) => {
                let delim = chars[i + 1];
                out.push('[');
                out.push(delim);
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == delim && chars[i + 1] == ']') {
                    out.push(chars[i]);
                    i += 1;
                }
                if i + 1 < chars.len() {
                    out.push(delim);
                    out.push(']');
                    i += 2;
                }
            }
            '\\' => {
                out.push_str(r"\\");
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_password_prompt() {
        assert_eq!(
            translate(r"[Pp]assword: \{0,1\}$").unwrap(),
            r"[Pp]assword: {0,1}$"
        );
    }

    #[test]
    fn default_yesno_prompt() {
        assert_eq!(
            translate(r"(yes/no)? \{0,1\}$").unwrap(),
            r"\(yes/no\)\? {0,1}$"
        );
    }

    #[test]
    fn escaped_operators_become_active() {
        assert_eq!(translate(r"a\|b").unwrap(), "a|b");
        assert_eq!(translate(r"\(ab\)\{2\}").unwrap(), "(ab){2}");
        assert_eq!(translate(r"ab\?c\+").unwrap(), "ab?c+");
    }

    #[test]
    fn plain_operators_become_literals() {
        assert_eq!(translate("c++").unwrap(), r"c\+\+");
        assert_eq!(translate("a?b").unwrap(), r"a\?b");
        assert_eq!(translate("x|y").unwrap(), r"x\|y");
        assert_eq!(translate("f(x)").unwrap(), r"f\(x\)");
    }

    #[test]
    fn leading_star_is_literal() {
        assert_eq!(translate("*ab").unwrap(), r"\*ab");
        assert_eq!(translate(r"\(*a\)").unwrap(), r"(\*a)");
        assert_eq!(translate("a*b").unwrap(), "a*b");
    }

    #[test]
    fn anchors_only_at_the_edges() {
        assert_eq!(translate("^a$").unwrap(), "^a$");
        assert_eq!(translate("a^b").unwrap(), r"a\^b");
        assert_eq!(translate("a$b").unwrap(), r"a\$b");
        assert_eq!(translate(r"\(a$\)").unwrap(), "(a$)");
    }

    #[test]
    fn escaped_literals_stay_escaped() {
        assert_eq!(translate(r"1\.2").unwrap(), r"1\.2");
        assert_eq!(translate(r"a\\b").unwrap(), r"a\\b");
    }

    #[test]
    fn word_boundaries() {
        assert_eq!(translate(r"\<word\>").unwrap(), r"\bword\b");
    }

    #[test]
    fn bracket_expression_passes_through() {
        assert_eq!(translate("[a-z]+").unwrap(), r"[a-z]\+");
        assert_eq!(translate("[]x]").unwrap(), r"[\]x]");
        assert_eq!(translate("[^]a]").unwrap(), r"[^\]a]");
        assert_eq!(translate("[[:alpha:]]").unwrap(), "[[:alpha:]]");
        // `?` inside brackets is a member, not an operator.
        assert_eq!(translate("[?+]").unwrap(), "[?+]");
    }

    #[test]
    fn backrefs_rejected() {
        assert!(matches!(
            translate(r"\(a\)\1"),
            Err(PatternError::Backref('1'))
        ));
    }

    #[test]
    fn trailing_backslash_rejected() {
        assert!(matches!(
            translate("abc\\"),
            Err(PatternError::TrailingBackslash)
        ));
    }
}
