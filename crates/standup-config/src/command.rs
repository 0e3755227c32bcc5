//! Shell-like splitting of launch commands held in configuration values.

use thiserror::Error;

/// Reasons a command line could not be split into words.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandSplitError {
    /// A quote was opened but never closed.
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    /// The line ended in a lone backslash.
    #[error("trailing backslash")]
    TrailingEscape,
}

/// Splits `line` into words using POSIX-shell-like quoting.
///
/// Single quotes preserve their content literally. Double quotes allow `\"`
/// and `\\` escapes. Outside quotes a backslash escapes the next character.
/// No expansion of any kind is performed.
pub fn split_command(line: &str) -> Result<Vec<String>, CommandSplitError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(CommandSplitError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(CommandSplitError::UnterminatedQuote('"')),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(CommandSplitError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next().ok_or(CommandSplitError::TrailingEscape)?);
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("npm run dev -w backend", &["npm", "run", "dev", "-w", "backend"])]
    #[case::extra_spaces("  sleep   30 ", &["sleep", "30"])]
    #[case::single_quotes("sh -c 'exec sleep 30'", &["sh", "-c", "exec sleep 30"])]
    #[case::double_quotes(r#"echo "a \"b\" c""#, &["echo", r#"a "b" c"#])]
    #[case::empty_quotes("run ''", &["run", ""])]
    #[case::escaped_space(r"ls my\ dir", &["ls", "my dir"])]
    #[case::blank("", &[])]
    fn splits_words(#[case] line: &str, #[case] expected: &[&str]) {
        let words = split_command(line).expect("split succeeds");
        assert_eq!(words, expected);
    }

    #[rstest]
    #[case::single("echo 'open", CommandSplitError::UnterminatedQuote('\''))]
    #[case::double("echo \"open", CommandSplitError::UnterminatedQuote('"'))]
    #[case::escape("echo \\", CommandSplitError::TrailingEscape)]
    fn rejects_broken_quoting(#[case] line: &str, #[case] expected: CommandSplitError) {
        assert_eq!(split_command(line), Err(expected));
    }
}
