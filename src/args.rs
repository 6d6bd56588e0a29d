//! Command invocation: argument normalization and process options.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Arguments of a command, either already split or as one shell-syntax line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArgs {
    /// A single string, tokenized with shell word-splitting rules.
    Line(String),
    /// An argument vector used as-is.
    Argv(Vec<String>),
}

impl CommandArgs {
    /// Normalize into an argument vector.
    pub fn normalize(&self) -> Result<Vec<String>, SplitError> {
        match self {
            CommandArgs::Line(line) => split(line),
            CommandArgs::Argv(argv) => Ok(argv.clone()),
        }
    }
}

impl From<&str> for CommandArgs {
    fn from(line: &str) -> Self {
        CommandArgs::Line(line.to_string())
    }
}

impl From<String> for CommandArgs {
    fn from(line: String) -> Self {
        CommandArgs::Line(line)
    }
}

impl From<Vec<String>> for CommandArgs {
    fn from(argv: Vec<String>) -> Self {
        CommandArgs::Argv(argv)
    }
}

impl From<Vec<&str>> for CommandArgs {
    fn from(argv: Vec<&str>) -> Self {
        CommandArgs::Argv(argv.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandArgs {
    fn from(argv: [&str; N]) -> Self {
        CommandArgs::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// Options applied when spawning the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Working directory of the child.
    pub cwd: Option<PathBuf>,
    /// Environment variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Run through `sh -c` instead of executing the program directly.
    pub shell: bool,
    /// Keep the child in the caller's process group, so terminal signals
    /// and terminal input reach it. Otherwise it leads a group of its own,
    /// and an abandoned run kills that whole group.
    pub foreground: bool,
}

/// Tokenizer failure on a shell-syntax line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    UnterminatedQuote { quote: char },
    TrailingEscape,
}

impl std::fmt::Display for SplitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitError::UnterminatedQuote { quote } => {
                write!(f, "unterminated {quote} quote")
            }
            SplitError::TrailingEscape => write!(f, "trailing backslash escape"),
        }
    }
}

impl std::error::Error for SplitError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split a line into words using POSIX shell quoting rules.
///
/// Single quotes preserve everything literally. Inside double quotes a
/// backslash only escapes `"` and `\`; before any other character it is
/// kept. Outside quotes a backslash escapes any character. No expansion
/// is performed.
pub fn split(line: &str) -> Result<Vec<String>, SplitError> {
    let mut words = Vec::new();
    let mut word = String::new();
    // A quoted empty string ("") still yields a word.
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Quote::Single => {
                if ch == '\'' {
                    quote = Quote::None;
                } else {
                    word.push(ch);
                }
            }
            Quote::Double => match ch {
                '"' => quote = Quote::None,
                '\\' => match chars.peek() {
                    Some(&next) if matches!(next, '"' | '\\') => {
                        chars.next();
                        word.push(next);
                    }
                    Some(_) => word.push('\\'),
                    None => return Err(SplitError::UnterminatedQuote { quote: '"' }),
                },
                _ => word.push(ch),
            },
            Quote::None => match ch {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => match chars.next() {
                    Some('\n') => {}
                    Some(next) => {
                        word.push(next);
                        in_word = true;
                    }
                    None => return Err(SplitError::TrailingEscape),
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                c => {
                    word.push(c);
                    in_word = true;
                }
            },
        }
    }

    match quote {
        Quote::Single => Err(SplitError::UnterminatedQuote { quote: '\'' }),
        Quote::Double => Err(SplitError::UnterminatedQuote { quote: '"' }),
        Quote::None => {
            if in_word {
                words.push(word);
            }
            Ok(words)
        }
    }
}
