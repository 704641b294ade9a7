//! Operator commands read from stdin.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sleep,
    Resume,
    /// Select a feed by name and switch to it.
    Feed(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Err(ParseCommandError("empty command".to_string()));
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "sleep" | "pause" => Self::Sleep,
            "resume" => Self::Resume,
            "feed" => match parts.next() {
                Some(name) => Self::Feed(name.to_string()),
                None => return Err(ParseCommandError("usage: feed <name>".to_string())),
            },
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseCommandError(format!("unknown command: {other}"))),
        };

        if parts.next().is_some() {
            return Err(ParseCommandError(format!("too many arguments for {word}")));
        }
        Ok(command)
    }
}

pub const HELP: &str = "commands: sleep | resume | feed <name> | status | quit";
