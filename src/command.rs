//! Commands typed at the client prompt.
//!
//! Lines starting with `.` are client commands; anything else is a free-text
//! query. The query text is not compiled into a full restriction tree: it
//! becomes a single content restriction on the file name.
//!
//! # Example
//! ```rust
//! use wsp::Command;
//!
//! let cmd: Command = ".fetch 20".try_into().unwrap();
//! assert_eq!(cmd, Command::Fetch(20));
//! ```
use thiserror::Error;

use crate::{props, restriction::Restriction};

/// Rows fetched by `.fetch` without an argument.
pub const DEFAULT_FETCH: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `.exit`: disconnect and leave.
    Exit,
    /// `.connect [CATALOG]`
    Connect(Option<String>),
    /// `.scope URL`: scope used by later queries.
    Scope(String),
    /// Free text to search for.
    Query(String),
    /// `.fetch [N]`: next N rows of the current query.
    Fetch(u32),
    /// `.status`
    Status,
}

impl Command {
    /// Restriction a free-text query stands for.
    pub fn restriction(phrase: &str) -> Restriction {
        Restriction::Content {
            property: props::FILE_NAME,
            phrase: phrase.to_owned(),
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let s = s.trim();
        let (head, rest) = match s.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (s, ""),
        };

        match head {
            "" => Err(CommandError::Empty),
            ".exit" => Ok(Command::Exit),
            ".status" => Ok(Command::Status),
            ".connect" if rest.is_empty() => Ok(Command::Connect(None)),
            ".connect" => Ok(Command::Connect(Some(rest.to_owned()))),
            ".scope" if rest.is_empty() => Err(CommandError::InvalidCommandArguments {
                command: ".scope".into(),
                reason: "requires a scope url. Example: .scope file://host/share".into(),
            }),
            ".scope" => Ok(Command::Scope(rest.to_owned())),
            ".fetch" if rest.is_empty() => Ok(Command::Fetch(DEFAULT_FETCH)),
            ".fetch" => rest
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .map(Command::Fetch)
                .ok_or_else(|| CommandError::InvalidCommandArguments {
                    command: ".fetch".into(),
                    reason: "argument should be a positive number of rows".into(),
                }),
            head if head.starts_with('.') => Err(CommandError::UnrecognizedCommand(head.into())),
            _ => Ok(Command::Query(s.to_owned())),
        }
    }
}
