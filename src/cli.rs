//! CLI utilities for the search client.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::command::{Command, CommandError};

#[derive(Debug, Error)]
pub enum PromptError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("prompt io error: {0}")]
    Io(#[from] io::Error),
}

/// Prompts the user for one command. End of input reads as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, PromptError>
where
    R: BufRead,
    W: Write,
{
    write!(&mut writer, "> ")?;
    writer.flush()?;

    let mut s = String::default();
    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    Ok(s.as_str().try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_queries() {
        let input = b"quarterly budget\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Query("quarterly budget".into()), res);
    }

    #[test]
    fn end_of_input_exits() {
        let mut output = Vec::new();
        assert_eq!(prompt(&b""[..], &mut output).unwrap(), Command::Exit);
    }

    #[test]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        let err = prompt(&input[..], &mut output).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized command '.something_wrong'");
    }
}
