//! Control text protocol: registration commands and listing
//!
//! The write side accepts one ASCII command per line: `R <pid>` registers a
//! process, `U <pid>` unregisters it. The read side (an empty line) returns
//! the registered PIDs, one decimal per line. Malformed input is rejected
//! without touching the registry.

use std::str::FromStr;

use thiserror::Error;

use crate::core::registry::Pid;

pub mod endpoint;
pub mod handler;

/// Maximum accepted length of a command line, in bytes
pub const MAX_LINE_BYTES: usize = 128;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("Command line exceeds the {MAX_LINE_BYTES} bytes limit")]
    OversizedLine,
    #[error("Empty command")]
    EmptyCommand,
    #[error("Unknown command verb: {0:?}")]
    UnknownVerb(String),
    #[error("Missing process identifier")]
    MissingPid,
    #[error("Invalid process identifier: {0:?}")]
    InvalidPid(String),
}

/// A parsed control command
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum Command {
    Register(Pid),
    Unregister(Pid),
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Error> {
        if line.len() > MAX_LINE_BYTES {
            return Err(Error::OversizedLine);
        }

        let mut tokens = line.split_whitespace();

        let verb = tokens.next().ok_or(Error::EmptyCommand)?;
        let pid_token = tokens.next().ok_or(Error::MissingPid)?;

        let pid: Pid = pid_token
            .parse()
            .map_err(|_| Error::InvalidPid(pid_token.to_string()))?;

        match verb {
            "R" => Ok(Command::Register(pid)),
            "U" => Ok(Command::Unregister(pid)),
            other => Err(Error::UnknownVerb(other.to_string())),
        }
    }
}
