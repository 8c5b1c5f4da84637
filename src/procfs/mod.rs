//! MetricsSource implementation for Linux, backed by the /proc filesystem

use thiserror::Error;

pub mod parsers;
pub mod source;

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("File content has an unexpected format: missing field {0}")]
    UnexpectedFormat(usize),
    #[error("Could not parse token {0:?}")]
    InvalidToken(String),
}
