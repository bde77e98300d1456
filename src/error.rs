//! Error types surfaced by the parser, the spawn path, and the CLI.

use thiserror::Error;

/// Ill-formed command-spec string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid delay '{fragment}' at byte {offset}")]
    InvalidDelay { fragment: String, offset: usize },

    #[error("invalid color '{fragment}' at byte {offset}")]
    InvalidColor { fragment: String, offset: usize },

    #[error("unterminated group starting at byte {offset}")]
    UnterminatedGroup { offset: usize },

    #[error("malformed prefix '{fragment}' at byte {offset}")]
    MalformedPrefix { fragment: String, offset: usize },

    #[error("empty command line")]
    EmptyCommand,
}

/// Top-level error for the binary; wraps everything `main` needs to turn
/// into a message plus an exit code.
#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error("failed to parse command spec: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
