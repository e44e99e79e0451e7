use thiserror::Error;

/// Domain validation failures surfaced to the CLI.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BolaoError {
    #[error("invalid dezena '{0}': expected a number between 01 and 60")]
    InvalidDezena(String),

    #[error("a game must have between {min} and {max} dezenas, got {got}")]
    GameSize { min: usize, max: usize, got: usize },

    #[error("dezena {0} appears more than once")]
    DuplicateDezena(String),

    #[error("a draw must have exactly 6 distinct dezenas, got {0}")]
    DrawSize(usize),

    #[error("draw number must be positive")]
    InvalidDrawNumber,

    #[error("pool '{0}' not found")]
    PoolNotFound(String),

    #[error("edit token does not match pool '{0}'")]
    WrongEditToken(String),

    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("verification token is unknown or already used")]
    UnknownVerificationToken,
}
