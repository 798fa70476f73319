use thiserror::Error;

#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("empty input")]
    Empty,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("string length {declared} exceeds remaining {available} bytes")]
    StringOverrun { declared: usize, available: usize },

    #[error("unterminated {0}")]
    Unterminated(&'static str),

    #[error("dictionary key is not a byte string")]
    NonStringKey,

    #[error("unexpected character: {0}")]
    UnexpectedChar(char),

    #[error("trailing data after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
