use thiserror::Error;

pub type ParserResult<T> = Result<T, ParserError>;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Parsing failed: {0}")]
    ParsingFailed(String),

    #[error("Unterminated tool call block")]
    Unterminated,

    #[error("Tool call is missing a function name")]
    MissingName,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}
