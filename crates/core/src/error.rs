use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    /// Model output could not be parsed into an action, or the model call
    /// itself failed. Fatal to the session; never retried.
    #[error("Decision error: {0}")]
    Decision(String),

    #[error("Browser error: {0}")]
    Browser(String),

    /// An action executed against the page failed (selector not found,
    /// click intercepted, assertion failed). Recorded as a failed step.
    #[error("Action error: {0}")]
    Action(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
