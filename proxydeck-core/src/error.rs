use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxydeckError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Proxy backend error: {0}")]
    Backend(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxydeckError>;
