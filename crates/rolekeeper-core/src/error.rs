//! Rolekeeper error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RolekeeperError>;

#[derive(Error, Debug)]
pub enum RolekeeperError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Rule error: {0}")]
    Rules(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Translation error: {0}")]
    Translate(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
