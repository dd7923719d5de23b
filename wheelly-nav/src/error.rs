//! Error types for the session runner.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NavError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("robot error: {0}")]
    Robot(#[from] wheelly_io::Error),

    #[error("agent error: {0}")]
    Agent(#[from] wheelly_rl::Error),
}

pub type Result<T> = std::result::Result<T, NavError>;
