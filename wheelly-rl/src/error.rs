//! Error types for the learner.
//!
//! Shape and model-load errors are fatal at agent creation; numeric
//! failures abort the current mini-batch and the session continues.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("network shape mismatch: {0}")]
    Shape(String),

    #[error("corrupted model file: {0}")]
    ModelCorrupt(String),

    #[error("numeric failure: {0}")]
    Numeric(String),

    #[error("invalid spec: {0}")]
    Spec(String),
}

pub type Result<T> = std::result::Result<T, Error>;
