// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid poll state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown poll state: {0}")]
    UnknownState(String),

    #[error("Unknown polling frequency: {0}")]
    UnknownFrequency(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
