//! Error types for queue domain rules

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Queue entry {0} is not active in this queue")]
    UnknownEntry(Uuid),

    #[error("Queue entry {0} is listed more than once")]
    DuplicateEntry(Uuid),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Invalid value '{value}' for {kind}")]
    InvalidEnum { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
