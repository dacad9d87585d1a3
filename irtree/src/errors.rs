//! Error types for spatial-keyword index operations.

use std::io;
use thiserror::Error;

use crate::storage::PageId;

/// Errors that can occur in index operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid shape: {0}")]
    Shape(String),

    #[error("invalid page: {0}")]
    InvalidPage(PageId),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("document {0} not found in document store")]
    MissingDocument(u64),

    #[error("no cluster assignment for document {0}")]
    MissingCluster(u64),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Configuration error with a formatted message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Shape error with a formatted message.
    pub fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, Error>;
