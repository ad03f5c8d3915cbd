//! Error types for appraise-rs.

use thiserror::Error;

use crate::model::{BatchId, State};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: State, to: State },

    #[error("batch {0} is not valid and ready for activation")]
    BatchNotReady(BatchId),

    #[error("batch construction failed: {0}")]
    Batch(String),

    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
