use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::store::StoreError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Chunk store error: {0}")]
    Store(#[from] StoreError),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
