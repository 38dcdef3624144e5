use thiserror::Error;

use crate::{cache::CacheError, config::LoadError, infra::error::InfraError};

/// Failure of a binary command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("no live entry for key `{key}`")]
    Miss { key: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn miss(key: impl Into<String>) -> Self {
        Self::Miss { key: key.into() }
    }
}
