use std::io;

use thiserror::Error;

/// Rejected [`Config`](crate::Config) values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{option} must be greater than zero")]
    Zero { option: &'static str },
}

/// Errors that abort an aggregation run. No partial output is produced for any of them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("aggregation worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("work queue closed before the input was drained")]
    QueueClosed,
    #[error("aggregation cancelled")]
    Cancelled,
}
