pub mod bench;
pub mod context;
pub mod core;
pub mod engine;
pub mod perms_cmd;
pub mod run_cmd;
pub mod show_cmd;
pub mod stats;
pub mod storage;

use std::path::PathBuf;

use thiserror::Error;

pub use crate::context::RunContext;
pub use crate::engine::template::TemplateError;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("{0}")]
    Message(String),
    /// A declared executable could not be located before execution started.
    #[error("required executable not found: {0}")]
    MissingExecutable(String),
    /// The requested result file does not exist.
    #[error("result file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// The result file exists but cannot be decoded into a store.
    #[error("corrupt result file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type BenchResult<T> = Result<T, BenchError>;

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha256::digest;
    digest(bytes)
}

/// RFC 3339 timestamp for "now" in UTC.
pub fn now_string() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
