//! Crate-wide error aggregation.
//!
//! Every subsystem defines its own `thiserror` enum scoped to its domain
//! (see `cache::CacheError`, `canonical::CanonError`, `worker::ExecutorError`,
//! `document::DocumentError`, `upload::UploadError`, `batch::BatchError`,
//! `scheduler::SchedulerError`). `CoreError` aggregates them for call sites
//! that cross subsystem boundaries, and carries the machine-readable code
//! every public entry point must expose.

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::canonical::CanonError;
use crate::document::DocumentError;
use crate::scheduler::SchedulerError;
use crate::upload::UploadError;
use crate::worker::ExecutorError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Error kind, used to decide retry/circuit-breaker policy per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UserInput,
    Transient,
    Resource,
    Fatal,
}

impl CoreError {
    /// Machine-readable code, stable across releases; never a localized string.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Cache(e) => e.code(),
            CoreError::Canon(e) => e.code(),
            CoreError::Document(e) => e.code(),
            CoreError::Executor(e) => e.code(),
            CoreError::Upload(e) => e.code(),
            CoreError::Scheduler(_) => "scheduler_error",
            CoreError::Config(_) => "config_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Cache(e) => e.kind(),
            CoreError::Canon(_) => ErrorKind::UserInput,
            CoreError::Document(e) => e.kind(),
            CoreError::Executor(e) => e.kind(),
            CoreError::Upload(_) => ErrorKind::UserInput,
            CoreError::Scheduler(_) => ErrorKind::Transient,
            CoreError::Config(_) => ErrorKind::Fatal,
        }
    }

    /// Maps to the exit codes in §6 for a CLI surface: `0 ok`, `1 validation`,
    /// `2 license`, `3 resource`, `4 timeout`, `5 internal`.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            "license_restriction" => 2,
            "timeout_exceeded" => 4,
            _ => match self.kind() {
                ErrorKind::UserInput => 1,
                ErrorKind::Resource => 3,
                ErrorKind::Transient => 5,
                ErrorKind::Fatal => 5,
            },
        }
    }
}

/// The single shape every public boundary returns on failure. No exception
/// type ever crosses a boundary; this is the only thing callers see.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
            details: serde_json::Value::Null,
        }
    }
}
