//! Typed error hierarchy for the foreman orchestrator.
//!
//! Four top-level enums cover the subsystem seams:
//! - `PlanError` — backlog manifest and dependency-graph validation
//! - `GatewayError` — transport failures while driving the agent CLI
//! - `VerdictError` — reviewer output that yields no usable verdict
//! - `StageError` — bug/feedback stage result files that cannot be read

use thiserror::Error;

use crate::roles::AttemptRole;

/// Errors from backlog loading and dependency ordering.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read backlog manifest at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Manifest {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate work item id in backlog: {id}")]
    DuplicateId { id: String },

    #[error("Backlog items are not in chronological order. Expected sequential ids [{expected}] but found [{found}]")]
    OutOfSequence { expected: String, found: String },

    #[error("Work item {item} depends on unknown item {dependency}")]
    UnknownDependency { item: String, dependency: String },

    #[error("Cyclic dependencies detected in backlog: {}", .unresolved.join(", "))]
    Cycle { unresolved: Vec<String> },
}

/// Transport-level failures from the executor gateway. Every variant is
/// retryable under the invoking tier's budget and discards the session.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to spawn agent command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write prompt to agent stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("Failed to write transcript at {path}: {source}")]
    Transcript {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write reply file at {path}: {source}")]
    Reply {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for agent process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Agent run '{label}' exited with non-zero code {code}")]
    Exit { label: String, code: i32 },
}

/// Reviewer output that produced no usable verdict. The gateway itself
/// succeeded, so callers keep the session token when retrying.
#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("{role} output is not valid JSON. Preview: {preview}")]
    NotJson {
        role: AttemptRole,
        path: std::path::PathBuf,
        preview: String,
    },

    #[error("{role} verdict is missing a status field")]
    MissingStatus {
        role: AttemptRole,
        path: std::path::PathBuf,
    },

    #[error("{role} verdict has unrecognized status '{status}'")]
    BadStatus {
        role: AttemptRole,
        path: std::path::PathBuf,
        status: String,
    },
}

impl VerdictError {
    /// Location of the raw output that failed to parse, for diagnostics.
    pub fn raw_path(&self) -> &std::path::Path {
        match self {
            VerdictError::NotJson { path, .. }
            | VerdictError::MissingStatus { path, .. }
            | VerdictError::BadStatus { path, .. } => path,
        }
    }
}

/// Stage result files the pipeline controller could not consume.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Expected result file for stage '{stage}' is missing at {path}")]
    MissingResult {
        stage: String,
        path: std::path::PathBuf,
    },

    #[error("Stage result file {path} is not valid JSON")]
    InvalidResult { path: std::path::PathBuf },
}
