//! Typed error hierarchy for dagsmith.
//!
//! One enum per subsystem:
//! - `EnqueueError`: ingestion queue hand-off failures
//! - `DefinitionError`: malformed or inconsistent pipeline definitions
//! - `GenerateError`: template selection and rendering failures
//! - `TreeError`: working-tree (git) operation failures
//! - `WorkflowError`: failures that abort one end-to-end workflow run
//!
//! A skipped event is not an error and is reported through
//! `workflow::WorkflowOutcome` instead. Nothing here is fatal to the
//! process; the consumer loop logs the failure and moves on.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the non-blocking enqueue surface.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("ingestion queue is at capacity")]
    QueueSaturated,

    #[error("ingestion queue consumer has shut down")]
    ConsumerGone,
}

/// Errors from parsing and validating a pipeline definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid pipeline YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate step name '{name}'")]
    DuplicateStep { name: String },

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
}

/// Errors from the definition-to-DAG transformation.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("no DAG template for pipeline version '{version}'")]
    TemplateNotFound { version: String },

    #[error("template {template} is not valid UTF-8")]
    TemplateEncoding { template: String },

    #[error("template {template} has unresolved placeholders: {placeholders:?}")]
    UnresolvedPlaceholders {
        template: String,
        placeholders: Vec<String>,
    },
}

/// Errors from the versioned working tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("file not found in working tree: {path}")]
    NotFound { path: PathBuf },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort one workflow run. Per-file generation failures are
/// isolated inside the run and never surface here.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{op} failed: {source}")]
    Tree {
        op: &'static str,
        #[source]
        source: TreeError,
    },

    #[error("failed to open pull request: {0}")]
    PullRequest(#[source] anyhow::Error),
}
