//! The per-event workflow: branch lifecycle, generation, commit, PR.
//!
//! One `Orchestrator::process` call drives a single trigger event end to
//! end: filter, branch creation, per-file generation, commit and push,
//! pull request, cleanup. The ingestion queue's single consumer invokes it
//! serially, which is the sole concurrency control over the shared
//! working tree.
//!
//! Failure handling follows three rules: per-file generation failures are
//! logged and skipped without aborting the batch; any tree or PR failure
//! after branch creation triggers cleanup and aborts the run; cleanup
//! failures are logged and never mask the primary outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, info, warn};

use crate::definition;
use crate::errors::WorkflowError;
use crate::generate::DagGenerator;
use crate::git::VersionedTree;
use crate::github::{PullRequestIssuer, PullRequestSpec};

/// Repository prefix under which pipeline definitions live.
pub const DEFINITIONS_ROOT: &str = "pipelines/";

/// Repository prefix under which generated DAGs are written.
pub const OUTPUT_ROOT: &str = "airflow-dags/";

pub const BRANCH_PREFIX: &str = "dag-update-";
const BRANCH_SUFFIX_LEN: usize = 5;

pub const COMMIT_MESSAGE: &str = "Automated DAG generation";
pub const PR_TITLE: &str = "Automated DAG generation";
pub const PR_BODY: &str =
    "This pull request was opened automatically to add Airflow DAGs generated \
     from changed pipeline definitions.";

/// An inbound push notification, decoded by the webhook boundary.
/// Consumed exactly once; never persisted.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Full ref, e.g. `refs/heads/main`.
    pub ref_name: String,
    pub owner: String,
    pub repo: String,
    pub clone_url: String,
    pub head_commit_id: String,
    pub head_commit_message: String,
    /// Paths touched by the head commit (modified and added).
    pub changed_paths: Vec<String>,
}

/// Why an event was intentionally not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The push was not to the default branch.
    NonDefaultRef,
    /// No changed path lies under the definitions root.
    NoDefinitionChanges,
    /// Every changed definition failed generation; nothing to commit.
    NothingGenerated,
}

/// Terminal result of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Skipped(SkipReason),
    Completed {
        branch: String,
        pr_number: i64,
        pr_url: String,
        generated: usize,
        skipped: usize,
    },
}

pub struct Orchestrator {
    tree: Arc<dyn VersionedTree>,
    issuer: Arc<dyn PullRequestIssuer>,
    generator: DagGenerator,
    default_branch: String,
}

impl Orchestrator {
    pub fn new(
        tree: Arc<dyn VersionedTree>,
        issuer: Arc<dyn PullRequestIssuer>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            issuer,
            generator: DagGenerator::new(),
            default_branch: default_branch.into(),
        }
    }

    /// Drive one event through the full branch lifecycle.
    pub async fn process(&self, event: TriggerEvent) -> Result<WorkflowOutcome, WorkflowError> {
        let default_ref = format!("refs/heads/{}", self.default_branch);
        if event.ref_name != default_ref {
            info!(ref_name = %event.ref_name, "ignoring push to non-default ref");
            return Ok(WorkflowOutcome::Skipped(SkipReason::NonDefaultRef));
        }

        let definitions: Vec<&str> = event
            .changed_paths
            .iter()
            .map(String::as_str)
            .filter(|path| path.starts_with(DEFINITIONS_ROOT))
            .collect();
        if definitions.is_empty() {
            info!(commit = %event.head_commit_id, "no pipeline definitions changed");
            return Ok(WorkflowOutcome::Skipped(SkipReason::NoDefinitionChanges));
        }

        let branch = new_branch_name();
        info!(%branch, files = definitions.len(), "starting DAG generation run");

        // Nothing to clean up if branch creation itself fails.
        self.tree
            .create_branch(&branch)
            .await
            .map_err(|source| WorkflowError::Tree {
                op: "create branch",
                source,
            })?;
        if let Err(source) = self.tree.switch_branch(&branch).await {
            self.cleanup(&branch).await;
            return Err(WorkflowError::Tree {
                op: "switch branch",
                source,
            });
        }

        let mut generated = 0usize;
        let mut skipped = 0usize;
        for &path in &definitions {
            match self.generate_one(path).await {
                Ok(target) => {
                    debug!(source = path, target = %target.display(), "generated DAG");
                    generated += 1;
                }
                Err(err) => {
                    warn!(source = path, error = ?err, "skipping definition");
                    skipped += 1;
                }
            }
        }

        if generated == 0 {
            // Policy: an empty commit has no reviewable content, so a run
            // in which every file failed is a skip, not an empty PR.
            warn!(%branch, skipped, "no DAGs generated; abandoning branch");
            self.cleanup(&branch).await;
            return Ok(WorkflowOutcome::Skipped(SkipReason::NothingGenerated));
        }

        if let Err(source) = self.tree.commit_and_push(COMMIT_MESSAGE).await {
            self.cleanup(&branch).await;
            return Err(WorkflowError::Tree {
                op: "commit and push",
                source,
            });
        }

        let spec = PullRequestSpec {
            owner: event.owner.clone(),
            repo: event.repo.clone(),
            title: PR_TITLE.to_string(),
            head: branch.clone(),
            base: self.default_branch.clone(),
            body: PR_BODY.to_string(),
        };
        let pr = match self.issuer.create_pull_request(&spec).await {
            Ok(pr) => pr,
            Err(err) => {
                self.cleanup(&branch).await;
                return Err(WorkflowError::PullRequest(err));
            }
        };

        self.cleanup(&branch).await;
        info!(%branch, pr = pr.number, generated, skipped, "workflow complete");
        Ok(WorkflowOutcome::Completed {
            branch,
            pr_number: pr.number,
            pr_url: pr.html_url,
            generated,
            skipped,
        })
    }

    /// Read, parse, render, and write back a single definition.
    async fn generate_one(&self, source_path: &str) -> anyhow::Result<PathBuf> {
        let raw = self
            .tree
            .read_file(Path::new(source_path))
            .await
            .context("failed to read definition")?;
        let file = definition::parse(&raw)?;
        let artifact = self
            .generator
            .generate(&file.pipeline, output_path(source_path))?;
        self.tree
            .write_file(&artifact.path, &artifact.content)
            .await
            .context("failed to write generated DAG")?;
        Ok(artifact.path)
    }

    /// Best-effort return to the default branch and removal of the working
    /// branch. Runs exactly once on every terminal path after branch
    /// creation; failures are logged and never escalated.
    async fn cleanup(&self, branch: &str) {
        if let Err(err) = self.tree.switch_to_default().await {
            warn!(%branch, error = ?err, "cleanup: failed to switch to default branch");
        }
        if let Err(err) = self.tree.delete_branch(branch).await {
            warn!(%branch, error = ?err, "cleanup: failed to delete working branch");
        }
    }
}

/// Deterministic output location: strip the definitions root, re-root
/// under the output root, and swap the extension for `.py`.
pub fn output_path(definition_path: &str) -> PathBuf {
    let relative = definition_path
        .strip_prefix(DEFINITIONS_ROOT)
        .unwrap_or(definition_path);
    let mut path = PathBuf::from(OUTPUT_ROOT).join(relative);
    path.set_extension("py");
    path
}

/// Branch name with a 5-character random alphanumeric suffix drawn from a
/// cryptographically seeded generator; collisions between runs are
/// vanishingly unlikely.
pub fn new_branch_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(BRANCH_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{BRANCH_PREFIX}{suffix}")
}
