//! The versioned working tree: one local checkout, mutated serially.
//!
//! `VersionedTree` is the seam between the workflow orchestrator and raw
//! version control. The git2-backed `GitWorkingTree` implements it against
//! a single clone that is created (or opened and fast-forwarded) at
//! startup. The orchestrator's single-consumer design guarantees no two
//! operations run concurrently; the internal mutex only satisfies `Sync`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{BranchType, Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use tracing::{debug, info};

use crate::errors::TreeError;

/// Identity used for generated commits.
pub const BOT_NAME: &str = "dagsmith-bot";
pub const BOT_EMAIL: &str = "dagsmith@users.noreply.github.com";

/// HTTPS credentials for the remote.
#[derive(Debug, Clone)]
pub struct GitAuth {
    pub username: String,
    pub token: String,
}

/// Operations the orchestrator needs from a working checkout.
#[async_trait]
pub trait VersionedTree: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, TreeError>;
    /// Create a branch at the current HEAD without switching to it.
    async fn create_branch(&self, name: &str) -> Result<(), TreeError>;
    async fn switch_branch(&self, name: &str) -> Result<(), TreeError>;
    /// Write file content (creating parent directories) and stage it.
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), TreeError>;
    /// Commit everything staged as the bot identity and push the current
    /// branch to the remote.
    async fn commit_and_push(&self, message: &str) -> Result<(), TreeError>;
    async fn switch_to_default(&self) -> Result<(), TreeError>;
    async fn delete_branch(&self, name: &str) -> Result<(), TreeError>;
}

struct TreeInner {
    repo: Repository,
    workdir: PathBuf,
}

pub struct GitWorkingTree {
    inner: Mutex<TreeInner>,
    default_branch: String,
    auth: GitAuth,
}

impl GitWorkingTree {
    /// Clone the repository single-branch if `workdir` does not exist yet,
    /// otherwise open it and fast-forward the default branch.
    pub fn open_or_clone(
        remote_url: &str,
        default_branch: &str,
        workdir: &Path,
        auth: GitAuth,
    ) -> Result<Self> {
        let repo = if workdir.exists() {
            info!(path = %workdir.display(), "opening existing checkout");
            let repo = Repository::open(workdir)
                .with_context(|| format!("failed to open repository at {}", workdir.display()))?;
            fast_forward(&repo, default_branch, &auth)
                .with_context(|| format!("failed to update branch {default_branch}"))?;
            repo
        } else {
            info!(url = remote_url, path = %workdir.display(), "cloning repository");
            let mut fetch = FetchOptions::new();
            fetch.remote_callbacks(credential_callbacks(&auth));
            RepoBuilder::new()
                .branch(default_branch)
                .fetch_options(fetch)
                .clone(remote_url, workdir)
                .with_context(|| format!("failed to clone {remote_url}"))?
        };

        Ok(Self {
            inner: Mutex::new(TreeInner {
                repo,
                workdir: workdir.to_path_buf(),
            }),
            default_branch: default_branch.to_string(),
            auth,
        })
    }

    /// Open an existing checkout without touching the remote. Used by
    /// tests and local tooling that never push.
    pub fn open(workdir: &Path, default_branch: &str, auth: GitAuth) -> Result<Self> {
        let repo = Repository::open(workdir)
            .with_context(|| format!("failed to open repository at {}", workdir.display()))?;
        Ok(Self {
            inner: Mutex::new(TreeInner {
                repo,
                workdir: workdir.to_path_buf(),
            }),
            default_branch: default_branch.to_string(),
            auth,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TreeInner> {
        // Single-consumer discipline means the lock is never contended;
        // poisoning would require a panic inside a tree operation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn credential_callbacks(auth: &GitAuth) -> RemoteCallbacks<'static> {
    let (username, token) = (auth.username.clone(), auth.token.clone());
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed| {
        Cred::userpass_plaintext(&username, &token)
    });
    callbacks
}

/// Fetch `branch` from origin and fast-forward the local branch to it.
/// A diverged local branch is left alone; the checkout is bot-owned and
/// only ever moves forward.
fn fast_forward(repo: &Repository, branch: &str, auth: &GitAuth) -> Result<(), git2::Error> {
    let mut remote = repo.find_remote("origin")?;
    let mut options = FetchOptions::new();
    options.remote_callbacks(credential_callbacks(auth));
    remote.fetch(&[branch], Some(&mut options), None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;
    if analysis.is_up_to_date() {
        debug!(branch, "checkout already up to date");
        return Ok(());
    }
    if analysis.is_fast_forward() {
        let refname = format!("refs/heads/{branch}");
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(fetch_commit.id(), "fast-forward")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
        debug!(branch, "fast-forwarded to remote tip");
    }
    Ok(())
}

fn checkout(repo: &Repository, branch: &str) -> Result<(), git2::Error> {
    let refname = format!("refs/heads/{branch}");
    let object = repo.revparse_single(&refname)?;
    repo.checkout_tree(&object, Some(CheckoutBuilder::default().safe()))?;
    repo.set_head(&refname)
}

#[async_trait]
impl VersionedTree for GitWorkingTree {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, TreeError> {
        let inner = self.lock();
        let full_path = inner.workdir.join(path);
        match std::fs::read(&full_path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(TreeError::NotFound {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(TreeError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
        }
    }

    async fn create_branch(&self, name: &str) -> Result<(), TreeError> {
        let inner = self.lock();
        let head = inner.repo.head()?.peel_to_commit()?;
        inner.repo.branch(name, &head, false)?;
        debug!(branch = name, "created branch at HEAD");
        Ok(())
    }

    async fn switch_branch(&self, name: &str) -> Result<(), TreeError> {
        let inner = self.lock();
        checkout(&inner.repo, name)?;
        Ok(())
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), TreeError> {
        let inner = self.lock();
        let full_path = inner.workdir.join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TreeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&full_path, content).map_err(|source| TreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut index = inner.repo.index()?;
        index.add_path(path)?;
        index.write()?;
        debug!(path = %path.display(), bytes = content.len(), "wrote and staged file");
        Ok(())
    }

    async fn commit_and_push(&self, message: &str) -> Result<(), TreeError> {
        let inner = self.lock();

        let mut index = inner.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = inner.repo.find_tree(tree_id)?;
        let signature = Signature::now(BOT_NAME, BOT_EMAIL)?;
        let parent = inner.repo.head()?.peel_to_commit()?;
        inner
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])?;

        let head = inner.repo.head()?;
        let branch = head.shorthand().unwrap_or(&self.default_branch).to_string();
        drop(head);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut options = PushOptions::new();
        options.remote_callbacks(credential_callbacks(&self.auth));
        inner
            .repo
            .find_remote("origin")?
            .push(&[refspec.as_str()], Some(&mut options))?;
        info!(%branch, "committed and pushed");
        Ok(())
    }

    async fn switch_to_default(&self) -> Result<(), TreeError> {
        let inner = self.lock();
        checkout(&inner.repo, &self.default_branch)?;
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<(), TreeError> {
        let inner = self.lock();
        inner.repo.find_branch(name, BranchType::Local)?.delete()?;
        debug!(branch = name, "deleted branch");
        Ok(())
    }
}
