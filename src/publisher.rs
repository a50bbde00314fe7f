//! Repository publisher.
//!
//! Round 1 creates (or reuses) the task's repository, commits the generated
//! files and turns on Pages. Round 2 locates the same repository and commits
//! the revision over it. The repository name is derived from the task id, so
//! the hosting provider is the only record of which repositories exist.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::error::TaskError;
use crate::generator::GeneratedFileSet;
use crate::github::{CreateOutcome, HostError, PagesStatus, RemoteRepo, RepositoryHost};
use crate::retry::RetryPolicy;
use crate::util::slugify;

/// Upper bound for a single prior file handed back to the generator.
const MAX_PRIOR_FILE_BYTES: usize = 200_000;

/// Where a task's application lives.
///
/// # Invariants
/// - `name == prefix + slugify(task)`
/// - `pages_url == https://<owner lowercase>.github.io/<name>/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRef {
    pub task: String,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub repo_url: String,
    pub pages_url: String,
    /// Head commit after the last publish; `None` right after locate
    pub commit_sha: Option<String>,
}

impl RepositoryRef {
    fn from_remote(task: &str, repo: RemoteRepo) -> Self {
        Self {
            task: task.to_string(),
            pages_url: repo.pages_url(),
            owner: repo.owner,
            name: repo.name,
            default_branch: repo.default_branch,
            repo_url: repo.html_url,
            commit_sha: None,
        }
    }

    pub fn remote(&self) -> RemoteRepo {
        RemoteRepo {
            owner: self.owner.clone(),
            name: self.name.clone(),
            default_branch: self.default_branch.clone(),
            html_url: self.repo_url.clone(),
        }
    }
}

fn publish_error(error: HostError) -> TaskError {
    match error {
        HostError::Transient { message, .. } => TaskError::PublishTransient(message),
        HostError::Permanent { .. } => TaskError::PublishPermanent(error.to_string()),
        HostError::NotFound(message) => TaskError::PublishPermanent(format!("not found: {}", message)),
    }
}

pub struct RepositoryPublisher {
    host: Arc<dyn RepositoryHost>,
    prefix: String,
    policy: RetryPolicy,
}

impl RepositoryPublisher {
    pub fn new(host: Arc<dyn RepositoryHost>, prefix: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            host,
            prefix: prefix.into(),
            policy,
        }
    }

    /// Deterministic repository name for a task.
    pub fn repo_name(&self, task: &str) -> Result<String, TaskError> {
        let slug = slugify(task);
        if slug.is_empty() {
            return Err(TaskError::PublishPermanent(format!(
                "task id '{}' has no characters usable in a repository name",
                task
            )));
        }
        Ok(format!("{}{}", self.prefix, slug))
    }

    /// Round 1: create-or-reuse, commit, enable Pages.
    pub async fn publish_initial(&self, task: &str, files: &GeneratedFileSet) -> Result<RepositoryRef, TaskError> {
        let name = self.repo_name(task)?;
        let host = self.host.as_ref();
        let name_ref = name.as_str();

        let outcome = self
            .retry("Create repository", move |_| async move {
                host.create_repository(name_ref).await
            })
            .await
            .map_err(publish_error)?;

        let remote = match outcome {
            CreateOutcome::Created(repo) => {
                tracing::info!("Created repository {}", repo.html_url);
                repo
            }
            CreateOutcome::AlreadyExists => {
                tracing::info!("Repository {} already exists, reusing it", name);
                self.find(name_ref)
                    .await?
                    .ok_or_else(|| {
                        TaskError::PublishPermanent(format!(
                            "repository {} exists but is not visible to the token",
                            name
                        ))
                    })?
            }
        };

        let mut repo = RepositoryRef::from_remote(task, remote);
        let sha = self
            .commit(&repo, files, &format!("Round 1: initial application for {}", task))
            .await?;
        repo.commit_sha = Some(sha);

        self.enable_pages(&repo).await;
        Ok(repo)
    }

    /// Round 2 lookup. Not retried past transient errors; absence is fatal.
    pub async fn locate(&self, task: &str) -> Result<RepositoryRef, TaskError> {
        let name = self.repo_name(task)?;
        match self.find(&name).await? {
            Some(remote) => Ok(RepositoryRef::from_remote(task, remote)),
            None => Err(TaskError::RepositoryNotFound(name)),
        }
    }

    /// Current text files, used as context for a revision.
    ///
    /// A read failure is logged and yields an empty map; the revision then
    /// proceeds without prior context.
    pub async fn prior_files(&self, repo: &RepositoryRef) -> BTreeMap<String, String> {
        let host = self.host.as_ref();
        let remote = &repo.remote();
        let result = self
            .retry("Read repository files", move |_| async move {
                host.read_files(remote, MAX_PRIOR_FILE_BYTES).await
            })
            .await;
        match result {
            Ok(files) => {
                tracing::debug!("Read {} existing files from {}", files.len(), repo.name);
                files
            }
            Err(e) => {
                tracing::warn!("Could not read existing files from {}: {}", repo.name, e);
                BTreeMap::new()
            }
        }
    }

    /// Round 2: commit the revision over the existing tree.
    pub async fn publish_revision(
        &self,
        repo: &RepositoryRef,
        files: &GeneratedFileSet,
    ) -> Result<RepositoryRef, TaskError> {
        let sha = self
            .commit(repo, files, &format!("Round 2: revision for {}", repo.task))
            .await?;
        Ok(RepositoryRef {
            commit_sha: Some(sha),
            ..repo.clone()
        })
    }

    /// Host calls retry transient errors and wait at least as long as a
    /// `Retry-After` header asks.
    async fn retry<T, F, Fut>(&self, label: &str, op: F) -> Result<T, HostError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HostError>>,
    {
        self.policy
            .run_with_hint(label, op, HostError::is_transient, HostError::retry_after)
            .await
    }

    async fn find(&self, name: &str) -> Result<Option<RemoteRepo>, TaskError> {
        let host = self.host.as_ref();
        self.retry("Find repository", move |_| async move {
            host.find_repository(name).await
        })
        .await
        .map_err(publish_error)
    }

    async fn commit(&self, repo: &RepositoryRef, files: &GeneratedFileSet, message: &str) -> Result<String, TaskError> {
        let host = self.host.as_ref();
        let remote = &repo.remote();
        let sha = self
            .retry("Commit files", move |_| async move {
                host.commit_files(remote, files, message).await
            })
            .await
            .map_err(publish_error)?;
        tracing::info!("Committed {} files to {} at {}", files.len(), repo.name, sha);
        Ok(sha)
    }

    /// Pages failures never fail the task: the files are published and the
    /// URL is deterministic.
    async fn enable_pages(&self, repo: &RepositoryRef) {
        let host = self.host.as_ref();
        let remote = &repo.remote();
        let result = self
            .retry("Enable Pages", move |_| async move {
                host.enable_pages(remote).await
            })
            .await;
        match result {
            Ok(PagesStatus::Enabled) => tracing::info!("Pages enabled at {}", repo.pages_url),
            Ok(PagesStatus::AlreadyEnabled) => tracing::debug!("Pages already enabled for {}", repo.name),
            Err(e) => tracing::warn!("Could not enable Pages for {}: {}", repo.name, e),
        }
    }
}
