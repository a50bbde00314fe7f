//! Repository hosting.
//!
//! [`RepositoryHost`] is the seam between the publisher and the hosting
//! provider. [`GitHubClient`] implements it against the GitHub REST API; tests
//! use an in-memory host.

mod client;
mod error;

pub use client::GitHubClient;
pub use error::{classify_response, HostError};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generator::GeneratedFileSet;

/// A repository as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepo {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub html_url: String,
}

impl RemoteRepo {
    /// Project-site URL GitHub Pages serves the default branch root at.
    pub fn pages_url(&self) -> String {
        format!("https://{}.github.io/{}/", self.owner.to_lowercase(), self.name)
    }
}

/// Result of a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(RemoteRepo),
    /// A repository with this name already exists under the owner
    AlreadyExists,
}

/// Pages state after an enable call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesStatus {
    Enabled,
    AlreadyEnabled,
}

/// Operations the publisher needs from a hosting provider.
///
/// Implementations perform one logical operation per call and classify their
/// failures; retrying is the caller's decision.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Login of the authenticated account.
    async fn owner(&self) -> Result<String, HostError>;

    /// Create a public, auto-initialized repository.
    async fn create_repository(&self, name: &str) -> Result<CreateOutcome, HostError>;

    /// Look a repository up by name under the owner.
    async fn find_repository(&self, name: &str) -> Result<Option<RemoteRepo>, HostError>;

    /// Text files on the default branch, each at most `max_bytes` long.
    async fn read_files(&self, repo: &RemoteRepo, max_bytes: usize) -> Result<BTreeMap<String, String>, HostError>;

    /// Commit `files` on top of the default branch.
    ///
    /// Files not in the set are kept. When the resulting tree equals the
    /// current one no commit is created and the current head SHA is returned.
    async fn commit_files(
        &self,
        repo: &RemoteRepo,
        files: &GeneratedFileSet,
        message: &str,
    ) -> Result<String, HostError>;

    /// Serve the default branch root as a static site.
    async fn enable_pages(&self, repo: &RemoteRepo) -> Result<PagesStatus, HostError>;
}

/// Text-like extensions read back as prior context for revisions.
const TEXT_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "js", "mjs", "json", "md", "txt", "csv", "svg", "xml", "yml", "yaml",
];

/// True for paths worth showing to the model.
pub fn is_text_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name == "LICENSE" {
        return true;
    }
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
