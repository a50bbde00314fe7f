//! GitHub REST implementation of [`RepositoryHost`].
//!
//! Commits go through the Git Data API (ref → commit → tree → new commit →
//! ref update) so a whole file set lands as one commit without a local clone.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use super::error::{classify_response, HostError};
use super::{is_text_path, CreateOutcome, PagesStatus, RemoteRepo, RepositoryHost};
use crate::config::GitHubConfig;
use crate::generator::GeneratedFileSet;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2022-11-28";
const BLOB_FETCH_CONCURRENCY: usize = 4;
const USER_AGENT: &str = concat!("pagesmith/", env!("CARGO_PKG_VERSION"));

pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: Option<String>,
    owner: OnceCell<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            owner: OnceCell::new(),
        }
    }

    pub fn from_config(config: &GitHubConfig) -> Self {
        Self::new(config.api_url.clone(), config.token.clone())
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, HostError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| HostError::permanent("GITHUB_TOKEN is not set"))?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, HostError> {
        builder.send().await.map_err(HostError::from_reqwest)
    }

    /// Turn a non-success response into a classified error.
    async fn failure(response: Response) -> HostError {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        classify_response(status, &headers, &body)
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, HostError> {
        let response = Self::send(builder).await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        response.json::<T>().await.map_err(HostError::from_reqwest)
    }

    fn repo_path(repo: &RemoteRepo, rest: &str) -> String {
        format!(
            "/repos/{}/{}{}",
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            rest
        )
    }

    async fn head_sha(&self, repo: &RemoteRepo) -> Result<String, HostError> {
        let path = Self::repo_path(repo, &format!("/git/ref/heads/{}", repo.default_branch));
        let reference: GitRef = Self::json(self.request(Method::GET, &path)?).await?;
        Ok(reference.object.sha)
    }

    async fn tree_sha(&self, repo: &RemoteRepo, commit_sha: &str) -> Result<String, HostError> {
        let path = Self::repo_path(repo, &format!("/git/commits/{}", commit_sha));
        let commit: GitCommit = Self::json(self.request(Method::GET, &path)?).await?;
        Ok(commit.tree.sha)
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn owner(&self) -> Result<String, HostError> {
        let login = self
            .owner
            .get_or_try_init(|| async {
                let user: User = Self::json(self.request(Method::GET, "/user")?).await?;
                tracing::info!("Authenticated to GitHub as {}", user.login);
                Ok::<_, HostError>(user.login)
            })
            .await?;
        Ok(login.clone())
    }

    async fn create_repository(&self, name: &str) -> Result<CreateOutcome, HostError> {
        let body = json!({
            "name": name,
            "description": format!("Generated application for task {}", name),
            "private": false,
            "auto_init": true,
        });
        let response = Self::send(self.request(Method::POST, "/user/repos")?.json(&body)).await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            if text.contains("already exists") {
                return Ok(CreateOutcome::AlreadyExists);
            }
            return Err(classify_response(StatusCode::UNPROCESSABLE_ENTITY, &headers, &text));
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let created: Repository = response.json().await.map_err(HostError::from_reqwest)?;
        Ok(CreateOutcome::Created(created.into()))
    }

    async fn find_repository(&self, name: &str) -> Result<Option<RemoteRepo>, HostError> {
        let owner = self.owner().await?;
        let path = format!(
            "/repos/{}/{}",
            urlencoding::encode(&owner),
            urlencoding::encode(name)
        );
        match Self::json::<Repository>(self.request(Method::GET, &path)?).await {
            Ok(repo) => Ok(Some(repo.into())),
            Err(HostError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read_files(&self, repo: &RemoteRepo, max_bytes: usize) -> Result<BTreeMap<String, String>, HostError> {
        let path = Self::repo_path(repo, &format!("/git/trees/{}?recursive=1", repo.default_branch));
        let tree: Tree = Self::json(self.request(Method::GET, &path)?).await?;
        if tree.truncated {
            tracing::warn!("Tree listing for {} was truncated", repo.name);
        }

        let wanted: Vec<TreeEntry> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob" && is_text_path(&entry.path))
            .filter(|entry| {
                let fits = (entry.size.unwrap_or(0) as usize) <= max_bytes;
                if !fits {
                    tracing::debug!("Skipping large file {} ({:?} bytes)", entry.path, entry.size);
                }
                fits
            })
            .collect();

        let fetched: Vec<Result<(String, Option<String>), HostError>> = stream::iter(wanted)
            .map(|entry| async move {
                let blob_path = Self::repo_path(repo, &format!("/git/blobs/{}", entry.sha));
                let blob: Blob = Self::json(self.request(Method::GET, &blob_path)?).await?;
                Ok::<_, HostError>((entry.path, decode_blob(&blob)))
            })
            .buffer_unordered(BLOB_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut files = BTreeMap::new();
        for result in fetched {
            match result? {
                (path, Some(text)) => {
                    files.insert(path, text);
                }
                (path, None) => tracing::debug!("Skipping non-UTF-8 file {}", path),
            }
        }
        Ok(files)
    }

    async fn commit_files(
        &self,
        repo: &RemoteRepo,
        files: &GeneratedFileSet,
        message: &str,
    ) -> Result<String, HostError> {
        let head = self.head_sha(repo).await?;
        let base_tree = self.tree_sha(repo, &head).await?;

        let entries: Vec<_> = files
            .iter()
            .map(|(path, content)| {
                json!({
                    "path": path,
                    "mode": "100644",
                    "type": "blob",
                    "content": content,
                })
            })
            .collect();
        let tree: ShaOnly = Self::json(
            self.request(Method::POST, &Self::repo_path(repo, "/git/trees"))?
                .json(&json!({ "base_tree": base_tree, "tree": entries })),
        )
        .await?;

        if tree.sha == base_tree {
            tracing::info!("No changes for {}; keeping head {}", repo.name, head);
            return Ok(head);
        }

        let commit: ShaOnly = Self::json(
            self.request(Method::POST, &Self::repo_path(repo, "/git/commits"))?
                .json(&json!({ "message": message, "tree": tree.sha, "parents": [head] })),
        )
        .await?;

        let ref_path = Self::repo_path(repo, &format!("/git/refs/heads/{}", repo.default_branch));
        let _: GitRef = Self::json(
            self.request(Method::PATCH, &ref_path)?
                .json(&json!({ "sha": commit.sha, "force": false })),
        )
        .await?;

        Ok(commit.sha)
    }

    async fn enable_pages(&self, repo: &RemoteRepo) -> Result<PagesStatus, HostError> {
        let body = json!({
            "source": { "branch": repo.default_branch, "path": "/" }
        });
        let response = Self::send(
            self.request(Method::POST, &Self::repo_path(repo, "/pages"))?
                .json(&body),
        )
        .await?;

        match response.status() {
            status if status.is_success() => Ok(PagesStatus::Enabled),
            StatusCode::CONFLICT => Ok(PagesStatus::AlreadyEnabled),
            _ => Err(Self::failure(response).await),
        }
    }
}

fn decode_blob(blob: &Blob) -> Option<String> {
    if blob.encoding != "base64" {
        return Some(blob.content.clone());
    }
    let compact: String = blob.content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact).ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    html_url: String,
    #[serde(default)]
    default_branch: Option<String>,
    owner: Owner,
}

impl From<Repository> for RemoteRepo {
    fn from(repo: Repository) -> Self {
        RemoteRepo {
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
            html_url: repo.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Blob {
    content: String,
    encoding: String,
}
