//! In-memory record of submitted runs.
//!
//! Used for observation (`GET /api/runs`) and to recognise a re-delivery of
//! a submission that is still in flight. Nothing here survives a restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::publisher::RepositoryRef;
use crate::task::{Round, RunKey, RunState, TaskRequest};

/// Finished records kept before the oldest are evicted.
const MAX_FINISHED_RECORDS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    #[serde(flatten)]
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub repo_url: Option<String>,
    pub pages_url: Option<String>,
    pub commit_sha: Option<String>,
}

impl RunRecord {
    fn new(request: &TaskRequest, state: RunState) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            state,
            started_at: now,
            updated_at: now,
            repo_url: None,
            pages_url: None,
            commit_sha: None,
        }
    }
}

/// Outcome of registering a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New run recorded; the caller should start it
    Started(Uuid),
    /// Same (task, round, nonce) is still running
    InFlight(Uuid),
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunKey, RunRecord>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new run unless an identical one is still active.
    ///
    /// A finished record for the same key is replaced.
    pub async fn begin(&self, request: &TaskRequest, state: RunState) -> Registration {
        let key = request.run_key();
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&key) {
            if !existing.state.is_terminal() {
                return Registration::InFlight(existing.run_id);
            }
        }
        let record = RunRecord::new(request, state);
        let run_id = record.run_id;
        runs.insert(key, record);
        prune(&mut runs);
        Registration::Started(run_id)
    }

    pub async fn set_state(&self, key: &RunKey, state: &RunState) {
        if let Some(record) = self.runs.write().await.get_mut(key) {
            record.state = state.clone();
            record.updated_at = Utc::now();
        }
    }

    pub async fn set_repository(&self, key: &RunKey, repo: &RepositoryRef) {
        if let Some(record) = self.runs.write().await.get_mut(key) {
            record.repo_url = Some(repo.repo_url.clone());
            record.pages_url = Some(repo.pages_url.clone());
            record.commit_sha = repo.commit_sha.clone();
            record.updated_at = Utc::now();
        }
    }

    /// Most recent run for a task and round, whatever its nonce.
    pub async fn latest(&self, task: &str, round: Round) -> Option<RunRecord> {
        self.runs
            .read()
            .await
            .values()
            .filter(|r| r.task == task && r.round == round)
            .max_by_key(|r| r.started_at)
            .cloned()
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<RunRecord> {
        let mut records: Vec<_> = self.runs.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }
}

fn prune(runs: &mut HashMap<RunKey, RunRecord>) {
    let finished = runs.values().filter(|r| r.state.is_terminal()).count();
    if finished <= MAX_FINISHED_RECORDS {
        return;
    }
    let mut oldest: Vec<_> = runs
        .iter()
        .filter(|(_, r)| r.state.is_terminal())
        .map(|(k, r)| (r.updated_at, k.clone()))
        .collect();
    oldest.sort();
    for (_, key) in oldest.into_iter().take(finished - MAX_FINISHED_RECORDS) {
        runs.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::task::Stage;

    fn request(task: &str, nonce: &str) -> TaskRequest {
        TaskRequest {
            email: "student@example.com".into(),
            task: task.into(),
            round: Round::Initial,
            nonce: nonce.into(),
            brief: "brief".into(),
            checks: vec![],
            evaluation_url: "https://example.com/notify".into(),
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn active_duplicate_is_reported() {
        let registry = RunRegistry::new();
        let req = request("t1", "n1");
        let Registration::Started(first) = registry.begin(&req, RunState::default()).await else {
            panic!("first registration must start");
        };
        assert_eq!(
            registry.begin(&req, RunState::default()).await,
            Registration::InFlight(first)
        );
        assert!(matches!(
            registry.begin(&request("t1", "n2"), RunState::default()).await,
            Registration::Started(_)
        ));
    }

    #[tokio::test]
    async fn finished_run_can_be_resubmitted() {
        let registry = RunRegistry::new();
        let req = request("t1", "n1");
        registry.begin(&req, RunState::default()).await;

        let mut state = RunState::default();
        state
            .fail(Stage::Generating, &TaskError::GenerationFailed("x".into()))
            .unwrap();
        registry.set_state(&req.run_key(), &state).await;

        assert!(matches!(
            registry.begin(&req, RunState::default()).await,
            Registration::Started(_)
        ));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn latest_ignores_nonce() {
        let registry = RunRegistry::new();
        registry.begin(&request("t1", "n1"), RunState::default()).await;
        registry.begin(&request("t1", "n2"), RunState::default()).await;
        let latest = registry.latest("t1", Round::Initial).await.unwrap();
        assert_eq!(latest.nonce.len(), 2);
        assert!(registry.latest("t1", Round::Revision).await.is_none());
    }

    #[tokio::test]
    async fn record_serializes_state_inline() {
        let registry = RunRegistry::new();
        let req = request("t1", "n1");
        registry.begin(&req, RunState::default()).await;
        let record = registry.latest("t1", Round::Initial).await.unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"], "active");
        assert_eq!(value["stage"], "received");
        assert_eq!(value["round"], 1);
    }
}
