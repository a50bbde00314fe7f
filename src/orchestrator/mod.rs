//! Task orchestrator.
//!
//! `submit` validates an envelope, records the run and hands it to the tokio
//! runtime; the HTTP caller is acknowledged before any remote work happens.
//! `run` then drives one request through the pipeline:
//!
//! ```text
//! Resolving   decode attachments (bad ones are dropped)
//!             Round 2: locate the repository, read its files
//! Generating  LLM -> GeneratedFileSet
//! Publishing  Round 1: create-or-reuse + commit + Pages
//!             Round 2: commit over the existing tree
//! Reporting   POST the evaluation payload
//! ```
//!
//! Every failure ends the run in `Failed(stage, reason)` and is logged with
//! task, round and nonce; nothing is propagated back to the HTTP caller.

mod registry;

pub use registry::{Registration, RunRecord, RunRegistry};

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::attachments::{resolve_attachments, ResolvedAttachment};
use crate::config::PipelineConfig;
use crate::error::TaskError;
use crate::generator::{CodeGenerator, GenerationInput};
use crate::publisher::{RepositoryPublisher, RepositoryRef};
use crate::reporter::{EvaluationPayload, EvaluationReporter, ReportStatus};
use crate::task::{decode_envelope, validate, Round, RunKey, RunState, Stage, TaskEnvelope, TaskRequest};

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// A new run was recorded
    Accepted { run_id: Uuid, request: TaskRequest },
    /// The same (task, round, nonce) is already running; nothing new started
    Duplicate { run_id: Uuid, request: TaskRequest },
}

impl Submission {
    pub fn run_id(&self) -> Uuid {
        match self {
            Submission::Accepted { run_id, .. } | Submission::Duplicate { run_id, .. } => *run_id,
        }
    }

    pub fn request(&self) -> &TaskRequest {
        match self {
            Submission::Accepted { request, .. } | Submission::Duplicate { request, .. } => request,
        }
    }
}

/// A stage failure on its way to `Failed`.
struct StageFailure {
    stage: Stage,
    error: TaskError,
    /// Repository known at the time of failure, if any
    repo: Option<RepositoryRef>,
}

impl StageFailure {
    fn new(stage: Stage, error: TaskError) -> Self {
        Self {
            stage,
            error,
            repo: None,
        }
    }

    fn with_repo(mut self, repo: &RepositoryRef) -> Self {
        self.repo = Some(repo.clone());
        self
    }
}

pub struct TaskOrchestrator {
    shared_secret: Option<String>,
    generator: CodeGenerator,
    publisher: RepositoryPublisher,
    reporter: EvaluationReporter,
    registry: RunRegistry,
    permits: Semaphore,
    notify_on_failure: bool,
}

impl TaskOrchestrator {
    pub fn new(
        shared_secret: Option<String>,
        generator: CodeGenerator,
        publisher: RepositoryPublisher,
        reporter: EvaluationReporter,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            shared_secret,
            generator,
            publisher,
            reporter,
            registry: RunRegistry::new(),
            permits: Semaphore::new(pipeline.max_concurrent_tasks.max(1)),
            notify_on_failure: pipeline.notify_on_failure,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Validate and record a submission without starting it.
    ///
    /// # Errors
    /// `Unauthorized` or `InvalidRequest`; no record is created.
    pub async fn accept(&self, envelope: TaskEnvelope) -> Result<Submission, TaskError> {
        let mut state = RunState::default();
        advance(&mut state, Stage::Validating);

        let request = validate(envelope, self.shared_secret.as_deref())?;
        match self.registry.begin(&request, state).await {
            Registration::Started(run_id) => Ok(Submission::Accepted { run_id, request }),
            Registration::InFlight(run_id) => {
                tracing::info!(
                    task = %request.task,
                    round = %request.round,
                    nonce = %request.nonce,
                    "Duplicate submission while run {} is in flight",
                    run_id
                );
                Ok(Submission::Duplicate { run_id, request })
            }
        }
    }

    /// [`submit`](Self::submit) for an undecoded JSON body.
    pub async fn submit_json(self: &Arc<Self>, body: serde_json::Value) -> Result<Submission, TaskError> {
        let envelope = decode_envelope(body, self.shared_secret.as_deref())?;
        self.submit(envelope).await
    }

    /// Validate, record and start a submission in the background.
    pub async fn submit(self: &Arc<Self>, envelope: TaskEnvelope) -> Result<Submission, TaskError> {
        let submission = self.accept(envelope).await?;
        if let Submission::Accepted { run_id, request } = &submission {
            let this = Arc::clone(self);
            let (run_id, request) = (*run_id, request.clone());
            tokio::spawn(async move {
                this.run(run_id, request).await;
            });
        }
        Ok(submission)
    }

    /// Drive an accepted request to a terminal state.
    pub async fn run(&self, run_id: Uuid, request: TaskRequest) -> RunState {
        let span = tracing::info_span!(
            "run",
            %run_id,
            task = %request.task,
            round = %request.round,
            nonce = %request.nonce
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: TaskRequest) -> RunState {
        let key = request.run_key();
        let mut state = RunState::Active {
            stage: Stage::Validating,
        };

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!("Run pool is closed; dropping run");
                return state;
            }
        };
        tracing::info!("Run started");

        match self.execute(&key, &request, &mut state).await {
            Ok(repo) => {
                if let Err(e) = state.complete() {
                    tracing::error!("{}", e);
                }
                self.registry.set_state(&key, &state).await;
                tracing::info!(pages_url = %repo.pages_url, "Run completed");
            }
            Err(failure) => self.fail(&key, &request, &mut state, failure).await,
        }
        state
    }

    async fn execute(
        &self,
        key: &RunKey,
        request: &TaskRequest,
        state: &mut RunState,
    ) -> Result<RepositoryRef, StageFailure> {
        self.enter(key, state, Stage::Resolving).await;
        let attachments: Vec<ResolvedAttachment> = resolve_attachments(&request.attachments).collect();
        if attachments.len() < request.attachments.len() {
            tracing::warn!(
                "Using {} of {} attachments",
                attachments.len(),
                request.attachments.len()
            );
        }

        // Revisions need the current files before the model is asked.
        let located = match request.round {
            Round::Initial => None,
            Round::Revision => Some(
                self.publisher
                    .locate(&request.task)
                    .await
                    .map_err(|e| StageFailure::new(Stage::Publishing, e))?,
            ),
        };
        let prior_files = match &located {
            Some(repo) => Some(self.publisher.prior_files(repo).await),
            None => None,
        };

        self.enter(key, state, Stage::Generating).await;
        let files = self
            .generator
            .generate(&GenerationInput {
                request,
                attachments: &attachments,
                prior_files: prior_files.as_ref(),
            })
            .await
            .map_err(|e| StageFailure::new(Stage::Generating, e))?;

        self.enter(key, state, Stage::Publishing).await;
        let repo = match &located {
            None => self.publisher.publish_initial(&request.task, &files).await,
            Some(existing) => self.publisher.publish_revision(existing, &files).await,
        }
        .map_err(|e| {
            let failure = StageFailure::new(Stage::Publishing, e);
            match &located {
                Some(existing) => failure.with_repo(existing),
                None => failure,
            }
        })?;
        self.registry.set_repository(key, &repo).await;
        tracing::info!(
            repo_url = %repo.repo_url,
            commit_sha = repo.commit_sha.as_deref().unwrap_or(""),
            "Published"
        );

        self.enter(key, state, Stage::Reporting).await;
        let payload = EvaluationPayload::new(request, &repo, ReportStatus::Completed);
        self.reporter
            .report(&request.evaluation_url, &payload)
            .await
            .map_err(|e| StageFailure::new(Stage::Reporting, e).with_repo(&repo))?;

        Ok(repo)
    }

    async fn enter(&self, key: &RunKey, state: &mut RunState, next: Stage) {
        advance(state, next);
        tracing::debug!(stage = %next, "Stage entered");
        self.registry.set_state(key, state).await;
    }

    async fn fail(&self, key: &RunKey, request: &TaskRequest, state: &mut RunState, failure: StageFailure) {
        let StageFailure { stage, error, repo } = failure;
        if let Err(e) = state.fail(stage, &error) {
            tracing::error!("{}", e);
        }
        self.registry.set_state(key, state).await;
        tracing::error!(
            stage = %stage,
            reason = %error.kind(),
            "Run failed: {}",
            error
        );

        if self.notify_on_failure {
            if let Some(repo) = repo {
                let payload = EvaluationPayload::new(request, &repo, ReportStatus::Failed);
                self.reporter
                    .notify_failure(&request.evaluation_url, &payload)
                    .await;
            }
        }
    }
}

/// Transitions are hard-coded in order; a rejected one is a bug worth a log line.
fn advance(state: &mut RunState, next: Stage) {
    if let Err(e) = state.advance(next) {
        tracing::error!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::generator::testing::ScriptedLlm;
    use crate::github::testing::InMemoryHost;
    use crate::llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError};
    use crate::retry::RetryPolicy;
    use crate::task::AttachmentRef;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SECRET: &str = "s3cret";
    const ROUND_ONE: &str = "FILE: index.html\n```html\n<!DOCTYPE html><html><body><h1>Hello</h1><button id=\"go\">Go</button></body></html>\n```\nFILE: style.css\n```css\nh1 { text-align: center }\n```\n";
    const ROUND_TWO: &str = "FILE: index.html\n```html\n<!DOCTYPE html><html><body><h1>Hello</h1><button id=\"go\">Go</button><p id=\"count\">0</p></body></html>\n```\n";

    struct Harness {
        orchestrator: Arc<TaskOrchestrator>,
        llm: Arc<ScriptedLlm>,
        host: Arc<InMemoryHost>,
    }

    fn build(llm: Arc<dyn LlmClient>, pipeline: PipelineConfig) -> (Arc<TaskOrchestrator>, Arc<InMemoryHost>) {
        let host = Arc::new(InMemoryHost::new("octocat"));
        let generator = CodeGenerator::new(
            llm,
            "test-model",
            ChatOptions::default(),
            Duration::from_secs(5),
            RetryPolicy::immediate(3),
        );
        let publisher = RepositoryPublisher::new(host.clone(), "", RetryPolicy::immediate(3));
        let reporter = EvaluationReporter::new(Duration::from_secs(5), RetryPolicy::immediate(2));
        let orchestrator = TaskOrchestrator::new(Some(SECRET.to_string()), generator, publisher, reporter, &pipeline);
        (Arc::new(orchestrator), host)
    }

    fn harness(llm: ScriptedLlm, notify_on_failure: bool) -> Harness {
        let llm = Arc::new(llm);
        let (orchestrator, host) = build(
            llm.clone(),
            PipelineConfig {
                notify_on_failure,
                ..PipelineConfig::default()
            },
        );
        Harness {
            orchestrator,
            llm,
            host,
        }
    }

    /// Holds every model call until released; tracks how many overlap.
    struct GatedLlm {
        gate: Semaphore,
        started: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GatedLlm {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                started: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for GatedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> Result<ChatResponse, LlmError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: Some(ROUND_ONE.to_string()),
                finish_reason: Some("stop".to_string()),
                usage: None,
                model: None,
            })
        }
    }

    /// Poll the registry until the latest run for `task` is terminal.
    async fn finished(orchestrator: &TaskOrchestrator, task: &str, round: Round) -> RunState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = orchestrator.registry().latest(task, round).await {
                    if record.state.is_terminal() {
                        return record.state;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run did not finish in time")
    }

    fn envelope(task: &str, round: u8, nonce: &str, evaluation_url: &str) -> TaskEnvelope {
        TaskEnvelope {
            email: Some("student@example.com".into()),
            secret: Some(SECRET.into()),
            task: Some(task.into()),
            round: Some(json!(round)),
            nonce: Some(nonce.into()),
            brief: Some("Centered heading and a button".into()),
            checks: Some(vec![json!("Page has an h1"), json!("Button #go exists")]),
            evaluation_url: Some(evaluation_url.into()),
            attachments: Some(vec![]),
        }
    }

    impl Harness {
        async fn process(&self, envelope: TaskEnvelope) -> RunState {
            match self.orchestrator.accept(envelope).await.unwrap() {
                Submission::Accepted { run_id, request } => self.orchestrator.run(run_id, request).await,
                Submission::Duplicate { .. } => panic!("unexpected duplicate"),
            }
        }
    }

    async fn accepting_evaluator() -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/notify");
                then.status(200);
            })
            .await;
        server
    }

    #[tokio::test]
    async fn round_one_publishes_and_reports() {
        let h = harness(ScriptedLlm::always(ROUND_ONE), false);
        let server = MockServer::start_async().await;
        let report = server
            .mock_async(|when, then| {
                when.method(POST).path("/notify").json_body(json!({
                    "email": "student@example.com",
                    "task": "t1",
                    "round": 1,
                    "nonce": "nonce-ab12",
                    "repo_url": "https://github.com/octocat/t1",
                    "commit_sha": "sha-1",
                    "pages_url": "https://octocat.github.io/t1/",
                    "status": "completed"
                }));
                then.status(200);
            })
            .await;

        let state = h
            .process(envelope("t1", 1, "nonce-ab12", &server.url("/notify")))
            .await;

        assert_eq!(state, RunState::Completed);
        report.assert_async().await;

        let stored = h.host.repo("t1").unwrap();
        assert!(stored.pages);
        let mut paths: Vec<_> = stored.files.keys().cloned().collect();
        paths.sort();
        assert_eq!(paths, vec!["LICENSE", "README.md", "index.html", "style.css"]);

        let record = h.orchestrator.registry().latest("t1", Round::Initial).await.unwrap();
        assert_eq!(record.state, RunState::Completed);
        assert_eq!(record.pages_url.as_deref(), Some("https://octocat.github.io/t1/"));
    }

    #[tokio::test]
    async fn round_two_revises_the_same_repository() {
        let h = harness(
            ScriptedLlm::new(vec![Ok(ROUND_ONE.to_string()), Ok(ROUND_TWO.to_string())]),
            false,
        );
        let server = accepting_evaluator().await;
        let url = server.url("/notify");

        assert_eq!(h.process(envelope("t1", 1, "n1", &url)).await, RunState::Completed);
        let after_first = h.host.repo("t1").unwrap().commits.len();
        assert_eq!(h.process(envelope("t1", 2, "n2", &url)).await, RunState::Completed);

        assert_eq!(h.host.repo_count(), 1);
        assert_eq!(h.host.creates.load(Ordering::SeqCst), 1);
        let stored = h.host.repo("t1").unwrap();
        assert_eq!(stored.commits.len(), after_first + 1);
        assert!(stored.files["index.html"].contains("id=\"count\""));
        assert_eq!(stored.files["style.css"], "h1 { text-align: center }");

        let prompts = h.llm.user_prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("<button id=\"go\">Go</button>"));
    }

    #[tokio::test]
    async fn round_two_without_round_one_fails_before_generation() {
        let h = harness(ScriptedLlm::always(ROUND_TWO), false);
        let server = MockServer::start_async().await;
        let report = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let state = h.process(envelope("t9", 2, "n1", &server.url("/notify"))).await;

        assert!(matches!(
            state,
            RunState::Failed {
                stage: Stage::Publishing,
                reason: FailureKind::RepositoryNotFound,
                ..
            }
        ));
        assert_eq!(h.llm.calls(), 0);
        assert_eq!(report.hits_async().await, 0);
    }

    #[tokio::test]
    async fn unusable_generation_stops_before_publishing() {
        let h = harness(ScriptedLlm::always("I am unable to build that."), false);
        let server = MockServer::start_async().await;
        let report = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let state = h.process(envelope("t1", 1, "n1", &server.url("/notify"))).await;

        assert!(matches!(
            state,
            RunState::Failed {
                stage: Stage::Generating,
                reason: FailureKind::GenerationFailed,
                ..
            }
        ));
        assert_eq!(h.llm.calls(), 3);
        assert_eq!(h.host.repo_count(), 0);
        assert_eq!(report.hits_async().await, 0);
    }

    #[tokio::test]
    async fn repeated_round_one_publishes_once() {
        let h = harness(ScriptedLlm::always(ROUND_ONE), false);
        let server = accepting_evaluator().await;
        let url = server.url("/notify");

        assert_eq!(h.process(envelope("t1", 1, "n1", &url)).await, RunState::Completed);
        assert_eq!(h.process(envelope("t1", 1, "n1", &url)).await, RunState::Completed);

        assert_eq!(h.host.repo_count(), 1);
        assert_eq!(h.host.creates.load(Ordering::SeqCst), 1);
        // initial commit + one content commit; the identical second run is a no-op
        assert_eq!(h.host.repo("t1").unwrap().commits.len(), 2);
    }

    #[tokio::test]
    async fn in_flight_redelivery_is_a_duplicate() {
        let h = harness(ScriptedLlm::always(ROUND_ONE), false);
        let url = "https://example.com/notify";

        let first = h.orchestrator.accept(envelope("t1", 1, "n1", url)).await.unwrap();
        let second = h.orchestrator.accept(envelope("t1", 1, "n1", url)).await.unwrap();

        assert!(matches!(first, Submission::Accepted { .. }));
        assert!(matches!(second, Submission::Duplicate { .. }));
        assert_eq!(first.run_id(), second.run_id());
    }

    #[tokio::test]
    async fn rejected_envelopes_leave_no_record() {
        let h = harness(ScriptedLlm::always(ROUND_ONE), false);
        let mut bad = envelope("t1", 1, "n1", "https://example.com/notify");
        bad.secret = Some("wrong".into());

        assert_eq!(h.orchestrator.accept(bad).await.unwrap_err(), TaskError::Unauthorized);
        assert!(h.orchestrator.registry().list().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_attachment_is_dropped() {
        let h = harness(ScriptedLlm::always(ROUND_ONE), false);
        let server = accepting_evaluator().await;
        let mut env = envelope("t1", 1, "n1", &server.url("/notify"));
        env.attachments = Some(vec![
            AttachmentRef {
                name: "broken.csv".into(),
                url: "data:text/csv;base64,@@not-base64@@".into(),
            },
            AttachmentRef {
                name: "sales.csv".into(),
                url: "data:text/csv;base64,cmVnaW9uLHRvdGFsCm5vcnRoLDEw".into(),
            },
        ]);

        assert_eq!(h.process(env).await, RunState::Completed);
        let prompt = &h.llm.user_prompts()[0];
        assert!(prompt.contains("sales.csv"));
        assert!(prompt.contains("region,total"));
        assert!(!prompt.contains("broken.csv"));
    }

    #[tokio::test]
    async fn rejected_report_fails_the_run_and_optionally_notifies() {
        for (notify, expected_hits) in [(false, 1), (true, 2)] {
            let h = harness(ScriptedLlm::always(ROUND_ONE), notify);
            let server = MockServer::start_async().await;
            let report = server
                .mock_async(|when, then| {
                    when.method(POST).path("/notify");
                    then.status(400).body("stale nonce");
                })
                .await;

            let state = h.process(envelope("t1", 1, "n1", &server.url("/notify"))).await;

            assert!(matches!(
                state,
                RunState::Failed {
                    stage: Stage::Reporting,
                    reason: FailureKind::ReportPermanentError,
                    ..
                }
            ));
            assert_eq!(report.hits_async().await, expected_hits);
        }
    }

    #[tokio::test]
    async fn round_two_keeps_round_one_readme_and_license() {
        let round_one = format!("{}FILE: README.md\n```markdown\n# Custom round one readme\n```\n", ROUND_ONE);
        let h = harness(ScriptedLlm::new(vec![Ok(round_one), Ok(ROUND_TWO.to_string())]), false);
        let server = accepting_evaluator().await;
        let url = server.url("/notify");

        assert_eq!(h.process(envelope("t1", 1, "n1", &url)).await, RunState::Completed);
        let license = h.host.repo("t1").unwrap().files["LICENSE"].clone();
        assert_eq!(h.process(envelope("t1", 2, "n2", &url)).await, RunState::Completed);

        let stored = h.host.repo("t1").unwrap();
        assert_eq!(stored.files["README.md"], "# Custom round one readme");
        assert_eq!(stored.files["LICENSE"], license);
        assert!(stored.files["index.html"].contains("id=\"count\""));
    }

    #[tokio::test]
    async fn submitted_run_completes_in_the_background() {
        let h = harness(ScriptedLlm::always(ROUND_ONE), false);
        let server = MockServer::start_async().await;
        let report = server
            .mock_async(|when, then| {
                when.method(POST).path("/notify");
                then.status(200);
            })
            .await;

        let submission = h
            .orchestrator
            .submit(envelope("t1", 1, "n1", &server.url("/notify")))
            .await
            .unwrap();
        assert!(matches!(submission, Submission::Accepted { .. }));

        assert_eq!(finished(&h.orchestrator, "t1", Round::Initial).await, RunState::Completed);
        assert_eq!(report.hits_async().await, 1);
        assert!(h.host.repo("t1").is_some());
    }

    #[tokio::test]
    async fn concurrent_runs_respect_the_pool_size() {
        let llm = Arc::new(GatedLlm::new());
        let (orchestrator, host) = build(
            llm.clone(),
            PipelineConfig {
                max_concurrent_tasks: 1,
                ..PipelineConfig::default()
            },
        );
        let server = accepting_evaluator().await;
        let url = server.url("/notify");

        for task in ["a1", "a2", "a3"] {
            orchestrator.submit(envelope(task, 1, "n1", &url)).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while llm.started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first run never reached the model");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(llm.started.load(Ordering::SeqCst), 1);

        llm.gate.add_permits(3);
        for task in ["a1", "a2", "a3"] {
            assert_eq!(finished(&orchestrator, task, Round::Initial).await, RunState::Completed);
        }
        assert_eq!(llm.started.load(Ordering::SeqCst), 3);
        assert_eq!(llm.peak.load(Ordering::SeqCst), 1);
        assert_eq!(host.repo_count(), 3);
    }
}
