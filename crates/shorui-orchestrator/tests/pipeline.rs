//! End-to-end tests for the generation pipeline.
//!
//! A small shell script stands in for the Python interpreter: it reads the
//! rewritten save path out of the snippet and writes placeholder bytes
//! there, so these tests do not need python-docx installed.

#![cfg(unix)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use shorui_agent::{OfflineGenerator, RawModelResponse, ResponseSource, TextGenerator};
use shorui_core::{
    ExecutionFailure, ExitKind, GenerationRequest, GenerationSession, SessionId, SessionStatus,
    ShoruiError, SystemClock,
};
use shorui_orchestrator::{
    GenerationCoordinator, MemoryQuotaStore, MemorySessionStore, QuotaLedger, SessionStore,
};
use shorui_sandbox::{ArtifactStore, SandboxExecutor};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FAKE_INTERPRETER: &str = r#"
if grep -q 'raise SystemExit(3)' "$1"; then
    echo "Traceback (most recent call last): boom" >&2
    exit 3
fi
target=$(sed -n "s/.*\.save('\(.*\)').*/\1/p" "$1" | head -n 1)
[ -n "$target" ] || exit 4
printf 'PK-fake-docx' > "$target"
"#;

/// Always answers with the same text
struct FixedGenerator(String);

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _topic: &str) -> RawModelResponse {
        RawModelResponse::new(self.0.clone(), ResponseSource::Service)
    }
}

struct Harness {
    _temp: TempDir,
    coordinator: Arc<GenerationCoordinator>,
    sessions: Arc<MemorySessionStore>,
    store: Arc<ArtifactStore>,
}

async fn harness(limit: u32, generator: Arc<dyn TextGenerator>) -> Harness {
    let temp = TempDir::new().unwrap();
    let script = temp.path().join("fake-python.sh");
    std::fs::write(&script, FAKE_INTERPRETER).unwrap();

    let store = Arc::new(ArtifactStore::new(temp.path().join("documents")).await.unwrap());
    let executor = SandboxExecutor::new(store.clone(), "sh")
        .with_interpreter_args(vec![script.to_string_lossy().into_owned()])
        .with_timeout(Duration::from_secs(10));

    let clock = Arc::new(SystemClock);
    let ledger = QuotaLedger::new(Arc::new(MemoryQuotaStore::new()), limit, clock.clone());
    let sessions = Arc::new(MemorySessionStore::new());

    let coordinator = GenerationCoordinator::new(
        ledger,
        generator,
        executor,
        sessions.clone(),
        clock,
    );

    Harness {
        _temp: temp,
        coordinator: Arc::new(coordinator),
        sessions,
        store,
    }
}

fn scratch_is_empty(store: &ArtifactStore) -> bool {
    match std::fs::read_dir(store.scratch_dir()) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

#[tokio::test]
async fn test_business_proposal_end_to_end() {
    let h = harness(10, Arc::new(OfflineGenerator::new())).await;

    let outcome = h
        .coordinator
        .generate(GenerationRequest::new("alice", "Business Proposal"))
        .await
        .unwrap();

    let filename = outcome.session.generated_file.clone().unwrap();
    let pattern = Regex::new(r"^business-proposal-doc-[a-z0-9]{6}\.docx$").unwrap();
    assert!(pattern.is_match(&filename), "unexpected filename {}", filename);

    assert_eq!(outcome.execution.exit_kind, ExitKind::Success);
    assert_eq!(outcome.execution.size_bytes, 12);
    assert_eq!(outcome.session.status, SessionStatus::Completed);
    assert_eq!(outcome.source, ResponseSource::Offline);
    assert_eq!(outcome.download_url, format!("/documents/{}", filename));

    let stored = h.sessions.get("alice", outcome.session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.file_path.as_deref(), Some(outcome.execution.artifact_path.as_path()));

    assert!(h.store.exists(&filename).await);
    assert!(scratch_is_empty(&h.store));

    let usage = h.coordinator.usage("alice").await.unwrap();
    assert_eq!(usage.documents_generated, 1);
    assert_eq!(usage.remaining, 9);
}

#[tokio::test]
async fn test_download_and_listing() {
    let h = harness(10, Arc::new(OfflineGenerator::new())).await;
    let outcome = h
        .coordinator
        .generate(GenerationRequest::new("alice", "Quarterly numbers"))
        .await
        .unwrap();
    let filename = outcome.session.generated_file.unwrap();

    let (_file, size) = h.coordinator.download(&filename).await.unwrap();
    assert_eq!(size, 12);

    let listed = h.coordinator.documents().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, filename);

    assert!(matches!(
        h.coordinator.download("missing.docx").await,
        Err(ShoruiError::NotFound(_))
    ));
    assert!(matches!(
        h.coordinator.download("../secret").await,
        Err(ShoruiError::PathValidation(_))
    ));
}

#[tokio::test]
async fn test_quota_exceeded_creates_no_session() {
    let h = harness(1, Arc::new(OfflineGenerator::new())).await;

    h.coordinator
        .generate(GenerationRequest::new("bob", "First"))
        .await
        .unwrap();
    let err = h
        .coordinator
        .generate(GenerationRequest::new("bob", "Second"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ShoruiError::QuotaExceeded { used: 1, limit: 1, .. }
    ));
    assert_eq!(err.public_message(), "Monthly document limit reached");
    assert_eq!(h.coordinator.history("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_limit_is_always_denied() {
    let h = harness(0, Arc::new(OfflineGenerator::new())).await;
    let err = h
        .coordinator
        .generate(GenerationRequest::new("carol", "Anything"))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert!(h.coordinator.history("carol").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_creates_no_session_and_keeps_quota() {
    let h = harness(10, Arc::new(OfflineGenerator::new())).await;
    let err = h
        .coordinator
        .generate(GenerationRequest::new("dave", "   "))
        .await
        .unwrap_err();

    assert!(matches!(err, ShoruiError::Validation(_)));
    assert!(h.coordinator.history("dave").await.unwrap().is_empty());
    assert_eq!(h.coordinator.usage("dave").await.unwrap().documents_generated, 0);
}

#[tokio::test]
async fn test_parse_failure_fails_session_and_consumes_quota() {
    let generator = Arc::new(FixedGenerator(
        "I'm sorry, I cannot write that document.".to_string(),
    ));
    let h = harness(10, generator).await;

    let err = h
        .coordinator
        .generate(GenerationRequest::new("erin", "Anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, ShoruiError::Parse(_)));
    assert_eq!(err.public_message(), "Failed to generate document");

    let history = h.coordinator.history("erin").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SessionStatus::Failed);
    assert!(history[0].failure.is_some());
    assert!(history[0].generated_file.is_none());

    assert_eq!(h.coordinator.usage("erin").await.unwrap().documents_generated, 1);
}

#[tokio::test]
async fn test_unsafe_model_filename_fails_session() {
    let generator = Arc::new(FixedGenerator(
        "{\"filename\": \"../../etc/cron.docx\"}\n```python\nfrom docx import Document\ndoc = Document()\ndoc.save('x.docx')\n```"
            .to_string(),
    ));
    let h = harness(10, generator).await;

    let err = h
        .coordinator
        .generate(GenerationRequest::new("frank", "Anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, ShoruiError::PathValidation(_)));

    let session = h.coordinator.session("frank", 1).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure.as_deref(), Some("unsafe filename"));
}

#[tokio::test]
async fn test_execution_failure_fails_session_without_artifact() {
    let generator = Arc::new(FixedGenerator(
        "{\"filename\": \"broken.docx\"}\n```python\nfrom docx import Document\nraise SystemExit(3)\ndoc.save('broken.docx')\n```"
            .to_string(),
    ));
    let h = harness(10, generator).await;

    let err = h
        .coordinator
        .generate(GenerationRequest::new("grace", "Anything"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShoruiError::Execution(ExecutionFailure::NonZeroExit { code: 3 })
    ));
    assert!(!err.public_message().contains("Traceback"));

    let session = h.coordinator.session("grace", 1).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(!session.failure.unwrap_or_default().contains("Traceback"));

    assert!(!h.store.exists("broken.docx").await);
    assert!(scratch_is_empty(&h.store));
}

#[tokio::test]
async fn test_existing_artifact_fails_second_request() {
    let generator = Arc::new(FixedGenerator(
        "{\"filename\": \"same.docx\"}\n```python\nfrom docx import Document\ndoc = Document()\ndoc.save('same.docx')\n```"
            .to_string(),
    ));
    let h = harness(10, generator).await;

    h.coordinator
        .generate(GenerationRequest::new("heidi", "One"))
        .await
        .unwrap();
    let err = h
        .coordinator
        .generate(GenerationRequest::new("heidi", "Two"))
        .await
        .unwrap_err();

    assert!(matches!(err, ShoruiError::Storage(_)));
    assert_eq!(h.store.size("same.docx").await.unwrap(), 12);
    assert_eq!(
        h.coordinator.session("heidi", 2).await.unwrap().status,
        SessionStatus::Failed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_respect_limit() {
    let h = harness(3, Arc::new(OfflineGenerator::new())).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .generate(GenerationRequest::new("ivan", format!("Topic {}", i)))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) if e.is_rate_limited() => denied += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(denied, 5);
    assert_eq!(h.coordinator.history("ivan").await.unwrap().len(), 3);
    assert_eq!(h.store.list().await.unwrap().len(), 3);
}

/// Accepts every write except the one that completes a session
struct RejectCompletion(MemorySessionStore);

#[async_trait]
impl SessionStore for RejectCompletion {
    async fn create(
        &self,
        user_id: &str,
        topic: &str,
        now: DateTime<Utc>,
    ) -> shorui_core::Result<GenerationSession> {
        self.0.create(user_id, topic, now).await
    }

    async fn update(&self, session: &GenerationSession) -> shorui_core::Result<()> {
        if session.status == SessionStatus::Completed {
            return Err(ShoruiError::Storage("sessions log is read-only".into()));
        }
        self.0.update(session).await
    }

    async fn get(&self, user_id: &str, id: SessionId) -> shorui_core::Result<Option<GenerationSession>> {
        self.0.get(user_id, id).await
    }

    async fn list_for_user(&self, user_id: &str) -> shorui_core::Result<Vec<GenerationSession>> {
        self.0.list_for_user(user_id).await
    }
}

#[tokio::test]
async fn test_unrecorded_completion_fails_session() {
    let generator = Arc::new(FixedGenerator(
        "{\"filename\": \"final.docx\"}\n```python\nfrom docx import Document\ndoc = Document()\ndoc.save('final.docx')\n```"
            .to_string(),
    ));
    let temp = TempDir::new().unwrap();
    let script = temp.path().join("fake-python.sh");
    std::fs::write(&script, FAKE_INTERPRETER).unwrap();

    let store = Arc::new(ArtifactStore::new(temp.path().join("documents")).await.unwrap());
    let executor = SandboxExecutor::new(store.clone(), "sh")
        .with_interpreter_args(vec![script.to_string_lossy().into_owned()])
        .with_timeout(Duration::from_secs(10));
    let clock = Arc::new(SystemClock);
    let sessions = Arc::new(RejectCompletion(MemorySessionStore::new()));
    let coordinator = GenerationCoordinator::new(
        QuotaLedger::new(Arc::new(MemoryQuotaStore::new()), 10, clock.clone()),
        generator,
        executor,
        sessions.clone(),
        clock,
    );

    let err = coordinator
        .generate(GenerationRequest::new("judy", "Anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, ShoruiError::Storage(_)));

    let session = sessions.get("judy", 1).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure.as_deref(), Some("storage error"));
    assert!(session.generated_file.is_none());

    assert!(!store.exists("final.docx").await);
    assert_eq!(coordinator.usage("judy").await.unwrap().documents_generated, 1);
}
