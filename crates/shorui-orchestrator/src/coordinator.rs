//! Generation coordinator
//!
//! Drives one request through quota reservation, text generation, parsing
//! and execution, recording each step on the session. See
//! [`crate::state_machine`] for the allowed status changes.

use serde::Serialize;
use shorui_agent::{parse_response_at, PromptOrchestrator, ResponseSource, TextGenerator};
use shorui_core::fail_open::fail_open;
use shorui_core::{
    Clock, GenerationRequest, GenerationSession, QuotaCounter, Result, SessionId, ShoruiConfig,
    ShoruiError, SystemClock,
};
use shorui_sandbox::{ArtifactInfo, ArtifactStore, EnvironmentStatus, ExecutionResult, SandboxExecutor};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::quota::{JsonFileQuotaStore, QuotaLedger, Reservation};
use crate::sessions::{FileSessionStore, SessionStore};
use crate::state_machine::{transition, SessionEvent};

/// What a successful request produced
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub session: GenerationSession,
    pub execution: ExecutionResult,
    /// Path under which the artifact is served
    pub download_url: String,
    pub source: ResponseSource,
}

/// Quota snapshot for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub user_id: String,
    pub documents_generated: u32,
    pub monthly_limit: u32,
    pub remaining: u32,
    pub reset_date: chrono::DateTime<chrono::Utc>,
}

impl From<QuotaCounter> for UsageReport {
    fn from(counter: QuotaCounter) -> Self {
        Self {
            remaining: counter.remaining(),
            user_id: counter.user_id,
            documents_generated: counter.documents_generated,
            monthly_limit: counter.monthly_limit,
            reset_date: counter.reset_date,
        }
    }
}

/// Download path for an artifact
pub fn download_url(filename: &str) -> String {
    format!("/documents/{}", filename)
}

pub struct GenerationCoordinator {
    ledger: QuotaLedger,
    generator: Arc<dyn TextGenerator>,
    executor: SandboxExecutor,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl GenerationCoordinator {
    pub fn new(
        ledger: QuotaLedger,
        generator: Arc<dyn TextGenerator>,
        executor: SandboxExecutor,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            generator,
            executor,
            sessions,
            clock,
        }
    }

    /// Open the file-backed stores named by `config` and wire everything up
    pub async fn from_config(config: &ShoruiConfig) -> Result<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let quota_store = JsonFileQuotaStore::open(config.quota_path()).await?;
        let ledger = QuotaLedger::new(Arc::new(quota_store), config.quota.monthly_limit, clock.clone());
        let sessions = FileSessionStore::open(config.sessions_path()).await?;

        let store = Arc::new(ArtifactStore::new(&config.storage.documents_dir).await?);
        let executor = SandboxExecutor::from_config(store, &config.sandbox);
        let generator = PromptOrchestrator::from_config(&config.service);
        info!(
            "Coordinator ready (documents: {:?}, service: {})",
            executor.store().root(),
            if generator.is_online() { "online" } else { "offline" }
        );

        Ok(Self::new(ledger, Arc::new(generator), executor, Arc::new(sessions), clock))
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        self.executor.store()
    }

    /// Run one request end to end.
    ///
    /// Quota is consumed once the reservation succeeds, whatever happens
    /// afterwards. Every failure after that point leaves the session Failed.
    #[instrument(skip(self, request), fields(user = %request.user_id))]
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        let request = request.validate()?;

        let counter = match self.ledger.try_reserve(&request.user_id).await? {
            Reservation::Allowed(counter) => counter,
            Reservation::Denied(counter) => {
                return Err(ShoruiError::QuotaExceeded {
                    user_id: counter.user_id,
                    used: counter.documents_generated,
                    limit: counter.monthly_limit,
                });
            }
        };
        info!(
            "Generating document for {:?} ({}/{})",
            request.topic, counter.documents_generated, counter.monthly_limit
        );

        let mut session = self
            .sessions
            .create(&request.user_id, &request.topic, self.clock.now())
            .await?;
        self.advance(&mut session, SessionEvent::QuotaReserved).await?;

        let raw = self.generator.generate(&request.topic).await;
        let snippet = match parse_response_at(&raw.text, self.clock.now()) {
            Ok(snippet) => snippet,
            Err(e) => {
                warn!(source = %raw.source, "Unusable response: {}\n{}", e, raw.text);
                return Err(self.fail(session, e).await);
            }
        };
        self.advance(&mut session, SessionEvent::SnippetParsed).await?;

        let execution = match self.executor.execute(&snippet).await {
            Ok(result) => result,
            Err(e) => return Err(self.fail(session, e).await),
        };
        if let Some(failure) = execution.failure.clone() {
            return Err(self.fail(session, ShoruiError::Execution(failure)).await);
        }

        let mut completed = session
            .clone()
            .with_artifact(&snippet.target_filename, &execution.artifact_path);
        completed.status = transition(completed.status, &SessionEvent::ArtifactVerified)?;
        completed.updated_at = self.clock.now();
        if let Err(e) = self.sessions.update(&completed).await {
            let store = self.executor.store().clone();
            let filename = snippet.target_filename.clone();
            fail_open("remove_unrecorded_artifact", || async move {
                store.remove(&filename).await
            })
            .await;
            return Err(self.fail(session, e).await);
        }

        info!(
            session = completed.id,
            "Document ready: {} ({} bytes, {})",
            snippet.target_filename,
            execution.size_bytes,
            raw.source
        );

        Ok(GenerationOutcome {
            download_url: download_url(&snippet.target_filename),
            session: completed,
            execution,
            source: raw.source,
        })
    }

    /// Apply a non-terminal step; the snapshot write is best effort
    async fn advance(&self, session: &mut GenerationSession, event: SessionEvent) -> Result<()> {
        session.status = transition(session.status, &event)?;
        session.updated_at = self.clock.now();

        let snapshot = session.clone();
        let sessions = self.sessions.clone();
        fail_open("session_snapshot", || async move { sessions.update(&snapshot).await }).await;
        Ok(())
    }

    /// Mark the session Failed and hand back the error that caused it
    async fn fail(&self, session: GenerationSession, cause: ShoruiError) -> ShoruiError {
        let reason = failure_reason(&cause);
        let mut failed = session.with_failure(reason.clone());

        match transition(failed.status, &SessionEvent::Fail { reason }) {
            Ok(status) => {
                failed.status = status;
                failed.updated_at = self.clock.now();
                if let Err(e) = self.sessions.update(&failed).await {
                    warn!("Could not record failed session {}: {}", failed.id, e);
                }
            }
            Err(e) => warn!("Session {} not failed: {}", failed.id, e),
        }

        warn!(session = failed.id, "Generation failed: {}", cause);
        cause
    }

    /// Current quota for a user
    pub async fn usage(&self, user_id: &str) -> Result<UsageReport> {
        Ok(self.ledger.get(user_id).await?.into())
    }

    /// A user's sessions, newest first
    pub async fn history(&self, user_id: &str) -> Result<Vec<GenerationSession>> {
        self.sessions.list_for_user(user_id).await
    }

    pub async fn session(&self, user_id: &str, id: SessionId) -> Result<GenerationSession> {
        self.sessions
            .get(user_id, id)
            .await?
            .ok_or_else(|| ShoruiError::NotFound(format!("session {}", id)))
    }

    /// Open an artifact for download
    pub async fn download(&self, filename: &str) -> Result<(tokio::fs::File, u64)> {
        let store = self.executor.store();
        let size = store.size(filename).await?;
        let file = store.open(filename).await?;
        Ok((file, size))
    }

    pub async fn documents(&self) -> Result<Vec<ArtifactInfo>> {
        self.executor.store().list().await
    }

    pub async fn check_environment(&self) -> Result<EnvironmentStatus> {
        self.executor.check_environment().await
    }
}

/// Short reason stored on a failed session; never raw interpreter output
fn failure_reason(err: &ShoruiError) -> String {
    match err {
        ShoruiError::Parse(msg) => msg.clone(),
        ShoruiError::Execution(failure) => failure.to_string(),
        ShoruiError::PathValidation(_) => "unsafe filename".to_string(),
        ShoruiError::Storage(_) | ShoruiError::Io(_) => "storage error".to_string(),
        _ => "internal error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shorui_core::ExecutionFailure;

    #[test]
    fn test_failure_reason_hides_details() {
        assert_eq!(
            failure_reason(&ShoruiError::Parse("no executable snippet found".into())),
            "no executable snippet found"
        );
        assert_eq!(
            failure_reason(&ShoruiError::PathValidation("../../etc/passwd".into())),
            "unsafe filename"
        );
        assert_eq!(
            failure_reason(&ShoruiError::Storage("/srv/documents/x.docx exists".into())),
            "storage error"
        );
        assert_eq!(
            failure_reason(&ShoruiError::Execution(ExecutionFailure::NonZeroExit { code: 1 })),
            ExecutionFailure::NonZeroExit { code: 1 }.to_string()
        );
        assert_eq!(failure_reason(&ShoruiError::Other("x".into())), "internal error");
    }

    #[test]
    fn test_usage_report_from_counter() {
        let now = chrono::Utc::now();
        let mut counter = QuotaCounter::new("alice", 10, now);
        counter.documents_generated = 4;

        let report = UsageReport::from(counter);
        assert_eq!(report.remaining, 6);
        assert_eq!(report.user_id, "alice");
    }

    #[test]
    fn test_download_url() {
        assert_eq!(download_url("report.docx"), "/documents/report.docx");
    }
}
