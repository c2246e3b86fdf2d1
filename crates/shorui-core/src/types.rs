//! Core type definitions for the generation pipeline

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Result, ShoruiError};

/// Verified user identifier supplied by the caller
pub type UserId = String;

/// Per-user session sequence number, starting at 1
pub type SessionId = u64;

/// Lifecycle of a generation session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Requested,
    Parsing,
    Executing,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Completed and Failed sessions never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Parsing => write!(f, "parsing"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requested" => Ok(Self::Requested),
            "parsing" => Ok(Self::Parsing),
            "executing" => Ok(Self::Executing),
            "completed" | "complete" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// How a snippet run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    Success,
    Timeout,
    NonZeroExit,
    InterpreterMissing,
    Crashed,
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::NonZeroExit => write!(f, "non_zero_exit"),
            Self::InterpreterMissing => write!(f, "interpreter_missing"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

/// Reason a run did not produce an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFailure {
    InterpreterMissing,
    Timeout,
    NonZeroExit { code: i32 },
    Crashed,
    /// Exit status was clean but no non-empty artifact appeared
    ArtifactMissing,
}

impl ExecutionFailure {
    pub fn exit_kind(&self) -> ExitKind {
        match self {
            Self::InterpreterMissing => ExitKind::InterpreterMissing,
            Self::Timeout => ExitKind::Timeout,
            Self::NonZeroExit { .. } => ExitKind::NonZeroExit,
            Self::Crashed | Self::ArtifactMissing => ExitKind::Crashed,
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InterpreterMissing => write!(f, "interpreter not installed"),
            Self::Timeout => write!(f, "execution timed out"),
            Self::NonZeroExit { code } => write!(f, "process exited with code {}", code),
            Self::Crashed => write!(f, "process terminated abnormally"),
            Self::ArtifactMissing => write!(f, "process exited cleanly but produced no artifact"),
        }
    }
}

/// A user's document counter for the current quota period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub user_id: UserId,
    pub documents_generated: u32,
    pub monthly_limit: u32,
    /// First instant of the next quota period
    pub reset_date: DateTime<Utc>,
}

impl QuotaCounter {
    /// Fresh counter for a user seen for the first time
    pub fn new(user_id: impl Into<UserId>, monthly_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            documents_generated: 0,
            monthly_limit,
            reset_date: first_of_next_month(now),
        }
    }

    /// Start a new period if `now` has reached the reset date.
    ///
    /// Returns true when the counter changed.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.reset_date {
            return false;
        }
        self.documents_generated = 0;
        self.reset_date = first_of_next_month(now);
        true
    }

    pub fn has_capacity(&self) -> bool {
        self.documents_generated < self.monthly_limit
    }

    pub fn remaining(&self) -> u32 {
        self.monthly_limit.saturating_sub(self.documents_generated)
    }
}

/// Midnight UTC on the first day of the month after `now`
pub fn first_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|| now + Duration::days(31))
}

/// Record of one generation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub topic: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Short failure reason, never raw interpreter output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationSession {
    pub fn new(
        id: SessionId,
        user_id: impl Into<UserId>,
        topic: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            topic: topic.into(),
            status: SessionStatus::Requested,
            generated_file: None,
            file_path: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_artifact(mut self, filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.generated_file = Some(filename.into());
        self.file_path = Some(path.into());
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

/// Incoming generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_id: UserId,
    pub topic: String,
}

impl GenerationRequest {
    pub fn new(user_id: impl Into<UserId>, topic: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topic: topic.into(),
        }
    }

    /// Trim the topic and reject empty input
    pub fn validate(self) -> Result<Self> {
        let user_id = self.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(ShoruiError::Validation("User id is required".to_string()));
        }

        let topic = self.topic.trim().to_string();
        if topic.is_empty() {
            return Err(ShoruiError::Validation("Topic is required".to_string()));
        }

        Ok(Self { user_id, topic })
    }
}

/// How the target filename was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilenameOrigin {
    /// Decoded from a `{"filename": ...}` object
    Model,
    /// Synthesized because none was present
    Generated,
}

/// Which decoding stage found the code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeOrigin {
    Fenced,
    Heuristic,
}

/// Filename and source extracted from a raw response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSnippet {
    /// Bare filename, already checked for path safety
    pub target_filename: String,
    /// Non-empty source to execute
    pub source_code: String,
    pub filename_origin: FilenameOrigin,
    pub code_origin: CodeOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_session_status_roundtrip() {
        for status in [
            SessionStatus::Requested,
            SessionStatus::Parsing,
            SessionStatus::Executing,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            let parsed: SessionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("running".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Requested.is_terminal());
        assert!(!SessionStatus::Executing.is_terminal());
    }

    #[test]
    fn test_first_of_next_month() {
        assert_eq!(first_of_next_month(at(2024, 3, 15, 10)), at(2024, 4, 1, 0));
        assert_eq!(first_of_next_month(at(2024, 12, 31, 23)), at(2025, 1, 1, 0));
        assert_eq!(first_of_next_month(at(2024, 1, 1, 0)), at(2024, 2, 1, 0));
    }

    #[test]
    fn test_counter_rolls_over_at_reset_date() {
        let mut counter = QuotaCounter::new("u1", 5, at(2024, 3, 15, 10));
        counter.documents_generated = 4;

        assert!(!counter.roll_over(at(2024, 3, 31, 23)));
        assert_eq!(counter.documents_generated, 4);

        let previous = counter.reset_date;
        assert!(counter.roll_over(at(2024, 4, 1, 0)));
        assert_eq!(counter.documents_generated, 0);
        assert!(counter.reset_date > previous);
        assert_eq!(counter.reset_date, at(2024, 5, 1, 0));
    }

    #[test]
    fn test_counter_skips_missed_periods() {
        let mut counter = QuotaCounter::new("u1", 5, at(2024, 1, 10, 0));
        counter.documents_generated = 5;

        assert!(counter.roll_over(at(2024, 6, 20, 0)));
        assert_eq!(counter.reset_date, at(2024, 7, 1, 0));
        assert!(counter.has_capacity());
        assert_eq!(counter.remaining(), 5);
    }

    #[test]
    fn test_execution_failure_kinds() {
        assert_eq!(ExecutionFailure::ArtifactMissing.exit_kind(), ExitKind::Crashed);
        assert_eq!(
            ExecutionFailure::NonZeroExit { code: 2 }.exit_kind(),
            ExitKind::NonZeroExit
        );
        assert_eq!(
            ExecutionFailure::NonZeroExit { code: 2 }.to_string(),
            "process exited with code 2"
        );
    }

    #[test]
    fn test_request_validation() {
        let req = GenerationRequest::new("u1", "  Business Proposal \n")
            .validate()
            .unwrap();
        assert_eq!(req.topic, "Business Proposal");

        let err = GenerationRequest::new("u1", "   ").validate().unwrap_err();
        assert!(matches!(err, ShoruiError::Validation(msg) if msg == "Topic is required"));

        assert!(GenerationRequest::new("", "topic").validate().is_err());
    }

    #[test]
    fn test_session_serialization_omits_empty_fields() {
        let session = GenerationSession::new(1, "u1", "Report", at(2024, 3, 1, 9));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "requested");
        assert!(json.get("generated_file").is_none());

        let done = session.with_artifact("report.docx", "/tmp/report.docx");
        let json = serde_json::to_string(&done).unwrap();
        let back: GenerationSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.generated_file.as_deref(), Some("report.docx"));
    }
}
