//! Pure state machine for generation sessions
//!
//! No I/O and no async. Given a status and an event it returns the next
//! status.
//!
//! - Happy path: Requested -> Parsing -> Executing -> Completed
//! - `Fail` moves any non-terminal status to Failed
//! - An out-of-order event on a live session also fails it (never panics)
//! - Completed and Failed reject every event

use shorui_core::{Result, SessionStatus, ShoruiError};

/// Events that drive a session forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One unit of quota was reserved for this request
    QuotaReserved,
    /// The raw response yielded a filename and a snippet
    SnippetParsed,
    /// The snippet ran and left a non-empty artifact
    ArtifactVerified,
    /// Anything that ends the request early
    Fail { reason: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaReserved => write!(f, "quota_reserved"),
            Self::SnippetParsed => write!(f, "snippet_parsed"),
            Self::ArtifactVerified => write!(f, "artifact_verified"),
            Self::Fail { reason } => write!(f, "fail({})", reason),
        }
    }
}

/// Next status for `status` after `event`.
///
/// Terminal statuses return `InvalidTransition` and must be left unchanged
/// by the caller.
pub fn transition(status: SessionStatus, event: &SessionEvent) -> Result<SessionStatus> {
    use SessionEvent as E;
    use SessionStatus as S;

    match (status, event) {
        (S::Completed | S::Failed, _) => Err(ShoruiError::InvalidTransition(format!(
            "{} on terminal status {}",
            event, status
        ))),

        (S::Requested, E::QuotaReserved) => Ok(S::Parsing),
        (S::Parsing, E::SnippetParsed) => Ok(S::Executing),
        (S::Executing, E::ArtifactVerified) => Ok(S::Completed),
        (_, E::Fail { .. }) => Ok(S::Failed),

        (status, event) => {
            tracing::warn!("Out-of-order event {} in status {}; failing session", event, status);
            Ok(S::Failed)
        }
    }
}
