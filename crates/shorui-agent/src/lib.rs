//! # shorui-agent
//!
//! Everything between a topic and a runnable snippet:
//! - Chat-completions client with a per-instance circuit breaker
//! - Deterministic offline generator used whenever the service is unusable
//! - Two-stage response parser producing a `ParsedSnippet`
//!
//! ## Textual contract
//!
//! Both the service and the offline generator answer with a JSON object
//! carrying a `filename` field followed by a fenced Python block that builds
//! the document with python-docx. The parser only ever sees that contract,
//! so it has no separate path for "no service configured".

mod auth;
mod circuit_breaker;
mod client;
pub mod offline;
pub mod parser;
pub mod prompt;
mod types;

pub use auth::resolve_api_key;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{CompletionService, HttpCompletionService, PromptOrchestrator, TextGenerator};
pub use offline::OfflineGenerator;
pub use parser::{parse_response, parse_response_at};
pub use types::*;
