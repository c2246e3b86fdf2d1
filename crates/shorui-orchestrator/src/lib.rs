//! # shorui-orchestrator
//!
//! Request-level coordination for Shorui.
//!
//! This crate provides:
//! - Quota ledger with atomic per-user reservation and monthly rollover
//! - Session records with in-memory and JSONL-backed stores
//! - Pure session state machine
//! - `GenerationCoordinator`, which ties the agent and sandbox crates
//!   together for one request

mod coordinator;
pub mod quota;
pub mod sessions;
pub mod state_machine;

pub use coordinator::{download_url, GenerationCoordinator, GenerationOutcome, UsageReport};
pub use quota::{JsonFileQuotaStore, MemoryQuotaStore, QuotaLedger, QuotaStore, Reservation};
pub use sessions::{FileSessionStore, MemorySessionStore, SessionStore};
pub use state_machine::{transition, SessionEvent};
