//! # shorui-core
//!
//! Core types for the Shorui document-generation pipeline.
//!
//! A request carries a user and a free-text topic. The pipeline reserves one
//! unit of the user's monthly quota, asks a text-generation service for a
//! filename and a document-building snippet, runs that snippet in a bounded
//! subprocess and registers the resulting artifact.
//!
//! This crate holds the pieces every stage shares: the error taxonomy,
//! configuration, session and quota records, filename rules and the clock
//! abstraction used for quota periods.

pub mod clock;
pub mod config;
mod error;
pub mod fail_open;
pub mod filename;
pub mod python;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ShoruiConfig;
pub use error::{Result, ShoruiError, GENERIC_FAILURE_MESSAGE};
pub use types::*;
