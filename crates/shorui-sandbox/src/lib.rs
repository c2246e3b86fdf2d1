//! # shorui-sandbox
//!
//! Where snippets run and artifacts live.
//!
//! - [`ArtifactStore`]: one root directory, bare filenames only, atomic
//!   writes and streaming opens for downloads
//! - [`SandboxExecutor`]: rewrites the snippet's save path into the store,
//!   runs it in a subprocess pinned to the store root under a deadline and
//!   classifies the outcome
//!
//! ## Limits
//!
//! The executor bounds time, output and working directory. It does not
//! restrict what the interpreter may touch on the filesystem or network;
//! run the service under a dedicated user or container for that.

mod executor;
mod store;

pub use executor::{EnvironmentStatus, ExecutionResult, SandboxExecutor};
pub use store::{ArtifactInfo, ArtifactStore, SCRATCH_DIR};
