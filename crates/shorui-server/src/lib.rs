//! # shorui-server
//!
//! HTTP API for Shorui. Every route except `/api/health` identifies the
//! caller through the `x-user-id` header.
//!
//! | method | path                   |
//! |--------|------------------------|
//! | POST   | `/api/generate`        |
//! | GET    | `/documents/:filename` |
//! | GET    | `/api/usage`           |
//! | GET    | `/api/sessions`        |
//! | GET    | `/api/sessions/:id`    |
//! | GET    | `/api/health`          |

mod api;
mod server;

pub use api::{ApiError, GenerateBody, GenerateResponse, SessionView, UserHeader, USER_HEADER};
pub use server::{router, AppState, SharedState};

use shorui_core::ShoruiConfig;
use shorui_orchestrator::GenerationCoordinator;
use std::sync::Arc;
use tracing::info;

/// Open the stores named by `config` and serve on `config.server.bind`
pub async fn run(config: ShoruiConfig) -> anyhow::Result<()> {
    let coordinator = GenerationCoordinator::from_config(&config).await?;
    info!("Starting Shorui server on {}", config.server.bind);

    let state = Arc::new(AppState { coordinator });
    server::serve(state, &config.server.bind).await
}
