//! Shorui CLI - topic in, .docx out
//!
//! Usage:
//!   shorui init                               Write a default shorui.toml
//!   shorui serve                              Run the HTTP API
//!   shorui generate --user <id> --topic <t>   Generate one document
//!   shorui usage --user <id>                  Show a user's monthly quota
//!   shorui history --user <id>                List a user's sessions
//!   shorui documents                          List stored documents
//!   shorui doctor                             Check the local setup

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shorui_agent::resolve_api_key;
use shorui_core::config::CONFIG_FILE_NAME;
use shorui_core::fail_open::fail_open;
use shorui_core::{GenerationRequest, ShoruiConfig};
use shorui_orchestrator::GenerationCoordinator;
use shorui_sandbox::EnvironmentStatus;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "shorui")]
#[command(author, version, about = "Generate .docx documents from a topic")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ./shorui.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default shorui.toml
    Init {
        /// Directory to write into
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Run the HTTP API
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate one document
    Generate {
        #[arg(long)]
        user: String,

        #[arg(long)]
        topic: String,
    },

    /// Show a user's quota for the current month
    Usage {
        #[arg(long)]
        user: String,
    },

    /// List a user's generation sessions, newest first
    History {
        #[arg(long)]
        user: String,
    },

    /// List stored documents
    Documents,

    /// Check interpreter, python-docx, credential and storage
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json_logs, if cli.verbose { Level::DEBUG } else { Level::INFO });

    let config_path = cli.config;
    let config = || load_config(config_path.as_deref());

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Serve { bind } => cmd_serve(config()?, bind).await,
        Commands::Generate { user, topic } => cmd_generate(config()?, user, topic).await,
        Commands::Usage { user } => cmd_usage(config()?, &user).await,
        Commands::History { user } => cmd_history(config()?, &user).await,
        Commands::Documents => cmd_documents(config()?).await,
        Commands::Doctor => cmd_doctor(config()?).await,
    }
}

/// `RUST_LOG` wins; otherwise `level`
fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

fn load_config(explicit: Option<&Path>) -> Result<ShoruiConfig> {
    let config = match explicit {
        Some(path) => ShoruiConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ShoruiConfig::load_or_default(Path::new("."))
            .with_context(|| format!("Failed to load {}", CONFIG_FILE_NAME))?,
    };

    let config = config
        .with_env_overrides()
        .context("Invalid SHORUI_* environment override")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn coordinator(config: &ShoruiConfig) -> Result<GenerationCoordinator> {
    GenerationCoordinator::from_config(config)
        .await
        .context("Failed to open Shorui stores")
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    let target = path.join(CONFIG_FILE_NAME);
    if target.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", target.display());
    }

    let written = ShoruiConfig::write_default(path).context("Failed to write config")?;
    info!("Wrote default config to {:?}", written);

    println!("Initialized Shorui in {:?}", path);
    println!("Created:");
    println!("  {}", CONFIG_FILE_NAME);
    println!("\nNext steps:");
    println!("  1. Export PERPLEXITY_API_KEY (or run offline without it)");
    println!("  2. Run 'shorui doctor' to check python-docx");
    println!("  3. Run 'shorui serve' or 'shorui generate --user <id> --topic <text>'");
    Ok(())
}

async fn cmd_serve(mut config: ShoruiConfig, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    println!("Shorui API on http://{}", config.server.bind);
    println!("Press Ctrl+C to stop");
    shorui_server::run(config).await
}

async fn cmd_generate(config: ShoruiConfig, user: String, topic: String) -> Result<()> {
    let coordinator = coordinator(&config).await?;

    match coordinator.generate(GenerationRequest::new(user, topic)).await {
        Ok(outcome) => {
            let filename = outcome.session.generated_file.clone().unwrap_or_default();
            println!("Generated {}", filename);
            println!("  Session:  {}", outcome.session.id);
            println!("  Source:   {}", outcome.source);
            println!("  Size:     {} bytes", outcome.execution.size_bytes);
            println!("  Path:     {}", outcome.execution.artifact_path.display());
            println!("  Download: {}", outcome.download_url);
            Ok(())
        }
        Err(e) if e.is_rate_limited() || e.is_client_error() => {
            anyhow::bail!("{}", e.public_message())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Document generation failed")),
    }
}

async fn cmd_usage(config: ShoruiConfig, user: &str) -> Result<()> {
    let coordinator = coordinator(&config).await?;
    let report = coordinator.usage(user).await.context("Failed to read quota")?;

    println!("Usage for {}", report.user_id);
    println!("  Generated: {}/{}", report.documents_generated, report.monthly_limit);
    println!("  Remaining: {}", report.remaining);
    println!("  Resets:    {}", report.reset_date.format("%Y-%m-%d"));
    Ok(())
}

async fn cmd_history(config: ShoruiConfig, user: &str) -> Result<()> {
    let coordinator = coordinator(&config).await?;
    let sessions = coordinator.history(user).await.context("Failed to read sessions")?;

    if sessions.is_empty() {
        println!("No sessions for {}", user);
        return Ok(());
    }

    println!("Sessions for {}:", user);
    for s in sessions {
        let detail = s
            .generated_file
            .clone()
            .or_else(|| s.failure.clone())
            .unwrap_or_default();
        println!(
            "  #{:<4} {:<10} {}  {}",
            s.id,
            s.status.to_string(),
            s.created_at.format("%Y-%m-%d %H:%M"),
            s.topic
        );
        if !detail.is_empty() {
            println!("        {}", detail);
        }
    }
    Ok(())
}

async fn cmd_documents(config: ShoruiConfig) -> Result<()> {
    let coordinator = coordinator(&config).await?;
    let documents = coordinator.documents().await.context("Failed to list documents")?;

    if documents.is_empty() {
        println!("No documents in {:?}", coordinator.store().root());
        return Ok(());
    }

    println!("Documents in {:?}:", coordinator.store().root());
    for doc in documents {
        println!(
            "  {:<50} {:>10} bytes  {}",
            doc.filename,
            doc.size_bytes,
            doc.modified.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn cmd_doctor(config: ShoruiConfig) -> Result<()> {
    println!("Shorui Doctor");
    println!("=============");

    match resolve_api_key(&config.service.api_key_env) {
        Ok(_) => println!("[ok]   {} is set; service mode", config.service.api_key_env),
        Err(_) => println!(
            "[warn] {} is not set; offline generator only",
            config.service.api_key_env
        ),
    }

    let coordinator = coordinator(&config).await?;
    println!("[ok]   documents: {:?}", coordinator.store().root());
    println!("[ok]   data: {:?}", config.storage.data_dir);

    let status = fail_open("environment_check", || coordinator.check_environment()).await;
    let healthy = match status {
        Some(EnvironmentStatus::Ready) => {
            println!("[ok]   {} can import python-docx", config.sandbox.interpreter);
            true
        }
        Some(EnvironmentStatus::InterpreterMissing) => {
            println!("[fail] interpreter {:?} not found", config.sandbox.interpreter);
            false
        }
        Some(EnvironmentStatus::LibraryMissing(stderr)) => {
            println!("[fail] python-docx missing: {}", stderr.lines().last().unwrap_or(""));
            println!("       pip install python-docx");
            false
        }
        None => {
            println!("[fail] interpreter check did not finish");
            false
        }
    };

    if !healthy {
        anyhow::bail!("Environment is not ready for document generation");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate_with_global_flags() {
        let cli = Cli::try_parse_from([
            "shorui",
            "generate",
            "--user",
            "alice",
            "--topic",
            "Business Proposal",
            "--verbose",
            "--config",
            "custom.toml",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Commands::Generate { user, topic } => {
                assert_eq!(user, "alice");
                assert_eq!(topic, "Business Proposal");
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_generate_requires_user() {
        assert!(Cli::try_parse_from(["shorui", "generate", "--topic", "x"]).is_err());
    }
}
