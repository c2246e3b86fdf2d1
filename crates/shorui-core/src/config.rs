//! Configuration management for Shorui
//!
//! Settings come from `shorui.toml` (or an explicit path) with serde
//! defaults for every field. `SHORUI_*` environment variables are applied
//! on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, ShoruiError};

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "shorui.toml";

/// Credential value shipped in sample env files; treated as unset
pub const PLACEHOLDER_API_KEY: &str = "your-perplexity-api-key";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoruiConfig {
    /// External text-generation service
    #[serde(default)]
    pub service: ServiceConfig,

    /// Snippet execution
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Chat-completions endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the bearer credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Subprocess settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Arguments placed before the scratch file path
    #[serde(default)]
    pub interpreter_args: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Cap per stream; output past this is discarded
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Limit given to users on first access
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Artifact store root
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// Quota and session records
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

// Default value providers
fn default_endpoint() -> String {
    "https://api.perplexity.ai/chat/completions".to_string()
}

fn default_model() -> String {
    "llama-3.1-sonar-large-128k-online".to_string()
}

fn default_api_key_env() -> String {
    "PERPLEXITY_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_monthly_limit() -> u32 {
    10
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("documents")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: Vec::new(),
            execution_timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_limit: default_monthly_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for ShoruiConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            sandbox: SandboxConfig::default(),
            quota: QuotaConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ShoruiConfig {
    /// Load `shorui.toml` from `dir`, or defaults if it does not exist
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load an explicit config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            ShoruiError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Write default configuration to `dir/shorui.toml`
    pub fn write_default(dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let config_path = dir.join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| ShoruiError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Apply `SHORUI_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHORUI_ENDPOINT") {
            self.service.endpoint = v;
        }
        if let Some(v) = lookup("SHORUI_MODEL") {
            self.service.model = v;
        }
        if let Some(v) = lookup("SHORUI_REQUEST_TIMEOUT_SECS") {
            self.service.request_timeout_secs = parse_number("SHORUI_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SHORUI_PYTHON") {
            self.sandbox.interpreter = v;
        }
        if let Some(v) = lookup("SHORUI_EXECUTION_TIMEOUT_SECS") {
            self.sandbox.execution_timeout_secs =
                parse_number("SHORUI_EXECUTION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SHORUI_MONTHLY_LIMIT") {
            self.quota.monthly_limit = parse_number("SHORUI_MONTHLY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SHORUI_DOCUMENTS_DIR") {
            self.storage.documents_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHORUI_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHORUI_BIND") {
            self.server.bind = v;
        }
        Ok(self)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.service.request_timeout_secs == 0 {
            return Err(ShoruiError::Config(
                "service.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.execution_timeout_secs == 0 {
            return Err(ShoruiError::Config(
                "sandbox.execution_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(ShoruiError::Config(
                "sandbox.max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(ShoruiError::Config("sandbox.interpreter is empty".to_string()));
        }
        Ok(())
    }

    /// Path of the quota ledger file
    pub fn quota_path(&self) -> PathBuf {
        self.storage.data_dir.join("usage_limits.json")
    }

    /// Path of the session log
    pub fn sessions_path(&self) -> PathBuf {
        self.storage.data_dir.join("generation_sessions.jsonl")
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ShoruiError::Config(format!("{} must be a number, got {:?}", key, value)))
}
