//! Chat-completions client and prompt orchestration
//!
//! The orchestrator never fails: any problem with the service (missing
//! credential, transport error, non-2xx status, timeout, empty reply, open
//! circuit) degrades to the offline generator.

use async_trait::async_trait;
use shorui_core::config::ServiceConfig;
use shorui_core::{Result, ShoruiError};
use std::sync::Arc;
use std::time::Duration;

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::offline::OfflineGenerator;
use crate::prompt::{build_user_prompt, SYSTEM_PROMPT};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, RawModelResponse, ResponseSource};

/// Something that can answer a chat-completions request
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Produces raw response text for a topic
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, topic: &str) -> RawModelResponse;
}

/// OpenAI-compatible chat-completions endpoint over HTTPS
#[derive(Debug, Clone)]
pub struct HttpCompletionService {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpCompletionService {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShoruiError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        tracing::debug!("Sending completion request to {}", self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ShoruiError::Api(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(ShoruiError::Api(format!(
                "Service error {}: {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ShoruiError::Api(format!("Failed to parse response: {}", e)))?;

        body.first_content()
            .map(str::to_string)
            .ok_or_else(|| ShoruiError::Api("No choices in response".to_string()))
    }
}

/// Calls the service when one is configured, otherwise the offline generator
pub struct PromptOrchestrator {
    service: Option<Arc<dyn CompletionService>>,
    model: String,
    request_timeout: Duration,
    breaker: CircuitBreaker,
    fallback: OfflineGenerator,
}

impl PromptOrchestrator {
    pub fn new(
        service: Option<Arc<dyn CompletionService>>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            model: model.into(),
            request_timeout,
            breaker: CircuitBreaker::default(),
            fallback: OfflineGenerator::new(),
        }
    }

    /// Orchestrator that only ever uses the offline generator
    pub fn offline() -> Self {
        Self::new(None, String::new(), Duration::from_secs(30))
    }

    /// Build from configuration; a missing credential means offline mode
    pub fn from_config(config: &ServiceConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let service: Option<Arc<dyn CompletionService>> =
            match auth::resolve_api_key(&config.api_key_env) {
                Ok(key) => match HttpCompletionService::new(&config.endpoint, key, timeout) {
                    Ok(service) => Some(Arc::new(service)),
                    Err(e) => {
                        tracing::warn!("Text-generation service disabled: {}", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::info!("No service credential ({}), using offline generator", e);
                    None
                }
            };

        Self::new(service, config.model.clone(), timeout)
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// True when a service is configured
    pub fn is_online(&self) -> bool {
        self.service.is_some()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn call_service(&self, service: &dyn CompletionService, topic: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_user_prompt(topic)),
            ],
        };

        let result = match tokio::time::timeout(self.request_timeout, service.complete(&request)).await {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(ShoruiError::Api("Empty response from service".to_string()))
            }
            Ok(result) => result,
            Err(_) => Err(ShoruiError::Api(format!(
                "Service did not answer within {:?}",
                self.request_timeout
            ))),
        };

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => {
                self.breaker.record_failure();
                tracing::debug!(
                    "Circuit breaker: recorded failure (count: {})",
                    self.breaker.failure_count()
                );
            }
        }
        result
    }
}

#[async_trait]
impl TextGenerator for PromptOrchestrator {
    async fn generate(&self, topic: &str) -> RawModelResponse {
        if let Some(service) = &self.service {
            if !self.breaker.can_execute() {
                tracing::warn!(
                    "Circuit breaker is open ({}s left), using offline generator",
                    self.breaker.time_until_retry().as_secs()
                );
            } else {
                match self.call_service(service.as_ref(), topic).await {
                    Ok(text) => {
                        tracing::info!("Service response received ({} chars)", text.len());
                        return RawModelResponse::new(text, ResponseSource::Service);
                    }
                    Err(e) => {
                        tracing::warn!("Service call failed, using offline generator: {}", e);
                    }
                }
            }
        }

        self.fallback.generate(topic).await
    }
}
