mod client;
pub(crate) mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{CompletionRequest, CompletionService};

use client::OpenAiClient;
use types::*;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// OpenAi (any OpenAI-compatible chat completions endpoint)
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> OpenAiClient {
        OpenAiClient::new(self.http.clone(), &self.api_key, &self.base_url, self.timeout)
    }
}

#[async_trait]
impl CompletionService for OpenAi {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError> {
        if self.api_key.trim().is_empty() {
            return Err(AiError::Config("API key is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(AiError::Config("model name is empty".to_string()));
        }

        let wire = ChatRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self.client().chat(&wire).await?;
        response.text().ok_or(AiError::EmptyResponse)
    }
}
