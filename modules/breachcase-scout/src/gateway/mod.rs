// Classifier gateway. Every call to the external classifier goes through here.
//
// Owns retry, sampling temperature and response parsing. Returns a tagged
// `GatewayFailure` instead of inventing a default; fallbacks are decided by
// the caller.

pub mod parse;
pub mod prompts;
pub mod retry;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use ai_client::{parse_json_payload, AiError, CompletionRequest, CompletionService};
use breachcase_common::{Article, CandidateRecord, IncidentDetail};

use crate::signals::MatchSignal;

pub use parse::{RelevanceVerdict, ResolutionVerdict};
pub use retry::{with_retry, RetryError, RetryPolicy};

const RELEVANCE_TEMPERATURE: f32 = 0.1;
const EXTRACTION_TEMPERATURE: f32 = 0.1;
const RESOLUTION_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum GatewayFailure {
    /// Local misconfiguration. Never retried; aborts the run.
    #[error("classifier misconfigured: {0}")]
    Fatal(AiError),

    #[error("classifier failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: AiError },

    /// The service refused the request outright (4xx other than rate limiting).
    #[error("classifier rejected request: {0}")]
    Rejected(AiError),

    #[error("unparseable classifier response: {0}")]
    Unparseable(String),
}

impl GatewayFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayFailure::Fatal(_))
    }
}

/// A stored incident as presented to the resolution classifier.
#[derive(Debug, Clone)]
pub struct CandidateContext<'a> {
    pub detail: &'a IncidentDetail,
    pub name_score: f64,
    pub strong_name_match: bool,
    pub signal: Option<&'a MatchSignal>,
}

/// Everything the resolution classifier sees for one candidate record.
#[derive(Debug, Clone)]
pub struct ResolutionContext<'a> {
    pub record: &'a CandidateRecord,
    pub article: &'a Article,
    pub candidates: Vec<CandidateContext<'a>>,
}

pub struct ClassifierGateway {
    service: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    classification_max_tokens: u32,
    extraction_max_tokens: u32,
}

impl ClassifierGateway {
    pub fn new(service: Arc<dyn CompletionService>, retry: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            classification_max_tokens: 300,
            extraction_max_tokens: 2000,
        }
    }

    pub fn with_max_tokens(mut self, classification: u32, extraction: u32) -> Self {
        self.classification_max_tokens = classification;
        self.extraction_max_tokens = extraction;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// One classifier round trip: retried transport, then JSON extraction.
    ///
    /// Content that cannot be parsed is returned as `Unparseable` without a
    /// retry; sampling is near-deterministic so a second attempt rarely helps.
    pub async fn classify(
        &self,
        label: &str,
        request: CompletionRequest,
    ) -> Result<Value, GatewayFailure> {
        let service = &self.service;
        let request = &request;

        let text = with_retry(self.retry, label, AiError::is_transient, move || async move {
            service.complete(request).await
        })
        .await
        .map_err(|e| match e {
            RetryError::Permanent { error, .. } if error.is_fatal() => GatewayFailure::Fatal(error),
            RetryError::Permanent { error, .. } => GatewayFailure::Rejected(error),
            RetryError::Exhausted { attempts, error } => GatewayFailure::Exhausted {
                attempts,
                last_error: error,
            },
        })?;

        debug!(op = label, chars = text.len(), "Classifier responded");
        parse_json_payload(&text).map_err(|e| GatewayFailure::Unparseable(e.to_string()))
    }

    /// Binary relevance screen on title and body.
    pub async fn classify_relevance(
        &self,
        article: &Article,
    ) -> Result<RelevanceVerdict, GatewayFailure> {
        let request = CompletionRequest::new(
            prompts::RELEVANCE_SYSTEM,
            prompts::relevance_prompt(article),
        )
        .temperature(RELEVANCE_TEMPERATURE)
        .max_tokens(self.classification_max_tokens);

        let value = self.classify("relevance", request).await?;
        let verdict = parse::relevance_verdict(&value).ok_or_else(|| {
            GatewayFailure::Unparseable("relevance response has no verdict".to_string())
        })?;

        info!(
            url = article.url.as_str(),
            is_breach = verdict.is_relevant,
            confidence = verdict.confidence,
            "Relevance classified"
        );
        Ok(verdict)
    }

    /// Structured extraction. The result is not validated here.
    pub async fn extract_incident(
        &self,
        article: &Article,
    ) -> Result<CandidateRecord, GatewayFailure> {
        let request = CompletionRequest::new(
            prompts::EXTRACTION_SYSTEM,
            prompts::extraction_prompt(article, Utc::now().date_naive()),
        )
        .temperature(EXTRACTION_TEMPERATURE)
        .max_tokens(self.extraction_max_tokens);

        let value = self.classify("extraction", request).await?;
        parse::candidate_record(&value).ok_or_else(|| {
            GatewayFailure::Unparseable("extraction response is not an object".to_string())
        })
    }

    /// Three-way resolution verdict, as reported by the classifier.
    pub async fn classify_resolution(
        &self,
        ctx: &ResolutionContext<'_>,
    ) -> Result<ResolutionVerdict, GatewayFailure> {
        let request = CompletionRequest::new(
            prompts::RESOLUTION_SYSTEM,
            prompts::resolution_prompt(ctx),
        )
        .temperature(RESOLUTION_TEMPERATURE)
        .max_tokens(self.classification_max_tokens);

        let value = self.classify("resolution", request).await?;
        parse::resolution_verdict(&value).ok_or_else(|| {
            GatewayFailure::Unparseable("resolution response has no classification".to_string())
        })
    }
}
