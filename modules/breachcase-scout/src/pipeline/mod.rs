// Run orchestration: relevance → extraction → resolution → write → checkpoint.
//
// Articles are handled strictly one at a time so that an incident created for
// one article is in the candidate index before the next article is resolved.
// Cancellation is honoured only between articles.

pub mod stats;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use ai_client::AiError;
use breachcase_common::{
    Article, CandidateRecord, Config, IncidentStub, Outcome, ResolutionDecision, ResolutionPolicy,
};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::gateway::{with_retry, ClassifierGateway, GatewayFailure, RetryPolicy};
use crate::index::CandidateIndex;
use crate::resolution::{ResolutionEngine, ResolveError};
use crate::traits::{IncidentStore, IncidentUpdate};

pub use stats::RunStats;

/// Failures that stop the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("classifier misconfigured: {0}")]
    Classifier(AiError),

    #[error("failed to load candidate index: {0}")]
    IndexLoad(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run the binary relevance screen before extraction.
    pub relevance_screen: bool,
    pub relevance_threshold: f64,
    /// Resolve and log, but write nothing to the store or the checkpoint.
    pub dry_run: bool,
    pub stub_page_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            relevance_screen: true,
            relevance_threshold: 0.6,
            dry_run: false,
            stub_page_size: 1000,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            relevance_screen: config.enable_classification,
            relevance_threshold: config.classification_confidence_threshold,
            dry_run: false,
            stub_page_size: config.stub_page_size,
        }
    }
}

/// State owned by one run and threaded through every stage.
pub struct RunContext {
    pub index: CandidateIndex,
    pub stats: RunStats,
}

/// Whether an article's outcome is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Checkpoint it; never look at it again.
    Terminal,
    /// Transient failure; leave it for the next run.
    Retryable,
}

pub struct Pipeline {
    store: Arc<dyn IncidentStore>,
    gateway: Arc<ClassifierGateway>,
    engine: ResolutionEngine,
    checkpoint: CheckpointStore,
    options: PipelineOptions,
    write_retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        gateway: Arc<ClassifierGateway>,
        checkpoint: CheckpointStore,
        policy: ResolutionPolicy,
        options: PipelineOptions,
    ) -> Self {
        let engine = ResolutionEngine::new(gateway.clone(), store.clone(), policy);
        let write_retry = gateway.retry_policy();
        Self {
            store,
            gateway,
            engine,
            checkpoint,
            options,
            write_retry,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to request a stop before the next article.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub async fn run(&mut self, articles: Vec<Article>) -> Result<RunStats, PipelineError> {
        let mut stats = RunStats {
            articles_in: articles.len() as u32,
            ..RunStats::default()
        };

        let mut seen_urls = HashSet::new();
        let mut pending = Vec::new();
        for article in articles {
            let url = article.url.trim();
            if url.is_empty() || url.contains(['\n', '\r']) {
                warn!(title = article.title.as_str(), "Article has no usable URL, skipping");
                stats.rejected += 1;
                continue;
            }
            if !seen_urls.insert(url.to_string()) {
                continue;
            }
            if self.checkpoint.contains(url) {
                stats.already_processed += 1;
                continue;
            }
            pending.push(article);
        }
        stats.articles_new = pending.len() as u32;

        info!(
            articles_in = stats.articles_in,
            new = stats.articles_new,
            already_processed = stats.already_processed,
            dry_run = self.options.dry_run,
            "Starting resolution run"
        );

        if pending.is_empty() {
            return Ok(stats);
        }

        let index = CandidateIndex::load(self.store.as_ref(), self.options.stub_page_size)
            .await
            .map_err(PipelineError::IndexLoad)?;
        let mut ctx = RunContext { index, stats };

        for article in &pending {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Stop requested, ending run before next article");
                ctx.stats.interrupted = true;
                break;
            }

            let url = article.url.trim();
            // An overlapping run may have finished this article since we started.
            if self.checkpoint.is_processed(url)? {
                ctx.stats.already_processed += 1;
                continue;
            }

            match self.process(&mut ctx, article).await? {
                Disposition::Terminal => self.commit(url)?,
                Disposition::Retryable => {
                    info!(url, "Transient failure, leaving for the next run");
                }
            }
        }

        Ok(ctx.stats)
    }

    fn commit(&mut self, url: &str) -> Result<(), PipelineError> {
        if self.options.dry_run {
            return Ok(());
        }
        self.checkpoint.record(url)?;
        Ok(())
    }

    async fn process(
        &self,
        ctx: &mut RunContext,
        article: &Article,
    ) -> Result<Disposition, PipelineError> {
        let url = article.url.as_str();

        // Stage 1: relevance
        if self.options.relevance_screen {
            let relevant = match self.gateway.classify_relevance(article).await {
                Ok(verdict) => {
                    verdict.is_relevant && verdict.confidence >= self.options.relevance_threshold
                }
                Err(GatewayFailure::Fatal(e)) => return Err(PipelineError::Classifier(e)),
                Err(failure) => {
                    warn!(url, error = %failure, "Relevance screen failed, treating as not relevant");
                    ctx.stats.classifier_fallbacks += 1;
                    false
                }
            };
            if !relevant {
                info!(url, "Not a security incident, skipping");
                ctx.stats.classified_irrelevant += 1;
                return Ok(Disposition::Terminal);
            }
            ctx.stats.classified_relevant += 1;
        }

        // Stage 2: extraction
        let mut record = match self.gateway.extract_incident(article).await {
            Ok(record) => record,
            Err(GatewayFailure::Fatal(e)) => return Err(PipelineError::Classifier(e)),
            Err(failure) => {
                error!(url, error = %failure, "Extraction failed");
                ctx.stats.errors += 1;
                return Ok(Disposition::Terminal);
            }
        };

        if record.organization_name.trim().is_empty() {
            if let Some(hint) = article
                .organization_name_hint
                .as_deref()
                .filter(|h| !h.trim().is_empty())
            {
                record.organization_name = hint.trim().to_string();
            }
        }

        if let Err(e) = record.validate() {
            warn!(url, error = %e, "Rejecting extraction");
            ctx.stats.rejected += 1;
            return Ok(Disposition::Terminal);
        }

        // Stage 3: resolution
        let decision = match self.engine.resolve(&record, article, &ctx.index).await {
            Ok(decision) => decision,
            Err(ResolveError::Fatal(e)) => return Err(PipelineError::Classifier(e)),
            Err(ResolveError::Store(e)) => {
                error!(url, error = %e, "Could not load candidate details");
                ctx.stats.errors += 1;
                return Ok(Disposition::Retryable);
            }
        };
        if decision.audit().classifier_failure.is_some() {
            ctx.stats.classifier_fallbacks += 1;
        }

        // Stage 4: write
        self.write(ctx, &record, article, &decision).await
    }

    async fn write(
        &self,
        ctx: &mut RunContext,
        record: &CandidateRecord,
        article: &Article,
        decision: &ResolutionDecision,
    ) -> Result<Disposition, PipelineError> {
        let url = article.url.as_str();
        let store = &self.store;

        if self.options.dry_run {
            info!(
                url,
                classification = %decision.classification(),
                related_id = decision.related_id().map(|id| id.as_str()),
                confidence = decision.confidence(),
                reasoning = decision.reasoning(),
                "Dry run, not writing"
            );
            return Ok(Disposition::Terminal);
        }

        match decision.outcome() {
            Outcome::New => {
                let inserted = with_retry(self.write_retry, "insert_incident", |_| true, move || {
                    async move { store.insert_incident(record, article).await }
                })
                .await;

                match inserted {
                    Ok(id) => {
                        info!(
                            url,
                            id = id.as_str(),
                            company = record.organization_name.as_str(),
                            "Created incident"
                        );
                        ctx.index.push(IncidentStub {
                            id,
                            organization_name: record.organization_name.clone(),
                        });
                        ctx.stats.incidents_created += 1;
                    }
                    Err(e) => {
                        let attempts = e.attempts();
                        let err = e.into_inner();
                        error!(url, attempts, error = %err, "Failed to insert incident");
                        ctx.stats.errors += 1;
                        return Ok(Disposition::Retryable);
                    }
                }
            }
            Outcome::GenuineUpdate {
                related_id,
                update_type,
                update_summary,
            } => {
                let update = IncidentUpdate {
                    incident_id: related_id.clone(),
                    update_type: *update_type,
                    description: update_summary
                        .clone()
                        .unwrap_or_else(|| article.title.clone()),
                    source_url: article.url.clone(),
                    source_title: article.title.clone(),
                    source_published_at: article.published_at,
                    confidence: decision.confidence(),
                    reasoning: decision.reasoning().to_string(),
                };
                let update = &update;

                let inserted = with_retry(self.write_retry, "insert_update", |_| true, move || {
                    async move { store.insert_update(update).await }
                })
                .await;

                match inserted {
                    Ok(()) => {
                        info!(
                            url,
                            incident_id = related_id.as_str(),
                            update_type = %update_type,
                            "Recorded update"
                        );
                        ctx.stats.updates_created += 1;
                    }
                    Err(e) => {
                        let attempts = e.attempts();
                        let err = e.into_inner();
                        error!(url, attempts, error = %err, "Failed to insert update");
                        ctx.stats.errors += 1;
                        return Ok(Disposition::Retryable);
                    }
                }
            }
            Outcome::DuplicateSource { related_id } => {
                info!(url, incident_id = related_id.as_str(), "Duplicate source, skipping");
                ctx.stats.duplicates_skipped += 1;
            }
        }

        Ok(Disposition::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        article, extraction_reply, relevance_reply, MockIncidentStore, Scripted,
        ScriptedCompletion,
    };

    fn pipeline(
        store: &Arc<MockIncidentStore>,
        script: &Arc<ScriptedCompletion>,
        dir: &tempfile::TempDir,
        options: PipelineOptions,
    ) -> Pipeline {
        let checkpoint = CheckpointStore::open(dir.path().join("processed_ids.txt")).unwrap();
        let gateway = Arc::new(ClassifierGateway::new(
            script.clone(),
            RetryPolicy::immediate(3),
        ));
        Pipeline::new(
            store.clone(),
            gateway,
            checkpoint,
            ResolutionPolicy::default(),
            options,
        )
    }

    #[tokio::test]
    async fn irrelevant_article_is_checkpointed_without_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(relevance_reply(
            false, 0.9,
        ))]));
        let mut p = pipeline(&store, &script, &dir, PipelineOptions::default());

        let stats = p
            .run(vec![article("https://example.com/tips", "Ten password tips")])
            .await
            .unwrap();

        assert_eq!(stats.classified_irrelevant, 1);
        assert_eq!(script.calls(), 1);
        assert!(p.checkpoint().contains("https://example.com/tips"));
    }

    #[tokio::test]
    async fn low_confidence_relevance_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(relevance_reply(
            true, 0.4,
        ))]));
        let mut p = pipeline(&store, &script, &dir, PipelineOptions::default());

        let stats = p
            .run(vec![article("https://example.com/maybe", "Possible leak")])
            .await
            .unwrap();
        assert_eq!(stats.classified_irrelevant, 1);
        assert_eq!(stats.incidents_created, 0);
    }

    #[tokio::test]
    async fn invalid_extraction_is_rejected_and_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([
            Scripted::Reply(relevance_reply(true, 0.9)),
            Scripted::Reply("{\"company\": \"Acme\"}".into()),
        ]));
        let mut p = pipeline(&store, &script, &dir, PipelineOptions::default());

        let stats = p
            .run(vec![article("https://example.com/acme", "Acme breach")])
            .await
            .unwrap();
        assert_eq!(stats.rejected, 1);
        assert!(store.incidents().is_empty());
        assert!(p.checkpoint().contains("https://example.com/acme"));
    }

    #[tokio::test]
    async fn organization_hint_fills_missing_company() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(
            "{\"summary\": \"A hospital chain lost patient data.\"}".into(),
        )]));
        let options = PipelineOptions {
            relevance_screen: false,
            ..PipelineOptions::default()
        };
        let mut p = pipeline(&store, &script, &dir, options);

        let mut input = article("https://example.com/h", "Hospital breach");
        input.organization_name_hint = Some("Mercy Health".into());
        let stats = p.run(vec![input]).await.unwrap();

        assert_eq!(stats.incidents_created, 1);
        assert_eq!(store.incidents()[0].detail.organization_name, "Mercy Health");
    }

    #[tokio::test]
    async fn store_write_exhaustion_is_not_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new().failing_writes(3));
        let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(extraction_reply(
            "Acme Corp",
            Some(1000),
            Some("ransomware"),
        ))]));
        let options = PipelineOptions {
            relevance_screen: false,
            ..PipelineOptions::default()
        };
        let mut p = pipeline(&store, &script, &dir, options);

        let stats = p
            .run(vec![article("https://example.com/acme", "Acme breach")])
            .await
            .unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(store.insert_calls(), 3);
        assert!(!p.checkpoint().contains("https://example.com/acme"));
    }

    #[tokio::test]
    async fn fatal_classifier_error_aborts_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::repeating(Scripted::Config(
            "DEEPSEEK_API_KEY missing".into(),
        )));
        let mut p = pipeline(&store, &script, &dir, PipelineOptions::default());

        let err = p
            .run(vec![article("https://example.com/acme", "Acme breach")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Classifier(_)));
        assert!(p.checkpoint().is_empty());
    }

    #[tokio::test]
    async fn revoked_api_key_aborts_instead_of_skipping_articles() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::repeating(Scripted::Api(401)));
        let mut p = pipeline(&store, &script, &dir, PipelineOptions::default());

        let err = p
            .run(vec![
                article("https://example.com/a", "A breach"),
                article("https://example.com/b", "B breach"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Classifier(_)));
        assert!(p.checkpoint().is_empty());
        // Not retried, and the second article is never attempted.
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(extraction_reply(
            "Acme Corp", None, None,
        ))]));
        let options = PipelineOptions {
            relevance_screen: false,
            dry_run: true,
            ..PipelineOptions::default()
        };
        let mut p = pipeline(&store, &script, &dir, options);

        p.run(vec![article("https://example.com/acme", "Acme breach")])
            .await
            .unwrap();
        assert_eq!(store.insert_calls(), 0);
        assert!(p.checkpoint().is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_before_next_article() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([]));
        let mut p = pipeline(&store, &script, &dir, PipelineOptions::default());
        p.cancel_flag().store(true, Ordering::SeqCst);

        let stats = p
            .run(vec![article("https://example.com/a", "A")])
            .await
            .unwrap();
        assert!(stats.interrupted);
        assert_eq!(script.calls(), 0);
        assert!(p.checkpoint().is_empty());
    }

    #[tokio::test]
    async fn duplicate_urls_in_one_batch_are_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockIncidentStore::new());
        let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(extraction_reply(
            "Acme Corp", None, None,
        ))]));
        let options = PipelineOptions {
            relevance_screen: false,
            ..PipelineOptions::default()
        };
        let mut p = pipeline(&store, &script, &dir, options);

        let stats = p
            .run(vec![
                article("https://example.com/acme", "Acme breach"),
                article("https://example.com/acme", "Acme breach (syndicated)"),
            ])
            .await
            .unwrap();
        assert_eq!(stats.articles_in, 2);
        assert_eq!(stats.articles_new, 1);
        assert_eq!(stats.incidents_created, 1);
        assert_eq!(script.calls(), 1);
    }
}
