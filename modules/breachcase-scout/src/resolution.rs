// Resolution Engine: NEW, GENUINE_UPDATE or DUPLICATE_SOURCE for one
// candidate record.
//
// The engine is the only place that turns classifier failures into defaults.
// Both defaults lean away from merging: an unwanted NEW costs a cleanup, an
// unwanted merge corrupts an existing incident's history.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use ai_client::AiError;
use breachcase_common::{
    Article, CandidateRecord, Classification, IncidentId, ResolutionAudit, ResolutionDecision,
    ResolutionPolicy,
};

use crate::fuzzy::FuzzyCandidate;
use crate::gateway::{
    with_retry, CandidateContext, ClassifierGateway, GatewayFailure, ResolutionContext,
    ResolutionVerdict, RetryPolicy,
};
use crate::index::CandidateIndex;
use crate::signals::compute_signals;
use crate::traits::IncidentStore;

pub const NO_MATCH_REASONING: &str = "no name match in corpus";

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The classifier cannot work at all (e.g. missing credentials).
    #[error("classifier misconfigured: {0}")]
    Fatal(AiError),

    #[error("failed to load incident details: {0}")]
    Store(anyhow::Error),
}

impl ResolveError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolveError::Fatal(_))
    }
}

pub struct ResolutionEngine {
    gateway: Arc<ClassifierGateway>,
    store: Arc<dyn IncidentStore>,
    policy: ResolutionPolicy,
    store_retry: RetryPolicy,
}

impl ResolutionEngine {
    pub fn new(
        gateway: Arc<ClassifierGateway>,
        store: Arc<dyn IncidentStore>,
        policy: ResolutionPolicy,
    ) -> Self {
        let store_retry = gateway.retry_policy();
        Self {
            gateway,
            store,
            policy,
            store_retry,
        }
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Decide what `record` is relative to the incidents in `index`.
    ///
    /// Classifier failures never surface as errors; they become a NEW
    /// decision flagged in reasoning and audit. Only misconfiguration and
    /// store read failures are returned as `Err`.
    pub async fn resolve(
        &self,
        record: &CandidateRecord,
        article: &Article,
        index: &CandidateIndex,
    ) -> Result<ResolutionDecision, ResolveError> {
        let mut candidates =
            index.find_candidates(&record.organization_name, self.policy.candidate_threshold);

        if candidates.is_empty() {
            info!(
                company = record.organization_name.as_str(),
                "No fuzzy candidates, new incident"
            );
            return Ok(ResolutionDecision::new_incident(1.0, NO_MATCH_REASONING));
        }

        self.cap_context(&mut candidates);
        let ids: Vec<IncidentId> = candidates.iter().map(|c| c.stub.id.clone()).collect();

        info!(
            company = record.organization_name.as_str(),
            candidates = ids.len(),
            "Fuzzy candidates found, fetching details"
        );

        let store = &self.store;
        let ids_ref = &ids;
        let details = with_retry(
            self.store_retry,
            "details_by_ids",
            |_| true,
            move || async move { store.details_by_ids(ids_ref).await },
        )
        .await
        .map_err(|e| ResolveError::Store(e.into_inner()))?;

        let mut audit = ResolutionAudit {
            candidate_ids: ids.clone(),
            ..ResolutionAudit::default()
        };

        if details.is_empty() {
            warn!(
                company = record.organization_name.as_str(),
                "Fuzzy candidates have no stored detail, new incident"
            );
            return Ok(ResolutionDecision::new_incident(
                1.0,
                "name matches had no stored detail",
            )
            .with_audit(audit));
        }

        let signals = compute_signals(record, &details, self.policy.impact_tolerance);
        let scores: HashMap<&IncidentId, f64> =
            candidates.iter().map(|c| (&c.stub.id, c.score)).collect();

        let ctx = ResolutionContext {
            record,
            article,
            candidates: details
                .iter()
                .map(|detail| {
                    let score = scores.get(&detail.id).copied().unwrap_or(0.0);
                    CandidateContext {
                        detail,
                        name_score: score,
                        strong_name_match: score >= self.policy.confirmation_threshold,
                        signal: signals.get(&detail.id),
                    }
                })
                .collect(),
        };

        audit.classifier_called = true;
        let verdict = match self.gateway.classify_resolution(&ctx).await {
            Ok(verdict) => verdict,
            Err(GatewayFailure::Fatal(e)) => return Err(ResolveError::Fatal(e)),
            Err(failure) => {
                warn!(
                    company = record.organization_name.as_str(),
                    error = %failure,
                    "Resolution classifier failed, defaulting to new incident"
                );
                let reasoning =
                    format!("classifier failure ({failure}); defaulting to new incident");
                audit.classifier_failure = Some(failure.to_string());
                return Ok(ResolutionDecision::new_incident(0.5, reasoning).with_audit(audit));
            }
        };

        audit.raw_classification = Some(verdict.classification);
        audit.raw_confidence = Some(verdict.confidence);

        let known: Vec<&IncidentId> = details.iter().map(|d| &d.id).collect();
        let decision = self.apply_policy(verdict, &known).with_audit(audit);

        info!(
            company = record.organization_name.as_str(),
            classification = %decision.classification(),
            related_id = decision.related_id().map(IncidentId::as_str),
            confidence = decision.confidence(),
            "Resolved"
        );
        Ok(decision)
    }

    /// Keep the best-scoring candidates when over the context cap, preserving
    /// index order among the survivors. Ties go to the earlier candidate.
    fn cap_context(&self, candidates: &mut Vec<FuzzyCandidate>) {
        let cap = self.policy.max_context_candidates.max(1);
        if candidates.len() <= cap {
            return;
        }
        let mut ranked: Vec<usize> = (0..candidates.len()).collect();
        ranked.sort_by(|&a, &b| {
            candidates[b]
                .score
                .total_cmp(&candidates[a].score)
                .then(a.cmp(&b))
        });
        let mut keep = vec![false; candidates.len()];
        for &i in &ranked[..cap] {
            keep[i] = true;
        }

        let mut flags = keep.into_iter();
        candidates.retain(|_| flags.next().unwrap_or(false));
    }

    /// The engine's own acceptance bar over the classifier's raw verdict.
    fn apply_policy(&self, verdict: ResolutionVerdict, known: &[&IncidentId]) -> ResolutionDecision {
        let ResolutionVerdict {
            classification,
            flagged_duplicate,
            related_id,
            update_type,
            update_summary,
            confidence,
            reasoning,
        } = verdict;

        let accepted_update = classification == Classification::GenuineUpdate
            && confidence >= self.policy.acceptance_threshold
            && !flagged_duplicate;

        if !accepted_update && !flagged_duplicate {
            if classification == Classification::GenuineUpdate {
                return ResolutionDecision::new_incident(
                    confidence,
                    format!(
                        "GENUINE_UPDATE at confidence {confidence:.2} is below the acceptance \
threshold {:.2}; treated as new incident. Classifier: {reasoning}",
                        self.policy.acceptance_threshold
                    ),
                );
            }
            return ResolutionDecision::new_incident(confidence, reasoning);
        }

        let related_id = match related_id {
            Some(id) if known.contains(&&id) => id,
            other => {
                error!(
                    classification = %classification,
                    related_id = other.as_ref().map(IncidentId::as_str),
                    "Classifier linked a non-NEW verdict to no known candidate, defaulting to new incident"
                );
                return ResolutionDecision::new_incident(
                    confidence,
                    format!(
                        "invalid related id for {classification} verdict; treated as new incident. \
Classifier: {reasoning}"
                    ),
                );
            }
        };

        if accepted_update {
            ResolutionDecision::genuine_update(
                related_id,
                update_type.unwrap_or_default(),
                update_summary,
                confidence,
                reasoning,
            )
        } else {
            ResolutionDecision::duplicate_source(related_id, confidence, reasoning)
        }
    }
}
