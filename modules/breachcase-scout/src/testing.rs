// Test mocks for the resolution pipeline.
//
// Three mocks matching the three trait boundaries:
// - MockIncidentStore (IncidentStore): stateful in-memory store with call counters
// - ScriptedCompletion (CompletionService): queued replies and failures
// - MockArticleSource (ArticleSource): fixed article list
//
// Plus builders for articles, stubs, details, records and classifier replies.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use ai_client::{AiError, CompletionRequest, CompletionService};
use breachcase_common::{
    Article, CandidateRecord, IncidentDetail, IncidentId, IncidentStub, IncidentTag,
};

use crate::traits::{ArticleSource, IncidentStore, IncidentUpdate};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn article(url: &str, title: &str) -> Article {
    Article {
        url: url.to_string(),
        title: title.to_string(),
        body_text: format!("{title}. Full report text."),
        organization_name_hint: None,
        source_name: Some("Test Wire".to_string()),
        published_at: None,
    }
}

pub fn stub(id: &str, name: &str) -> IncidentStub {
    IncidentStub {
        id: id.into(),
        organization_name: name.to_string(),
    }
}

pub fn detail(id: &str, name: &str) -> IncidentDetail {
    IncidentDetail {
        id: id.into(),
        organization_name: name.to_string(),
        discovery_date: None,
        impact_magnitude: None,
        method: None,
        narrative_summary: format!("{name} disclosed a security incident."),
    }
}

pub fn record(name: &str) -> CandidateRecord {
    CandidateRecord {
        organization_name: name.to_string(),
        narrative_summary: format!("{name} disclosed a security incident."),
        ..CandidateRecord::default()
    }
}

pub fn relevance_reply(is_breach: bool, confidence: f64) -> String {
    json!({
        "is_breach": is_breach,
        "confidence": confidence,
        "reasoning": "scripted"
    })
    .to_string()
}

pub fn extraction_reply(company: &str, records: Option<u64>, attack_vector: Option<&str>) -> String {
    let body = json!({
        "company": company,
        "title": format!("{company} security incident"),
        "records_affected": records,
        "attack_vector": attack_vector,
        "severity": "high",
        "data_compromised": ["email"],
        "cve_references": [],
        "summary": format!("{company} disclosed a security incident.")
    });
    format!("Here is the extraction:\n```json\n{body}\n```")
}

pub fn resolution_reply(classification: &str, related_id: Option<&str>, confidence: f64) -> String {
    json!({
        "classification": classification,
        "related_id": related_id,
        "update_type": null,
        "update_summary": null,
        "confidence": confidence,
        "reasoning": "scripted"
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// MockIncidentStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredIncident {
    pub detail: IncidentDetail,
    pub source_url: Option<String>,
    pub tags: Vec<IncidentTag>,
    /// Times an update touched this incident.
    pub revisions: u32,
}

impl StoredIncident {
    fn seeded(detail: IncidentDetail) -> Self {
        Self {
            detail,
            source_url: None,
            tags: Vec::new(),
            revisions: 0,
        }
    }
}

/// An article URL linked to the incident it reported on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub incident_id: IncidentId,
    pub url: String,
}

#[derive(Default)]
struct StoreState {
    incidents: Vec<StoredIncident>,
    updates: Vec<IncidentUpdate>,
    sources: Vec<SourceLink>,
    next_ids: VecDeque<String>,
    minted: u32,
}

impl StoreState {
    /// First link for a URL wins.
    fn link_source(&mut self, incident_id: &IncidentId, url: &str) {
        if self.sources.iter().all(|s| s.url != url) {
            self.sources.push(SourceLink {
                incident_id: incident_id.clone(),
                url: url.to_string(),
            });
        }
    }
}

/// In-memory store. Inserts are idempotent on source URL like the real one.
#[derive(Default)]
pub struct MockIncidentStore {
    state: Mutex<StoreState>,
    stub_page_calls: AtomicU32,
    details_calls: AtomicU32,
    insert_calls: AtomicU32,
    fail_detail_reads: AtomicBool,
    fail_writes_remaining: AtomicU32,
}

impl MockIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_incident(self, detail: IncidentDetail) -> Self {
        self.state
            .lock()
            .unwrap()
            .incidents
            .push(StoredIncident::seeded(detail));
        self
    }

    pub fn with_stubs(self, stubs: impl IntoIterator<Item = IncidentStub>) -> Self {
        stubs.into_iter().fold(self, |store, s| {
            store.with_incident(detail(s.id.as_str(), &s.organization_name))
        })
    }

    /// Ids handed out by `insert_incident`, in order. Falls back to `INC-n`.
    pub fn with_id_sequence<'a>(self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.state
            .lock()
            .unwrap()
            .next_ids
            .extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn failing_detail_reads(self) -> Self {
        self.fail_detail_reads.store(true, Ordering::SeqCst);
        self
    }

    /// The next `n` insert calls fail.
    pub fn failing_writes(self, n: u32) -> Self {
        self.fail_writes_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn stub_page_calls(&self) -> u32 {
        self.stub_page_calls.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> u32 {
        self.details_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn incidents(&self) -> Vec<StoredIncident> {
        self.state.lock().unwrap().incidents.clone()
    }

    pub fn updates(&self) -> Vec<IncidentUpdate> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn sources(&self) -> Vec<SourceLink> {
        self.state.lock().unwrap().sources.clone()
    }

    fn take_write_failure(&self) -> bool {
        self.fail_writes_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl IncidentStore for MockIncidentStore {
    async fn stub_page(&self, offset: usize, limit: usize) -> Result<Vec<IncidentStub>> {
        self.stub_page_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .incidents
            .iter()
            .skip(offset)
            .take(limit)
            .map(|i| IncidentStub {
                id: i.detail.id.clone(),
                organization_name: i.detail.organization_name.clone(),
            })
            .collect())
    }

    async fn details_by_ids(&self, ids: &[IncidentId]) -> Result<Vec<IncidentDetail>> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_detail_reads.load(Ordering::SeqCst) {
            bail!("MockIncidentStore: detail reads are failing");
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .incidents
            .iter()
            .filter(|i| ids.contains(&i.detail.id))
            .map(|i| i.detail.clone())
            .collect())
    }

    async fn insert_incident(
        &self,
        record: &CandidateRecord,
        article: &Article,
    ) -> Result<IncidentId> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_write_failure() {
            bail!("MockIncidentStore: insert failed");
        }

        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .incidents
            .iter()
            .find(|i| i.source_url.as_deref() == Some(article.url.as_str()))
        {
            return Ok(existing.detail.id.clone());
        }

        let id = match state.next_ids.pop_front() {
            Some(id) => id,
            None => {
                state.minted += 1;
                format!("INC-{}", state.minted)
            }
        };
        let id = IncidentId::new(id);
        state.incidents.push(StoredIncident {
            detail: IncidentDetail {
                id: id.clone(),
                organization_name: record.organization_name.clone(),
                discovery_date: record.discovery_date,
                impact_magnitude: record.impact_magnitude,
                method: record.method,
                narrative_summary: record.narrative_summary.clone(),
            },
            source_url: Some(article.url.clone()),
            tags: record.tags(),
            revisions: 0,
        });
        state.link_source(&id, &article.url);
        Ok(id)
    }

    async fn insert_update(&self, update: &IncidentUpdate) -> Result<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_write_failure() {
            bail!("MockIncidentStore: update insert failed");
        }

        let mut state = self.state.lock().unwrap();
        let duplicate = state.updates.iter().any(|u| {
            u.incident_id == update.incident_id && u.source_url == update.source_url
        });
        if duplicate {
            return Ok(());
        }
        state.updates.push(update.clone());
        if let Some(incident) = state
            .incidents
            .iter_mut()
            .find(|i| i.detail.id == update.incident_id)
        {
            incident.revisions += 1;
        }
        state.link_source(&update.incident_id, &update.source_url);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedCompletion
// ---------------------------------------------------------------------------

/// One scripted classifier response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Transient(String),
    RateLimited,
    Api(u16),
    Config(String),
}

impl Scripted {
    fn into_result(self) -> std::result::Result<String, AiError> {
        match self {
            Scripted::Reply(text) => Ok(text),
            Scripted::Transient(msg) => Err(AiError::Network(msg)),
            Scripted::RateLimited => Err(AiError::RateLimited("429 Too Many Requests".into())),
            Scripted::Api(status) => Err(AiError::Api {
                status,
                message: "scripted".into(),
            }),
            Scripted::Config(msg) => Err(AiError::Config(msg)),
        }
    }
}

/// Plays back queued responses, then the fallback (if any). With nothing left
/// it answers with a non-retryable 400 so unexpected calls are visible.
pub struct ScriptedCompletion {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(steps: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            queue: Mutex::new(steps.into_iter().collect()),
            fallback: None,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `step`.
    pub fn repeating(step: Scripted) -> Self {
        Self::new([]).with_fallback(step)
    }

    pub fn with_fallback(mut self, step: Scripted) -> Self {
        self.fallback = Some(step);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let step = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone());

        match step {
            Some(step) => step.into_result(),
            None => Err(AiError::Api {
                status: 400,
                message: "ScriptedCompletion: no scripted response left".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MockArticleSource
// ---------------------------------------------------------------------------

pub struct MockArticleSource {
    articles: Vec<Article>,
}

impl MockArticleSource {
    pub fn new(articles: Vec<Article>) -> Self {
        Self { articles }
    }
}

#[async_trait]
impl ArticleSource for MockArticleSource {
    async fn fetch_articles(&self) -> Result<Vec<Article>> {
        Ok(self.articles.clone())
    }
}
