// Trait seams for the resolution pipeline.
//
// IncidentStore: the four persistence operations the pipeline needs.
// ArticleSource: whatever produced the articles (feeds, trackers, fixtures).
//
// Mocks live in `testing.rs`: no network, no database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use breachcase_common::{
    Article, CandidateRecord, IncidentDetail, IncidentId, IncidentStub, UpdateType,
};

/// An update record linked to an existing incident.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentUpdate {
    pub incident_id: IncidentId,
    pub update_type: UpdateType,
    pub description: String,
    pub source_url: String,
    pub source_title: String,
    pub source_published_at: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub reasoning: String,
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// One page of stubs in a stable order. A page shorter than `limit` is the last.
    async fn stub_page(&self, offset: usize, limit: usize) -> Result<Vec<IncidentStub>>;

    /// Full detail for the given ids. Unknown ids are omitted.
    async fn details_by_ids(&self, ids: &[IncidentId]) -> Result<Vec<IncidentDetail>>;

    /// Persist a new incident sourced from `article`, with its facet tags and
    /// a source link for the article. Returns the new id.
    ///
    /// Inserting the same source URL twice must return the first id.
    async fn insert_incident(
        &self,
        record: &CandidateRecord,
        article: &Article,
    ) -> Result<IncidentId>;

    /// Append an update to an existing incident, link its source and bump the
    /// incident's last-updated time. A repeated (incident, source) pair is a no-op.
    async fn insert_update(&self, update: &IncidentUpdate) -> Result<()>;
}

#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch_articles(&self) -> Result<Vec<Article>>;
}
