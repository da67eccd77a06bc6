// Postgres-backed incident store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use breachcase_common::{
    Article, AttackVector, CandidateRecord, IncidentDetail, IncidentId, IncidentStub,
};

use crate::traits::{IncidentStore, IncidentUpdate};

pub struct PgIncidentStore {
    pool: PgPool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StubRow {
    id: Uuid,
    company: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DetailRow {
    id: Uuid,
    company: String,
    discovery_date: Option<NaiveDate>,
    records_affected: Option<i64>,
    attack_vector: Option<String>,
    summary: String,
}

impl From<StubRow> for IncidentStub {
    fn from(row: StubRow) -> Self {
        IncidentStub {
            id: IncidentId::new(row.id.to_string()),
            organization_name: row.company,
        }
    }
}

impl From<DetailRow> for IncidentDetail {
    fn from(row: DetailRow) -> Self {
        IncidentDetail {
            id: IncidentId::new(row.id.to_string()),
            organization_name: row.company,
            discovery_date: row.discovery_date,
            impact_magnitude: row.records_affected.and_then(|n| u64::try_from(n).ok()),
            method: row
                .attack_vector
                .as_deref()
                .and_then(AttackVector::from_str_loose),
            narrative_summary: row.summary,
        }
    }
}

/// Link an article URL to an incident. A URL already linked keeps its first incident.
async fn insert_source(
    conn: &mut PgConnection,
    breach_id: Uuid,
    url: &str,
    title: &str,
    published_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sources (id, breach_id, url, title, published_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (url) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(breach_id)
    .bind(url)
    .bind(title)
    .bind(published_at.map(|dt| dt.date_naive()))
    .execute(conn)
    .await
    .context("Failed to insert source")?;
    Ok(())
}

/// Ids issued by this store are UUIDs; anything else cannot exist in it.
fn parse_ids(ids: &[IncidentId]) -> Vec<Uuid> {
    ids.iter()
        .filter_map(|id| match Uuid::parse_str(id.as_str()) {
            Ok(uuid) => Some(uuid),
            Err(_) => {
                warn!(id = id.as_str(), "Ignoring non-UUID incident id");
                None
            }
        })
        .collect()
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        info!("Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations. Safe to call on every start.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn stub_page(&self, offset: usize, limit: usize) -> Result<Vec<IncidentStub>> {
        let rows = sqlx::query_as::<_, StubRow>(
            r#"
            SELECT id, company FROM breaches
            ORDER BY created_at, id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load incident stubs")?;

        Ok(rows.into_iter().map(IncidentStub::from).collect())
    }

    async fn details_by_ids(&self, ids: &[IncidentId]) -> Result<Vec<IncidentDetail>> {
        let uuids = parse_ids(ids);
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, DetailRow>(
            r#"
            SELECT id, company, discovery_date, records_affected, attack_vector, summary
            FROM breaches
            WHERE id = ANY($1)
            ORDER BY created_at, id
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load incident details")?;

        Ok(rows.into_iter().map(IncidentDetail::from).collect())
    }

    async fn insert_incident(
        &self,
        record: &CandidateRecord,
        article: &Article,
    ) -> Result<IncidentId> {
        let mut tx = self.pool.begin().await?;

        // A crash between insert and checkpoint replays the same URL; the
        // conflict clause hands back the row written the first time.
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO breaches
                (id, company, title, industry, country, continent, discovery_date,
                 disclosure_date, records_affected, attack_vector, breach_method, threat_actor,
                 severity, data_compromised, cve_references, mitre_techniques, summary,
                 lessons_learned, extra, source_url, source_name, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (source_url) DO UPDATE SET source_url = EXCLUDED.source_url
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.organization_name)
        .bind(record.title.as_deref().unwrap_or(&article.title))
        .bind(&record.industry)
        .bind(&record.country)
        .bind(&record.continent)
        .bind(record.discovery_date)
        .bind(record.disclosure_date)
        .bind(record.impact_magnitude.and_then(|n| i64::try_from(n).ok()))
        .bind(record.method.map(|m| m.as_str()))
        .bind(&record.breach_method)
        .bind(&record.threat_actor)
        .bind(record.severity.map(|s| s.to_string()))
        .bind(&record.data_compromised)
        .bind(&record.cve_references)
        .bind(&record.mitre_attack_techniques)
        .bind(&record.narrative_summary)
        .bind(&record.lessons_learned)
        .bind(serde_json::Value::Object(record.extra.clone()))
        .bind(&article.url)
        .bind(&article.source_name)
        .bind(article.published_at)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert incident")?;

        for tag in record.tags() {
            sqlx::query(
                r#"
                INSERT INTO breach_tags (id, breach_id, tag_type, tag_value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (breach_id, tag_type, tag_value) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(tag.kind.as_str())
            .bind(&tag.value)
            .execute(&mut *tx)
            .await
            .context("Failed to insert incident tag")?;
        }

        insert_source(&mut tx, id, &article.url, &article.title, article.published_at).await?;

        tx.commit().await.context("Failed to commit incident")?;
        Ok(IncidentId::new(id.to_string()))
    }

    async fn insert_update(&self, update: &IncidentUpdate) -> Result<()> {
        let breach_id = Uuid::parse_str(update.incident_id.as_str())
            .with_context(|| format!("Invalid incident id {}", update.incident_id))?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO breach_updates
                (id, breach_id, update_type, description, source_url, confidence, reasoning)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (breach_id, source_url) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(breach_id)
        .bind(update.update_type.to_string())
        .bind(&update.description)
        .bind(&update.source_url)
        .bind(update.confidence)
        .bind(&update.reasoning)
        .execute(&mut *tx)
        .await
        .context("Failed to insert incident update")?
        .rows_affected();

        if inserted > 0 {
            sqlx::query("UPDATE breaches SET updated_at = now() WHERE id = $1")
                .bind(breach_id)
                .execute(&mut *tx)
                .await
                .context("Failed to touch incident")?;
            insert_source(
                &mut tx,
                breach_id,
                &update.source_url,
                &update.source_title,
                update.source_published_at,
            )
            .await?;
        }

        tx.commit().await.context("Failed to commit incident update")?;
        Ok(())
    }
}
