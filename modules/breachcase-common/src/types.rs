use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BreachCaseError;

// --- Identifiers ---

/// Opaque incident identifier as issued by the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IncidentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// --- Enums ---

/// How the incident was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackVector {
    Phishing,
    Ransomware,
    Malware,
    VulnerabilityExploit,
    CredentialAttack,
    SocialEngineering,
    Insider,
    SupplyChain,
    Misconfiguration,
    UnauthorizedAccess,
    Scraping,
    Other,
}

impl AttackVector {
    pub const ALL: [AttackVector; 12] = [
        AttackVector::Phishing,
        AttackVector::Ransomware,
        AttackVector::Malware,
        AttackVector::VulnerabilityExploit,
        AttackVector::CredentialAttack,
        AttackVector::SocialEngineering,
        AttackVector::Insider,
        AttackVector::SupplyChain,
        AttackVector::Misconfiguration,
        AttackVector::UnauthorizedAccess,
        AttackVector::Scraping,
        AttackVector::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackVector::Phishing => "phishing",
            AttackVector::Ransomware => "ransomware",
            AttackVector::Malware => "malware",
            AttackVector::VulnerabilityExploit => "vulnerability_exploit",
            AttackVector::CredentialAttack => "credential_attack",
            AttackVector::SocialEngineering => "social_engineering",
            AttackVector::Insider => "insider",
            AttackVector::SupplyChain => "supply_chain",
            AttackVector::Misconfiguration => "misconfiguration",
            AttackVector::UnauthorizedAccess => "unauthorized_access",
            AttackVector::Scraping => "scraping",
            AttackVector::Other => "other",
        }
    }

    /// Returns `None` for values outside the closed vocabulary.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let needle = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|v| v.as_str() == needle)
    }
}

impl std::fmt::Display for AttackVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Three-way resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    New,
    GenuineUpdate,
    DuplicateSource,
}

impl Classification {
    /// Accepts the labels classifiers actually emit (`NEW_BREACH`, `new`,
    /// `Genuine Update`, ...).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "NEW" | "NEW_BREACH" | "NEW_INCIDENT" => Some(Self::New),
            "GENUINE_UPDATE" | "UPDATE" => Some(Self::GenuineUpdate),
            "DUPLICATE_SOURCE" | "DUPLICATE" => Some(Self::DuplicateSource),
            _ => None,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::New => write!(f, "NEW"),
            Classification::GenuineUpdate => write!(f, "GENUINE_UPDATE"),
            Classification::DuplicateSource => write!(f, "DUPLICATE_SOURCE"),
        }
    }
}

/// What kind of new information a genuine update carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    #[default]
    NewInfo,
    ClassAction,
    RegulatoryFine,
    Remediation,
    Resolution,
    Investigation,
}

impl UpdateType {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "new_info" => Some(Self::NewInfo),
            "class_action" => Some(Self::ClassAction),
            "regulatory_fine" | "fine" => Some(Self::RegulatoryFine),
            "remediation" => Some(Self::Remediation),
            "resolution" => Some(Self::Resolution),
            "investigation" => Some(Self::Investigation),
            _ => None,
        }
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateType::NewInfo => write!(f, "new_info"),
            UpdateType::ClassAction => write!(f, "class_action"),
            UpdateType::RegulatoryFine => write!(f, "regulatory_fine"),
            UpdateType::Remediation => write!(f, "remediation"),
            UpdateType::Resolution => write!(f, "resolution"),
            UpdateType::Investigation => write!(f, "investigation"),
        }
    }
}

// --- Articles ---

/// An input item handed over by the ingestion stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub organization_name_hint: Option<String>,
    pub source_name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

// --- Incidents ---

/// Minimal projection used for fuzzy pre-filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentStub {
    pub id: IncidentId,
    pub organization_name: String,
}

/// Full dedup context for one stored incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentDetail {
    pub id: IncidentId,
    pub organization_name: String,
    pub discovery_date: Option<NaiveDate>,
    pub impact_magnitude: Option<u64>,
    pub method: Option<AttackVector>,
    pub narrative_summary: String,
}

/// A freshly extracted incident that has not been persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub organization_name: String,
    pub title: Option<String>,
    pub discovery_date: Option<NaiveDate>,
    /// Records affected.
    pub impact_magnitude: Option<u64>,
    pub method: Option<AttackVector>,
    pub narrative_summary: String,
    pub disclosure_date: Option<NaiveDate>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub continent: Option<String>,
    pub severity: Option<Severity>,
    /// Free-text account of how the incident happened.
    pub breach_method: Option<String>,
    pub threat_actor: Option<String>,
    #[serde(default)]
    pub data_compromised: Vec<String>,
    #[serde(default)]
    pub cve_references: Vec<String>,
    /// ATT&CK technique ids such as `T1078`.
    #[serde(default)]
    pub mitre_attack_techniques: Vec<String>,
    pub lessons_learned: Option<String>,
    /// Extracted fields with no dedicated column.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CandidateRecord {
    /// Facet tags derived from the record: one each for continent, country,
    /// industry, attack vector and threat actor, plus one per CVE and ATT&CK
    /// technique. Blank and repeated values are skipped.
    pub fn tags(&self) -> Vec<IncidentTag> {
        let singles = [
            (TagKind::Continent, self.continent.as_deref()),
            (TagKind::Country, self.country.as_deref()),
            (TagKind::Industry, self.industry.as_deref()),
            (TagKind::AttackVector, self.method.map(|m| m.as_str())),
            (TagKind::ThreatActor, self.threat_actor.as_deref()),
        ];
        let lists = self
            .cve_references
            .iter()
            .map(|cve| (TagKind::Cve, Some(cve.as_str())))
            .chain(
                self.mitre_attack_techniques
                    .iter()
                    .map(|t| (TagKind::MitreAttack, Some(t.as_str()))),
            );

        let mut tags: Vec<IncidentTag> = Vec::new();
        for (kind, value) in singles.into_iter().chain(lists) {
            let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let tag = IncidentTag {
                kind,
                value: value.to_string(),
            };
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }

    /// Organization name and narrative summary are required downstream.
    pub fn validate(&self) -> Result<(), BreachCaseError> {
        if self.organization_name.trim().is_empty() {
            return Err(BreachCaseError::Validation(
                "extraction missing required field: organization name".to_string(),
            ));
        }
        if self.narrative_summary.trim().is_empty() {
            return Err(BreachCaseError::Validation(
                "extraction missing required field: summary".to_string(),
            ));
        }
        Ok(())
    }
}

/// Facet an incident can be filtered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Continent,
    Country,
    Industry,
    AttackVector,
    ThreatActor,
    Cve,
    MitreAttack,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Continent => "continent",
            TagKind::Country => "country",
            TagKind::Industry => "industry",
            TagKind::AttackVector => "attack_vector",
            TagKind::ThreatActor => "threat_actor",
            TagKind::Cve => "cve",
            TagKind::MitreAttack => "mitre_attack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentTag {
    pub kind: TagKind,
    pub value: String,
}

// --- Resolution ---

/// The resolved outcome. Non-NEW variants always carry the related incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "classification", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    New,
    GenuineUpdate {
        related_id: IncidentId,
        update_type: UpdateType,
        update_summary: Option<String>,
    },
    DuplicateSource {
        related_id: IncidentId,
    },
}

/// What the engine looked at to reach a decision.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResolutionAudit {
    pub candidate_ids: Vec<IncidentId>,
    pub classifier_called: bool,
    pub classifier_failure: Option<String>,
    pub raw_classification: Option<Classification>,
    pub raw_confidence: Option<f64>,
}

/// Immutable verdict for one candidate record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionDecision {
    #[serde(flatten)]
    outcome: Outcome,
    confidence: f64,
    reasoning: String,
    audit: ResolutionAudit,
}

impl ResolutionDecision {
    pub fn new_incident(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self::build(Outcome::New, confidence, reasoning)
    }

    pub fn genuine_update(
        related_id: IncidentId,
        update_type: UpdateType,
        update_summary: Option<String>,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self::build(
            Outcome::GenuineUpdate {
                related_id,
                update_type,
                update_summary,
            },
            confidence,
            reasoning,
        )
    }

    pub fn duplicate_source(
        related_id: IncidentId,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self::build(Outcome::DuplicateSource { related_id }, confidence, reasoning)
    }

    fn build(outcome: Outcome, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            outcome,
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            audit: ResolutionAudit::default(),
        }
    }

    pub fn with_audit(mut self, audit: ResolutionAudit) -> Self {
        self.audit = audit;
        self
    }

    pub fn classification(&self) -> Classification {
        match self.outcome {
            Outcome::New => Classification::New,
            Outcome::GenuineUpdate { .. } => Classification::GenuineUpdate,
            Outcome::DuplicateSource { .. } => Classification::DuplicateSource,
        }
    }

    pub fn related_id(&self) -> Option<&IncidentId> {
        match &self.outcome {
            Outcome::New => None,
            Outcome::GenuineUpdate { related_id, .. }
            | Outcome::DuplicateSource { related_id } => Some(related_id),
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn audit(&self) -> &ResolutionAudit {
        &self.audit
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
