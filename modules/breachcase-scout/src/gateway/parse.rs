// Tolerant readers for classifier JSON. Models drift on key names and value
// types, so each reader accepts the variants seen in practice and reports
// anything it cannot interpret as `None`.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::warn;

use breachcase_common::{
    clamp_confidence, AttackVector, CandidateRecord, Classification, IncidentId, Severity,
    UpdateType,
};

/// Relevance screen result.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceVerdict {
    pub is_relevant: bool,
    pub confidence: f64,
    pub reasoning: String,
}

/// Raw three-way verdict, before the engine applies its own acceptance rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionVerdict {
    pub classification: Classification,
    /// Set when the classifier marked the report as a duplicate in any form.
    pub flagged_duplicate: bool,
    pub related_id: Option<IncidentId>,
    pub update_type: Option<UpdateType>,
    pub update_summary: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
}

const DEFAULT_CONFIDENCE: f64 = 0.5;

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty() && !text.eq_ignore_ascii_case("null")).then_some(text)
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|v| {
            if s.trim().ends_with('%') {
                v / 100.0
            } else {
                v
            }
        }),
        _ => None,
    }
}

/// Counts arrive as numbers, numeric strings, or strings with separators.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => {
            let digits: String = s.chars().filter(|c| !matches!(c, ',' | '_' | ' ')).collect();
            digits.parse::<u64>().ok()
        }
        _ => None,
    }
}

fn as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(as_text).collect(),
        _ => Vec::new(),
    }
}

fn confidence_of(obj: &Map<String, Value>) -> f64 {
    first(obj, &["confidence", "confidence_score"])
        .and_then(as_f64)
        .map(clamp_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE)
}

fn reasoning_of(obj: &Map<String, Value>) -> String {
    first(obj, &["reasoning", "reason", "explanation"])
        .and_then(as_text)
        .unwrap_or_else(|| "No reasoning provided".to_string())
}

pub fn relevance_verdict(value: &Value) -> Option<RelevanceVerdict> {
    let obj = value.as_object()?;
    let is_relevant = first(obj, &["is_breach", "is_incident", "relevant"]).and_then(as_bool)?;
    Some(RelevanceVerdict {
        is_relevant,
        confidence: confidence_of(obj),
        reasoning: reasoning_of(obj),
    })
}

/// `None` when the payload names no outcome at all.
pub fn resolution_verdict(value: &Value) -> Option<ResolutionVerdict> {
    let obj = value.as_object()?;

    let explicit = first(obj, &["classification", "decision", "outcome"])
        .and_then(as_text)
        .and_then(|s| Classification::from_str_loose(&s));
    let is_update = first(obj, &["is_update"]).and_then(as_bool);
    let is_duplicate = first(obj, &["is_duplicate_source", "is_duplicate"]).and_then(as_bool);

    let classification = match (explicit, is_update, is_duplicate) {
        (Some(c), _, _) => c,
        (None, _, Some(true)) => Classification::DuplicateSource,
        (None, Some(true), _) => Classification::GenuineUpdate,
        (None, Some(false), _) | (None, _, Some(false)) => Classification::New,
        (None, None, None) => return None,
    };

    let update_type = first(obj, &["update_type"]).and_then(as_text).and_then(|s| {
        let parsed = UpdateType::from_str_loose(&s);
        if parsed.is_none() {
            warn!(update_type = s.as_str(), "Unrecognized update type, using default");
        }
        parsed
    });

    Some(ResolutionVerdict {
        classification,
        flagged_duplicate: classification == Classification::DuplicateSource
            || is_duplicate == Some(true),
        related_id: first(
            obj,
            &["related_id", "related_incident_id", "related_breach_id"],
        )
        .and_then(as_text)
        .map(IncidentId::from),
        update_type,
        update_summary: first(obj, &["update_summary", "update_description"]).and_then(as_text),
        confidence: confidence_of(obj),
        reasoning: reasoning_of(obj),
    })
}

fn date_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<NaiveDate> {
    let raw = first(obj, keys).and_then(as_text)?;
    let parsed = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok();
    if parsed.is_none() {
        warn!(field = keys[0], value = raw.as_str(), "Unparseable date, ignoring");
    }
    parsed
}

/// Build a candidate record from an extraction payload. Unrecognized
/// enumerations are dropped with a warning; validation happens later.
pub fn candidate_record(value: &Value) -> Option<CandidateRecord> {
    let obj = value.as_object()?;

    let method = first(obj, &["attack_vector", "method"])
        .and_then(as_text)
        .and_then(|raw| {
            let parsed = AttackVector::from_str_loose(&raw);
            if parsed.is_none() {
                warn!(attack_vector = raw.as_str(), "Invalid attack vector, setting to null");
            }
            parsed
        });

    let severity = first(obj, &["severity"]).and_then(as_text).and_then(|raw| {
        let parsed = Severity::from_str_loose(&raw);
        if parsed.is_none() {
            warn!(severity = raw.as_str(), "Invalid severity, setting to null");
        }
        parsed
    });

    let discovery_date = date_field(obj, &["discovery_date", "breach_date"]);
    let disclosure_date = date_field(obj, &["disclosure_date"]);

    const KNOWN: &[&str] = &[
        "company",
        "organization",
        "organization_name",
        "title",
        "industry",
        "country",
        "continent",
        "discovery_date",
        "breach_date",
        "disclosure_date",
        "records_affected",
        "impact_magnitude",
        "attack_vector",
        "method",
        "severity",
        "breach_method",
        "threat_actor",
        "data_compromised",
        "cve_references",
        "mitre_attack_techniques",
        "mitre_techniques",
        "lessons_learned",
        "summary",
        "narrative_summary",
    ];
    let extra: Map<String, Value> = obj
        .iter()
        .filter(|(k, v)| !KNOWN.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Some(CandidateRecord {
        organization_name: first(obj, &["company", "organization", "organization_name"])
            .and_then(as_text)
            .unwrap_or_default(),
        title: first(obj, &["title"]).and_then(as_text),
        discovery_date,
        impact_magnitude: first(obj, &["records_affected", "impact_magnitude"])
            .and_then(as_count),
        method,
        narrative_summary: first(obj, &["summary", "narrative_summary"])
            .and_then(as_text)
            .unwrap_or_default(),
        disclosure_date,
        industry: first(obj, &["industry"]).and_then(as_text),
        country: first(obj, &["country"]).and_then(as_text),
        continent: first(obj, &["continent"]).and_then(as_text),
        severity,
        breach_method: first(obj, &["breach_method"]).and_then(as_text),
        threat_actor: first(obj, &["threat_actor"]).and_then(as_text),
        data_compromised: first(obj, &["data_compromised"])
            .map(as_string_list)
            .unwrap_or_default(),
        cve_references: first(obj, &["cve_references"])
            .map(as_string_list)
            .unwrap_or_default(),
        mitre_attack_techniques: first(obj, &["mitre_attack_techniques", "mitre_techniques"])
            .map(as_string_list)
            .unwrap_or_default(),
        lessons_learned: first(obj, &["lessons_learned"]).and_then(as_text),
        extra,
    })
}
