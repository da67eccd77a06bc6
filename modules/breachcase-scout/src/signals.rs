//! Structural corroboration between a candidate record and stored incidents.
//!
//! Signals are evidence handed to the classifier. They never decide an outcome
//! on their own.

use std::collections::HashMap;
use std::fmt::Display;

use serde::Serialize;

use breachcase_common::{AttackVector, CandidateRecord, IncidentDetail, IncidentId};

/// Tri-state field comparison. `Unknown` means one side lacked the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMatch {
    Match,
    Mismatch,
    Unknown,
}

impl FieldMatch {
    pub fn is_known(self) -> bool {
        self != FieldMatch::Unknown
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            FieldMatch::Match => Some(true),
            FieldMatch::Mismatch => Some(false),
            FieldMatch::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSignal<T> {
    pub field_match: FieldMatch,
    pub candidate_value: Option<T>,
    pub existing_value: Option<T>,
}

/// Per-field signals for one (candidate, stored incident) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSignal {
    pub impact: FieldSignal<u64>,
    pub method: FieldSignal<AttackVector>,
}

impl MatchSignal {
    /// At least one field is known and every known field matches.
    pub fn all_known_match(&self) -> bool {
        let known: Vec<FieldMatch> = [self.impact.field_match, self.method.field_match]
            .into_iter()
            .filter(|m| m.is_known())
            .collect();
        !known.is_empty() && known.iter().all(|m| *m == FieldMatch::Match)
    }

    /// Human-readable rendering of the known fields, or `None` when nothing is known.
    pub fn describe(&self) -> Option<String> {
        let parts: Vec<String> = [
            describe_field("records", &self.impact),
            describe_field("attack_vector", &self.method),
        ]
        .into_iter()
        .flatten()
        .collect();

        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

fn describe_field<T: Display>(label: &str, signal: &FieldSignal<T>) -> Option<String> {
    let existing = signal.existing_value.as_ref()?;
    let candidate = signal.candidate_value.as_ref()?;
    match signal.field_match {
        FieldMatch::Match => Some(format!("{label} MATCH ({existing} ~ {candidate})")),
        FieldMatch::Mismatch => Some(format!("{label} DIFFER ({existing} vs {candidate})")),
        FieldMatch::Unknown => None,
    }
}

/// Compare two impact magnitudes. Zero counts as unreported.
///
/// Matches when `|a - b| / max(a, b) <= tolerance`.
pub fn records_match(candidate: Option<u64>, existing: Option<u64>, tolerance: f64) -> FieldMatch {
    match (candidate, existing) {
        (Some(a), Some(b)) if a > 0 && b > 0 => {
            let larger = a.max(b) as f64;
            let diff = a.abs_diff(b) as f64;
            if diff / larger <= tolerance {
                FieldMatch::Match
            } else {
                FieldMatch::Mismatch
            }
        }
        _ => FieldMatch::Unknown,
    }
}

fn method_match(candidate: Option<AttackVector>, existing: Option<AttackVector>) -> FieldMatch {
    match (candidate, existing) {
        (Some(a), Some(b)) if a == b => FieldMatch::Match,
        (Some(_), Some(_)) => FieldMatch::Mismatch,
        _ => FieldMatch::Unknown,
    }
}

pub fn signal_for(candidate: &CandidateRecord, detail: &IncidentDetail, tolerance: f64) -> MatchSignal {
    MatchSignal {
        impact: FieldSignal {
            field_match: records_match(
                candidate.impact_magnitude,
                detail.impact_magnitude,
                tolerance,
            ),
            candidate_value: candidate.impact_magnitude,
            existing_value: detail.impact_magnitude,
        },
        method: FieldSignal {
            field_match: method_match(candidate.method, detail.method),
            candidate_value: candidate.method,
            existing_value: detail.method,
        },
    }
}

pub fn compute_signals(
    candidate: &CandidateRecord,
    details: &[IncidentDetail],
    tolerance: f64,
) -> HashMap<IncidentId, MatchSignal> {
    details
        .iter()
        .map(|detail| (detail.id.clone(), signal_for(candidate, detail, tolerance)))
        .collect()
}
