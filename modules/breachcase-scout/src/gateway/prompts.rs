// Prompt text for the three classifier calls.

use std::fmt::Write;

use chrono::NaiveDate;

use ai_client::truncate_to_char_boundary;
use breachcase_common::{Article, AttackVector};

use super::ResolutionContext;

const ARTICLE_BODY_MAX_BYTES: usize = 4000;
const STORED_SUMMARY_MAX_BYTES: usize = 300;

pub const RELEVANCE_SYSTEM: &str = "You screen security news for a breach tracker. \
Respond with a single JSON object and nothing else.";

pub const EXTRACTION_SYSTEM: &str = "You turn security incident reports into structured \
records. Respond with a single JSON object and nothing else.";

pub const RESOLUTION_SYSTEM: &str = "You decide whether a security incident report describes \
a new incident, new developments in a known incident, or a repeat report of a known incident. \
Respond with a single JSON object and nothing else.";

fn article_block(article: &Article) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Title: {}", article.title);
    let _ = writeln!(out, "URL: {}", article.url);
    if let Some(source) = &article.source_name {
        let _ = writeln!(out, "Source: {source}");
    }
    if let Some(published) = article.published_at {
        let _ = writeln!(out, "Published: {}", published.format("%Y-%m-%d"));
    }
    let _ = writeln!(
        out,
        "Text:\n{}",
        truncate_to_char_boundary(&article.body_text, ARTICLE_BODY_MAX_BYTES)
    );
    out
}

pub fn relevance_prompt(article: &Article) -> String {
    format!(
        "Does this article report a specific security incident (data breach, ransomware attack, \
unauthorized access, leak or similar) affecting an identifiable organization? General advice, \
product announcements, vulnerability disclosures with no known victim, and opinion pieces do \
not count.\n\n{}\n\
Answer as JSON:\n\
{{\"is_breach\": true|false, \"confidence\": <0.0-1.0>, \"reasoning\": \"<one sentence>\"}}",
        article_block(article)
    )
}

pub fn extraction_prompt(article: &Article, today: NaiveDate) -> String {
    let vectors = AttackVector::ALL
        .iter()
        .map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Extract the incident described in this article. Today is {today}; resolve relative \
dates against it. Use null for anything the article does not state.\n\n{article}\n\
Answer as JSON with these keys:\n\
- company: affected organization name (required)\n\
- title: short incident title\n\
- industry, country\n\
- continent: one of Africa, Asia, Europe, North America, Oceania, South America\n\
- discovery_date: when the incident was found internally, YYYY-MM-01\n\
- disclosure_date: when it was made public, YYYY-MM-01; if only one unlabelled date is \
given, put it here\n\
- records_affected: integer count of affected records or people\n\
- breach_method: one sentence on how it happened\n\
- attack_vector: one of {vectors}\n\
- threat_actor: named group, gang or individual responsible\n\
- severity: one of low, medium, high, critical\n\
- data_compromised: list of data types exposed\n\
- cve_references: list of CVE ids\n\
- mitre_attack_techniques: list of ATT&CK technique ids, e.g. T1078\n\
- summary: two or three factual sentences (required)\n\
- lessons_learned: which controls failed and what would have helped",
        article = article_block(article),
    )
}

pub fn resolution_prompt(ctx: &ResolutionContext<'_>) -> String {
    let record = ctx.record;
    let mut out = String::new();

    let _ = writeln!(out, "New report:");
    out.push_str(&article_block(ctx.article));
    let _ = writeln!(out, "Extracted:");
    let _ = writeln!(out, "  Company: {}", record.organization_name);
    let _ = writeln!(out, "  Discovery Date: {}", display_or_unknown(record.discovery_date));
    let _ = writeln!(out, "  Records Affected: {}", display_or_unknown(record.impact_magnitude));
    let _ = writeln!(out, "  Attack Vector: {}", display_or_unknown(record.method));
    let _ = writeln!(out, "  Summary: {}", record.narrative_summary);

    let _ = writeln!(out, "\nKnown incidents with a similar organization name:");
    for candidate in &ctx.candidates {
        let detail = candidate.detail;
        let _ = writeln!(out, "- ID: {}", detail.id);
        let _ = writeln!(
            out,
            "  Company: {} (name similarity {:.2}{})",
            detail.organization_name,
            candidate.name_score,
            if candidate.strong_name_match { ", strong" } else { "" }
        );
        let _ = writeln!(out, "  Discovery Date: {}", display_or_unknown(detail.discovery_date));
        let _ = writeln!(out, "  Records Affected: {}", display_or_unknown(detail.impact_magnitude));
        let _ = writeln!(out, "  Attack Vector: {}", display_or_unknown(detail.method));
        let _ = writeln!(
            out,
            "  Summary: {}",
            truncate_to_char_boundary(&detail.narrative_summary, STORED_SUMMARY_MAX_BYTES)
        );

        if let Some(signal) = candidate.signal {
            if let Some(described) = signal.describe() {
                let _ = writeln!(out, "  Structural signals: {described}");
            }
            if signal.all_known_match() {
                let _ = writeln!(
                    out,
                    "  -> Every available signal matches. Default to DUPLICATE_SOURCE; choose \
GENUINE_UPDATE only if you can cite a specific new fact absent from the summary above."
                );
            }
        }
    }

    out.push_str(
        "\nClassify the new report:\n\
- NEW: a different incident, even if the organization matches. Prefer NEW when it is unclear \
whether the organization is the same.\n\
- GENUINE_UPDATE: same incident, and the report adds a concrete development (lawsuit, fine, \
revised victim count, remediation, arrest, investigation result).\n\
- DUPLICATE_SOURCE: same incident, nothing materially new. Prefer this over GENUINE_UPDATE when \
the new information is ambiguous.\n\n\
Answer as JSON:\n\
{\"classification\": \"NEW\"|\"GENUINE_UPDATE\"|\"DUPLICATE_SOURCE\", \
\"related_id\": \"<ID from the list, or null for NEW>\", \
\"update_type\": \"new_info\"|\"class_action\"|\"regulatory_fine\"|\"remediation\"|\"resolution\"|\"investigation\"|null, \
\"update_summary\": \"<the new development, or null>\", \
\"confidence\": <0.0-1.0>, \"reasoning\": \"<one or two sentences>\"}",
    );
    out
}

fn display_or_unknown<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "Unknown".to_string(), |v| v.to_string())
}
