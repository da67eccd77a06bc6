//! Approximate organization-name matching.

use similar::TextDiff;

use breachcase_common::IncidentStub;

/// A stub that cleared the candidate threshold, with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyCandidate {
    pub stub: IncidentStub,
    pub score: f64,
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Character-level sequence similarity in [0, 1]: `2 * matches / (len_a + len_b)`
/// over lowercased input with whitespace runs collapsed. Empty input scores 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a.as_str(), b.as_str()).ratio())
}

/// Every stub whose name scores at or above `threshold` against `name`,
/// in index order. An empty name matches nothing.
pub fn find_candidates(name: &str, index: &[IncidentStub], threshold: f64) -> Vec<FuzzyCandidate> {
    if name.trim().is_empty() {
        return Vec::new();
    }

    index
        .iter()
        .filter_map(|stub| {
            let score = similarity(name, &stub.organization_name);
            (score >= threshold).then(|| FuzzyCandidate {
                stub: stub.clone(),
                score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(id: &str, name: &str) -> IncidentStub {
        IncidentStub {
            id: id.into(),
            organization_name: name.to_string(),
        }
    }

    #[test]
    fn case_and_whitespace_are_ignored() {
        assert_eq!(similarity("  Acme Corp ", "ACME CORP"), 1.0);
    }

    #[test]
    fn internal_whitespace_runs_are_collapsed() {
        assert_eq!(similarity("Acme \t  Corp", "acme corp"), 1.0);
        assert_eq!(normalize(" Acme\n\nHoldings  Ltd "), "acme holdings ltd");
    }

    #[test]
    fn similarity_is_symmetric() {
        let pairs = [
            ("acme corp", "acme corporation"),
            ("Globex Inc", "Acme Corp"),
            ("T-Mobile", "T Mobile US"),
        ];
        for (a, b) in pairs {
            assert!((similarity(a, b) - similarity(b, a)).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn expanded_legal_suffix_clears_candidate_threshold() {
        let index = vec![stub("A1", "Acme Corp")];
        let hits = find_candidates("ACME CORPORATION", &index, 0.6);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stub.id.as_str(), "A1");
        assert!(hits[0].score >= 0.6);
    }

    #[test]
    fn unrelated_company_is_not_a_candidate() {
        let index = vec![stub("A1", "Acme Corp")];
        assert!(find_candidates("Globex Inc", &index, 0.6).is_empty());
    }

    #[test]
    fn empty_name_matches_nothing() {
        let index = vec![stub("A1", "Acme Corp"), stub("A2", "")];
        assert!(find_candidates("", &index, 0.0).is_empty());
        assert!(find_candidates("   ", &index, 0.0).is_empty());
    }

    #[test]
    fn results_keep_index_order() {
        let index = vec![
            stub("A1", "Acme Corporation"),
            stub("B1", "Globex"),
            stub("A2", "Acme Corp"),
        ];
        let ids: Vec<_> = find_candidates("Acme Corp", &index, 0.6)
            .into_iter()
            .map(|c| c.stub.id.to_string())
            .collect();
        assert_eq!(ids, vec!["A1", "A2"]);
    }
}
