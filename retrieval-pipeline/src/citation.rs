//! Two-pass citation verification: an exact normalized-substring check, then
//! a bounded fuzzy match against sliding windows, falling back to searching
//! every candidate chunk if the claimed one doesn't contain the quote.

use common::storage::types::chunk::Chunk;

use crate::levenshtein::{find_best_match_window, max_fuzzy_distance};

/// Collapse whitespace and lowercase, for substring comparison.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Collapse whitespace only, preserving case for user-facing display.
pub fn normalize_for_display(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub pass: Option<&'static str>,
}

/// Pass A (exact) then pass B (fuzzy) against a single chunk's text.
pub fn verify_citation(quote: &str, chunk_text: &str) -> VerificationOutcome {
    if quote.trim().is_empty() {
        return VerificationOutcome { verified: false, pass: None };
    }

    let normalized_quote = normalize_text(quote);
    let normalized_chunk = normalize_text(chunk_text);

    if normalized_chunk.contains(&normalized_quote) {
        return VerificationOutcome { verified: true, pass: Some("exact") };
    }

    if let Some((distance, _, _)) = find_best_match_window(&normalized_quote, &normalized_chunk) {
        if distance <= max_fuzzy_distance(normalized_quote.chars().count()) {
            return VerificationOutcome { verified: true, pass: Some("fuzzy") };
        }
    }

    VerificationOutcome { verified: false, pass: None }
}

#[derive(Debug, Clone)]
pub struct CrossChunkVerification {
    pub verified: bool,
    pub chunk_id: Option<String>,
    pub relabeled: bool,
}

/// Verifies `quote` against `primary_chunk_id` first; on failure, searches
/// every candidate chunk and relabels on success.
pub fn verify_citation_in_any_chunk(
    quote: &str,
    primary_chunk_id: &str,
    candidates: &[Chunk],
) -> CrossChunkVerification {
    let Some(primary) = candidates.iter().find(|c| c.id == primary_chunk_id) else {
        return search_all_candidates(quote, candidates);
    };

    let outcome = verify_citation(quote, &primary.chunk_text);
    if outcome.verified {
        return CrossChunkVerification {
            verified: true,
            chunk_id: Some(primary.id.clone()),
            relabeled: false,
        };
    }

    search_all_candidates(quote, candidates)
}

fn search_all_candidates(quote: &str, candidates: &[Chunk]) -> CrossChunkVerification {
    for chunk in candidates {
        if verify_citation(quote, &chunk.chunk_text).verified {
            return CrossChunkVerification {
                verified: true,
                chunk_id: Some(chunk.id.clone()),
                relabeled: true,
            };
        }
    }
    CrossChunkVerification { verified: false, chunk_id: None, relabeled: false }
}

/// First `limit` candidates' display-normalized excerpts, used as
/// "relevant sections" when verification fails entirely.
pub fn get_relevant_sections(candidates: &[Chunk], limit: usize) -> Vec<(String, i64)> {
    candidates
        .iter()
        .take(limit)
        .map(|c| (normalize_for_display(&c.chunk_text), c.page_number))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        let mut c = Chunk::new("src".into(), "game-1".into(), None, 1, 0, None, text.into(), 1);
        c.id = id.into();
        c
    }

    #[test]
    fn normalize_text_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("Roll   TWO dice\n"), "roll two dice");
    }

    #[test]
    fn exact_pass_matches_normalized_substring() {
        let outcome = verify_citation("roll two dice", "You must ROLL   two dice each turn.");
        assert!(outcome.verified);
        assert_eq!(outcome.pass, Some("exact"));
    }

    #[test]
    fn fuzzy_pass_tolerates_small_edits() {
        let outcome = verify_citation(
            "move up too three spaces",
            "players may move up to three spaces then attack",
        );
        assert!(outcome.verified);
        assert_eq!(outcome.pass, Some("fuzzy"));
    }

    #[test]
    fn unrelated_quote_fails_both_passes() {
        let outcome = verify_citation("summon a dragon immediately", "roll two dice each turn");
        assert!(!outcome.verified);
    }

    #[test]
    fn cross_chunk_search_relabels_on_success() {
        let candidates = vec![
            chunk("c1", "unrelated text about setup"),
            chunk("c2", "roll two dice each turn"),
        ];
        let result = verify_citation_in_any_chunk("roll two dice each turn", "c1", &candidates);
        assert!(result.verified);
        assert!(result.relabeled);
        assert_eq!(result.chunk_id.as_deref(), Some("c2"));
    }
}
