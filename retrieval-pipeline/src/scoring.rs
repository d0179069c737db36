//! Hybrid score fusion: lexical + vector, min-max normalized, then boosted by
//! source precedence. The linear weights and boost deltas are fixed
//! constants rather than config, matching the single deterministic algorithm
//! this retrieval engine implements.

use std::cmp::Ordering;

use common::storage::types::{chunk::Chunk, StoredObject};

pub const KEYWORD_WEIGHT: f32 = 0.4;
pub const VECTOR_WEIGHT: f32 = 0.6;

/// Lexical + vector subscores gathered for one candidate chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub fts: Option<f32>,
    pub vector: Option<f32>,
}

/// A chunk paired with its accumulated retrieval scores.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub scores: Scores,
    pub fused: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            scores: Scores::default(),
            fused: 0.0,
        }
    }

    pub const fn with_vector_score(mut self, score: f32) -> Self {
        self.scores.vector = Some(score);
        self
    }

    pub const fn with_fts_score(mut self, score: f32) -> Self {
        self.scores.fts = Some(score);
        self
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Min-max normalize a score column; an all-equal column maps to all-1.0
/// rather than dividing by zero.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// `base = 0.4 * bm25_norm + 0.6 * vec_norm`, on already-normalized subscores.
pub fn fuse_base(scores: &Scores) -> f32 {
    let vector = scores.vector.unwrap_or(0.0);
    let fts = scores.fts.unwrap_or(0.0);
    fts.mul_add(KEYWORD_WEIGHT, vector * VECTOR_WEIGHT)
}

/// Precedence/expansion-enablement boost applied on top of the fused base
/// score. `priority_index` is the chunk's expansion's position in the
/// caller-supplied enabled-expansions list (0 = highest priority).
pub fn precedence_boost(chunk: &Chunk, enabled_expansion_ids: &[String]) -> f32 {
    match chunk.precedence_level {
        3 => 0.15,
        2 => match chunk
            .expansion_id
            .as_deref()
            .and_then(|id| enabled_expansion_ids.iter().position(|e| e == id))
        {
            Some(priority_index) => (0.10 - 0.01 * priority_index as f32).max(0.05),
            None => -0.05,
        },
        _ => 0.0,
    }
}

pub fn merge_scored_by_id<T>(
    target: &mut std::collections::HashMap<String, Scored<T>>,
    incoming: Vec<Scored<T>>,
) where
    T: StoredObject + Clone,
{
    for scored in incoming {
        let id = scored.item.get_id().to_owned();
        target
            .entry(id)
            .and_modify(|existing| {
                if let Some(score) = scored.scores.vector {
                    existing.scores.vector = Some(score);
                }
                if let Some(score) = scored.scores.fts {
                    existing.scores.fts = Some(score);
                }
            })
            .or_insert_with(|| Scored {
                item: scored.item.clone(),
                scores: scored.scores,
                fused: scored.fused,
            });
    }
}

pub fn sort_by_fused_desc<T>(items: &mut [Scored<T>])
where
    T: StoredObject,
{
    items.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.get_id().cmp(b.item.get_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(precedence_level: i64, expansion_id: Option<&str>) -> Chunk {
        Chunk::new(
            "src".into(),
            "game-1".into(),
            expansion_id.map(str::to_string),
            1,
            0,
            None,
            "text".into(),
            precedence_level,
        )
    }

    #[test]
    fn min_max_normalize_all_equal_is_all_ones() {
        let normalized = min_max_normalize(&[0.5, 0.5, 0.5]);
        assert_eq!(normalized, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn min_max_normalize_spreads_between_zero_and_one() {
        let normalized = min_max_normalize(&[0.0, 5.0, 10.0]);
        assert!((normalized[0] - 0.0).abs() < 1e-6);
        assert!((normalized[1] - 0.5).abs() < 1e-6);
        assert!((normalized[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn errata_gets_flat_boost() {
        let chunk = chunk_with(3, None);
        assert!((precedence_boost(&chunk, &[]) - 0.15).abs() < 1e-6);
    }

    #[test]
    fn enabled_expansion_boost_decays_with_priority_but_floors_at_0_05() {
        let chunk = chunk_with(2, Some("exp-a"));
        let enabled = vec!["exp-a".to_string()];
        assert!((precedence_boost(&chunk, &enabled) - 0.10).abs() < 1e-6);

        let enabled_low_priority: Vec<String> =
            (0..10).map(|i| format!("exp-{i}")).collect();
        let chunk_low = chunk_with(2, Some("exp-9"));
        assert!((precedence_boost(&chunk_low, &enabled_low_priority) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn disabled_expansion_is_penalized() {
        let chunk = chunk_with(2, Some("exp-a"));
        assert!((precedence_boost(&chunk, &[]) - (-0.05)).abs() < 1e-6);
    }

    #[test]
    fn base_rule_has_no_boost() {
        let chunk = chunk_with(1, None);
        assert_eq!(precedence_boost(&chunk, &[]), 0.0);
    }

    #[test]
    fn sort_by_fused_desc_breaks_ties_on_id_ascending() {
        let mut items = vec![
            Scored {
                item: {
                    let mut c = chunk_with(1, None);
                    c.id = "b".into();
                    c
                },
                scores: Scores::default(),
                fused: 0.5,
            },
            Scored {
                item: {
                    let mut c = chunk_with(1, None);
                    c.id = "a".into();
                    c
                },
                scores: Scores::default(),
                fused: 0.5,
            },
        ];
        sort_by_fused_desc(&mut items);
        assert_eq!(items[0].item.id, "a");
        assert_eq!(items[1].item.id, "b");
    }
}
