//! Relevance-ranked, read-only retrieval over the knowledge graph.
//!
//! Scores every live concept against the query and returns the top `k`,
//! optionally expanded with each hit's strongest one-hop neighbors so the
//! caller gets connected context rather than isolated facts. Retrieval never
//! mutates graph state — not even recency — so it is safe to run
//! concurrently with other readers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::concept::{Concept, normalize_label};
use crate::graph::KnowledgeGraph;

/// Relative weights of the three relevance components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalWeights {
    /// Token overlap between query and label.
    #[serde(default = "default_lexical")]
    pub lexical: f32,
    /// Current concept confidence.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Recency bonus, decaying with idle cycles.
    #[serde(default = "default_recency")]
    pub recency: f32,
}

fn default_lexical() -> f32 {
    0.5
}
fn default_confidence() -> f32 {
    0.3
}
fn default_recency() -> f32 {
    0.2
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            lexical: default_lexical(),
            confidence: default_confidence(),
            recency: default_recency(),
        }
    }
}

/// One retrieval hit: the concept, its relevance score, and (optionally) its
/// strongest neighbors with their edge weights.
#[derive(Debug, Clone)]
pub struct RetrievedConcept {
    pub concept: Concept,
    pub score: f32,
    pub neighbors: Vec<(Concept, f32)>,
}

/// Rank live concepts against `query` and return at most `k` hits.
///
/// Score: `lexical * token_overlap + confidence * c + recency * 1/(1+idle)`.
/// Ordering is deterministic: score desc, then confidence desc, then id asc.
/// `fan_out` controls one-hop neighbor expansion per hit (0 disables).
pub fn retrieve(
    graph: &KnowledgeGraph,
    query: &str,
    k: usize,
    weights: &RetrievalWeights,
    fan_out: usize,
) -> Vec<RetrievedConcept> {
    if k == 0 {
        return vec![];
    }
    let cycle = graph.cycle_count();
    let query_tokens: BTreeSet<String> = normalize_label(query)
        .split_whitespace()
        .map(str::to_owned)
        .collect();

    let mut scored: Vec<(&Concept, f32)> = graph
        .concepts()
        .map(|c| {
            let lexical = token_overlap(&query_tokens, &c.label);
            let recency = 1.0 / (1.0 + c.idle_cycles(cycle) as f32);
            let score = weights.lexical * lexical
                + weights.confidence * c.confidence
                + weights.recency * recency;
            (c, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.0.confidence
                    .partial_cmp(&a.0.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(concept, score)| {
            let neighbors = graph
                .strongest_neighbors(concept.id, fan_out)
                .into_iter()
                .filter_map(|(id, weight)| {
                    graph.concept(id).map(|c| (c.clone(), weight))
                })
                .collect();
            RetrievedConcept {
                concept: concept.clone(),
                score,
                neighbors,
            }
        })
        .collect()
}

/// Jaccard overlap between the query's tokens and the label's tokens.
fn token_overlap(query_tokens: &BTreeSet<String>, label: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let label_tokens: BTreeSet<&str> = label.split_whitespace().collect();
    if label_tokens.is_empty() {
        return 0.0;
    }
    let shared = label_tokens
        .iter()
        .filter(|t| query_tokens.contains(**t))
        .count();
    let union = query_tokens.len() + label_tokens.len() - shared;
    shared as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::DomainTag;
    use crate::graph::RelationKind;

    fn tag(s: &str) -> DomainTag {
        DomainTag::new(s)
    }

    fn weights() -> RetrievalWeights {
        RetrievalWeights::default()
    }

    #[test]
    fn query_match_outranks_strangers() {
        let mut g = KnowledgeGraph::new();
        g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        g.upsert_concept("ethics", tag("ethics"), 1, 0.3, 0.2).unwrap();

        let hits = retrieve(&g, "what is gravity", 2, &weights(), 0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].concept.label, "gravity");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn bounded_by_k() {
        let mut g = KnowledgeGraph::new();
        for i in 0..10 {
            g.upsert_concept(&format!("idea{i}"), tag("misc"), 1, 0.3, 0.2).unwrap();
        }
        assert_eq!(retrieve(&g, "idea", 3, &weights(), 0).len(), 3);
        assert!(retrieve(&g, "idea", 0, &weights(), 0).is_empty());
        assert_eq!(retrieve(&g, "idea", 100, &weights(), 0).len(), 10);
    }

    #[test]
    fn deterministic_on_repeat() {
        let mut g = KnowledgeGraph::new();
        for i in 0..8 {
            g.upsert_concept(&format!("idea{i}"), tag("misc"), 1, 0.3, 0.2).unwrap();
        }
        let first: Vec<_> = retrieve(&g, "anything", 5, &weights(), 0)
            .into_iter()
            .map(|h| h.concept.id)
            .collect();
        let second: Vec<_> = retrieve(&g, "anything", 5, &weights(), 0)
            .into_iter()
            .map(|h| h.concept.id)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn ties_break_on_confidence_then_id() {
        let mut g = KnowledgeGraph::new();
        // Same lexical score (no overlap), same recency; differ in confidence.
        let low = g.upsert_concept("alpha", tag("misc"), 1, 0.3, 0.2).unwrap();
        let high = g.upsert_concept("beta", tag("misc"), 1, 0.7, 0.2).unwrap();
        let hits = retrieve(&g, "unrelated", 2, &weights(), 0);
        assert_eq!(hits[0].concept.id, high);
        assert_eq!(hits[1].concept.id, low);

        // Identical everything: lower id first.
        let mut g2 = KnowledgeGraph::new();
        let a = g2.upsert_concept("alpha", tag("misc"), 1, 0.3, 0.2).unwrap();
        let b = g2.upsert_concept("beta", tag("misc"), 1, 0.3, 0.2).unwrap();
        let hits = retrieve(&g2, "unrelated", 2, &weights(), 0);
        assert_eq!(hits[0].concept.id, a);
        assert_eq!(hits[1].concept.id, b);
    }

    #[test]
    fn recency_bonus_favors_fresh_concepts() {
        let mut g = KnowledgeGraph::new();
        let stale = g.upsert_concept("alpha", tag("misc"), 1, 0.3, 0.2).unwrap();
        let fresh = g.upsert_concept("beta", tag("misc"), 1, 0.3, 0.2).unwrap();
        for _ in 0..10 {
            g.advance_cycle();
        }
        g.upsert_concept("beta", tag("misc"), 10, 0.3, 0.0).unwrap();

        let hits = retrieve(&g, "unrelated", 2, &weights(), 0);
        assert_eq!(hits[0].concept.id, fresh);
        assert_eq!(hits[1].concept.id, stale);
    }

    #[test]
    fn expansion_brings_connected_context() {
        let mut g = KnowledgeGraph::new();
        let gravity = g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        let mass = g.upsert_concept("mass", tag("physics"), 1, 0.3, 0.2).unwrap();
        let energy = g.upsert_concept("energy", tag("physics"), 1, 0.3, 0.2).unwrap();
        g.reinforce_relation(gravity, mass, RelationKind::Causes, 0.8, 1).unwrap();
        g.reinforce_relation(gravity, energy, RelationKind::Uses, 0.2, 1).unwrap();

        let hits = retrieve(&g, "gravity", 1, &weights(), 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].neighbors.len(), 1);
        assert_eq!(hits[0].neighbors[0].0.id, mass);

        let no_expansion = retrieve(&g, "gravity", 1, &weights(), 0);
        assert!(no_expansion[0].neighbors.is_empty());
    }

    #[test]
    fn retrieval_never_mutates_state() {
        let mut g = KnowledgeGraph::new();
        let id = g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        for _ in 0..5 {
            g.advance_cycle();
        }
        let before = g.concept(id).unwrap().clone();
        let _ = retrieve(&g, "gravity", 1, &weights(), 3);
        assert_eq!(g.concept(id).unwrap(), &before);
    }

    #[test]
    fn empty_graph_returns_nothing() {
        let g = KnowledgeGraph::new();
        assert!(retrieve(&g, "gravity", 5, &weights(), 0).is_empty());
    }
}
