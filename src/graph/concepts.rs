//! Concept store operations: the node-owning view of the knowledge graph.

use crate::concept::{Concept, ConceptId, Cycle, DomainTag, normalize_label};
use crate::error::GraphError;

use super::{GraphResult, KnowledgeGraph};

impl KnowledgeGraph {
    /// Insert or reinforce a concept by label.
    ///
    /// If the normalized label already resolves to a live concept, increments
    /// its usage, refreshes recency, and raises confidence by the
    /// diminishing-returns gain `c' = c + gain * (1 - c)`. Otherwise creates
    /// a new concept at `initial_confidence` with `usage_count == 1`.
    pub fn upsert_concept(
        &mut self,
        raw_label: &str,
        domain: DomainTag,
        cycle: Cycle,
        initial_confidence: f32,
        gain: f32,
    ) -> GraphResult<ConceptId> {
        let label = normalize_label(raw_label);
        if let Some(&id) = self.labels.get(&label) {
            let concept = self
                .concepts
                .get_mut(&id)
                .ok_or(GraphError::ConceptNotFound { id })?;
            concept.reinforce(gain, cycle);
            return Ok(id);
        }

        let id = self.allocator.next_id()?;
        let concept = Concept::new(id, label.clone(), domain, cycle, initial_confidence);
        self.labels.insert(label, id);
        self.concepts.insert(id, concept);
        Ok(id)
    }

    /// Apply exponential forgetting to every live concept.
    ///
    /// The idle span is anchored at the last committed consolidation cycle,
    /// so a repeated pass at an unchanged cycle is a no-op and split passes
    /// charge the same total decay as one pass over the whole span (see
    /// [`Concept::decay`]).
    pub fn decay_concepts(&mut self, cycle: Cycle, rate: f32) {
        let covered = self.last_consolidation_cycle;
        for concept in self.concepts.values_mut() {
            concept.decay(rate, cycle, covered);
        }
    }

    /// Remove a concept, cascading to its incident relationships.
    ///
    /// Returns the removed concept, or `ConceptNotFound` if `id` is not live.
    pub fn remove_concept(&mut self, id: ConceptId) -> GraphResult<Concept> {
        let concept = self
            .concepts
            .remove(&id)
            .ok_or(GraphError::ConceptNotFound { id })?;
        self.labels.remove(&concept.label);
        self.cascade_remove(id);
        Ok(concept)
    }

    /// Merge `drop` into `keep`: two concepts believed to denote the same thing.
    ///
    /// The survivor's confidence becomes `max(keep, drop)` plus a small
    /// synergy bonus (corroboration), usage counts sum, and `merged_from`
    /// records the union plus `drop` itself. Every edge incident to `drop` is
    /// re-pointed onto `keep` with de-duplication (see
    /// [`KnowledgeGraph::repoint`]).
    pub fn merge_concepts(
        &mut self,
        keep: ConceptId,
        drop: ConceptId,
        synergy_bonus: f32,
    ) -> GraphResult<()> {
        if keep == drop {
            return Err(GraphError::InvalidMerge {
                keep,
                drop,
                reason: "keep == drop".into(),
            });
        }
        if !self.concepts.contains_key(&keep) {
            return Err(GraphError::InvalidMerge {
                keep,
                drop,
                reason: format!("{keep} is not live"),
            });
        }
        let Some(dropped) = self.concepts.remove(&drop) else {
            return Err(GraphError::InvalidMerge {
                keep,
                drop,
                reason: format!("{drop} is not live"),
            });
        };
        self.labels.remove(&dropped.label);

        self.repoint(drop, keep);

        let survivor = self
            .concepts
            .get_mut(&keep)
            .ok_or(GraphError::ConceptNotFound { id: keep })?;
        survivor.confidence = (survivor.confidence.max(dropped.confidence) + synergy_bonus)
            .clamp(0.0, 1.0);
        survivor.usage_count += dropped.usage_count;
        survivor.created_at = survivor.created_at.min(dropped.created_at);
        survivor.last_accessed_at = survivor.last_accessed_at.max(dropped.last_accessed_at);
        survivor.merged_from.extend(dropped.merged_from.iter().copied());
        survivor.merged_from.insert(drop);

        tracing::debug!(keep = %keep, drop = %drop, label = %dropped.label, "merged concept");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RelationKind;

    fn tag(s: &str) -> DomainTag {
        DomainTag::new(s)
    }

    #[test]
    fn upsert_creates_then_reinforces() {
        let mut g = KnowledgeGraph::new();
        let id = g.upsert_concept("Gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        {
            let c = g.concept(id).unwrap();
            assert_eq!(c.label, "gravity");
            assert!((c.confidence - 0.3).abs() < f32::EPSILON);
            assert_eq!(c.usage_count, 1);
        }

        let again = g.upsert_concept("  gravity ", tag("physics"), 2, 0.3, 0.2).unwrap();
        assert_eq!(again, id);
        let c = g.concept(id).unwrap();
        assert_eq!(c.usage_count, 2);
        assert_eq!(c.last_accessed_at, 2);
        assert!((c.confidence - 0.44).abs() < 1e-6); // 0.3 + 0.2 * 0.7
        assert_eq!(g.concept_count(), 1);
    }

    #[test]
    fn labels_stay_unique_across_upserts() {
        let mut g = KnowledgeGraph::new();
        for cycle in 1..=20 {
            g.upsert_concept("entropy", tag("physics"), cycle, 0.3, 0.2).unwrap();
            g.upsert_concept("Entropy", tag("physics"), cycle, 0.3, 0.2).unwrap();
        }
        assert_eq!(g.concept_count(), 1);
        g.verify_integrity().unwrap();
    }

    #[test]
    fn remove_missing_concept_fails() {
        let mut g = KnowledgeGraph::new();
        let ghost = ConceptId::new(404).unwrap();
        assert!(matches!(
            g.remove_concept(ghost),
            Err(GraphError::ConceptNotFound { .. })
        ));
    }

    #[test]
    fn remove_cascades_to_relationships() {
        let mut g = KnowledgeGraph::new();
        let a = g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        let b = g.upsert_concept("mass", tag("physics"), 1, 0.3, 0.2).unwrap();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 1).unwrap();
        assert_eq!(g.relation_count(), 1);

        g.remove_concept(a).unwrap();
        assert_eq!(g.relation_count(), 0);
        assert!(g.resolve_label("gravity").is_none());
        g.verify_integrity().unwrap();
    }

    #[test]
    fn merge_combines_state_and_frees_label() {
        let mut g = KnowledgeGraph::new();
        let keep = g.upsert_concept("car", tag("physics"), 1, 0.3, 0.2).unwrap();
        let drop = g.upsert_concept("cars", tag("physics"), 1, 0.3, 0.2).unwrap();
        g.upsert_concept("car", tag("physics"), 2, 0.3, 0.2).unwrap(); // keep at 0.44

        g.merge_concepts(keep, drop, 0.05).unwrap();

        let survivor = g.concept(keep).unwrap();
        assert!((survivor.confidence - 0.49).abs() < 1e-6); // max(0.44, 0.3) + 0.05
        assert_eq!(survivor.usage_count, 3);
        assert!(survivor.merged_from.contains(&drop));
        assert!(g.resolve_label("cars").is_none());
        assert_eq!(g.concept_count(), 1);
        g.verify_integrity().unwrap();
    }

    #[test]
    fn merge_self_is_invalid() {
        let mut g = KnowledgeGraph::new();
        let id = g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        assert!(matches!(
            g.merge_concepts(id, id, 0.05),
            Err(GraphError::InvalidMerge { .. })
        ));
    }

    #[test]
    fn merge_missing_is_invalid() {
        let mut g = KnowledgeGraph::new();
        let id = g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.2).unwrap();
        let ghost = ConceptId::new(404).unwrap();
        assert!(g.merge_concepts(id, ghost, 0.05).is_err());
        assert!(g.merge_concepts(ghost, id, 0.05).is_err());
        // Failed merges leave the graph untouched.
        assert_eq!(g.concept_count(), 1);
        g.verify_integrity().unwrap();
    }

    #[test]
    fn decay_skips_concepts_touched_this_cycle() {
        let mut g = KnowledgeGraph::new();
        let stale = g.upsert_concept("stale", tag("misc"), 1, 0.8, 0.2).unwrap();
        let fresh = g.upsert_concept("fresh", tag("misc"), 5, 0.8, 0.2).unwrap();

        g.decay_concepts(5, 0.1);

        assert!(g.concept(stale).unwrap().confidence < 0.8);
        assert!((g.concept(fresh).unwrap().confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn decay_already_covered_span_is_noop() {
        let mut g = KnowledgeGraph::new();
        let id = g.upsert_concept("stale", tag("misc"), 1, 0.8, 0.2).unwrap();
        g.decay_concepts(5, 0.1);
        let after_first = g.concept(id).unwrap().confidence;
        assert!(after_first < 0.8);

        g.set_last_consolidation_cycle(5);
        g.decay_concepts(5, 0.1);
        assert!((g.concept(id).unwrap().confidence - after_first).abs() < f32::EPSILON);
    }

    #[test]
    fn confidence_stays_bounded() {
        let mut g = KnowledgeGraph::new();
        let id = g.upsert_concept("gravity", tag("physics"), 1, 0.3, 0.9).unwrap();
        for cycle in 2..=50 {
            g.upsert_concept("gravity", tag("physics"), cycle, 0.3, 0.9).unwrap();
        }
        let c = g.concept(id).unwrap();
        assert!(c.confidence <= 1.0);
        g.decay_concepts(1_000, 0.99);
        assert!(g.concept(id).unwrap().confidence >= 0.0);
    }
}
