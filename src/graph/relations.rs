//! Relationship index operations: the edge-owning view of the knowledge graph.
//!
//! Edges live in a `StableDiGraph` so indices stay valid across removals and
//! node removal cascades to incident edges. A `(source, target, kind)` triple
//! maps to at most one edge; repeat observation reinforces instead of
//! duplicating.

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::concept::{ConceptId, Cycle};
use crate::error::GraphError;

use super::{EdgeData, GraphResult, KnowledgeGraph, Relationship, RelationKind};

impl KnowledgeGraph {
    /// Node index for a live concept, creating the node on first use.
    fn ensure_node(&mut self, id: ConceptId) -> GraphResult<NodeIndex> {
        if !self.concepts.contains_key(&id) {
            return Err(GraphError::ConceptNotFound { id });
        }
        if let Some(&idx) = self.node_index.get(&id) {
            return Ok(idx);
        }
        let idx = self.rels.add_node(id);
        self.node_index.insert(id, idx);
        Ok(idx)
    }

    fn find_edge(
        &self,
        src: NodeIndex,
        dst: NodeIndex,
        kind: &RelationKind,
    ) -> Option<petgraph::stable_graph::EdgeIndex> {
        self.rels
            .edges_connecting(src, dst)
            .find(|e| &e.weight().kind == kind)
            .map(|e| e.id())
    }

    /// Create or strengthen the edge `(source, target, kind)`.
    ///
    /// Absent edges start at weight `increment`; existing edges gain
    /// `w' = w + increment * (1 - w)` and bump their co-occurrence count.
    /// Both endpoints must be live; self-loops are rejected.
    pub fn reinforce_relation(
        &mut self,
        source: ConceptId,
        target: ConceptId,
        kind: RelationKind,
        increment: f32,
        cycle: Cycle,
    ) -> GraphResult<()> {
        if source == target {
            return Err(GraphError::SelfLoop { id: source });
        }
        let src = self.ensure_node(source)?;
        let dst = self.ensure_node(target)?;

        if let Some(edge) = self.find_edge(src, dst, &kind) {
            let data = self.rels.edge_weight_mut(edge).expect("edge just found");
            data.weight = (data.weight + increment * (1.0 - data.weight)).clamp(0.0, 1.0);
            data.co_occurrence_count += 1;
            data.last_reinforced = cycle;
        } else {
            self.rels.add_edge(
                src,
                dst,
                EdgeData {
                    kind,
                    weight: increment.clamp(0.0, 1.0),
                    co_occurrence_count: 1,
                    last_reinforced: cycle,
                },
            );
        }
        Ok(())
    }

    /// Restore one relationship verbatim from a snapshot.
    ///
    /// Unlike [`KnowledgeGraph::reinforce_relation`], violations here mean the
    /// stored data itself is bad, so everything surfaces as `Corrupt`.
    pub(crate) fn restore_relationship(&mut self, rel: Relationship) -> GraphResult<()> {
        if rel.source == rel.target {
            return Err(GraphError::Corrupt {
                message: format!("snapshot self-loop on {}", rel.source),
            });
        }
        if !self.concepts.contains_key(&rel.source) || !self.concepts.contains_key(&rel.target) {
            return Err(GraphError::Corrupt {
                message: format!(
                    "snapshot relationship {} -> {} references a missing concept",
                    rel.source, rel.target
                ),
            });
        }
        if !rel.weight.is_finite() || !(0.0..=1.0).contains(&rel.weight) {
            return Err(GraphError::Corrupt {
                message: format!(
                    "snapshot relationship {} -> {} weight {} out of [0,1]",
                    rel.source, rel.target, rel.weight
                ),
            });
        }
        let src = self.ensure_node(rel.source)?;
        let dst = self.ensure_node(rel.target)?;
        if self.find_edge(src, dst, &rel.kind).is_some() {
            return Err(GraphError::Corrupt {
                message: format!(
                    "snapshot duplicates relationship {} -{}-> {}",
                    rel.source, rel.kind, rel.target
                ),
            });
        }
        self.rels.add_edge(
            src,
            dst,
            EdgeData {
                kind: rel.kind,
                weight: rel.weight,
                co_occurrence_count: rel.co_occurrence_count,
                last_reinforced: rel.last_reinforced,
            },
        );
        Ok(())
    }

    /// Apply exponential weight decay over each edge's uncharged idle span.
    ///
    /// Mirrors concept decay: the span starts at the later of the edge's
    /// last reinforcement and the last committed consolidation cycle, so
    /// repeated passes never re-charge the same cycles.
    pub fn decay_relations(&mut self, cycle: Cycle, rate: f32) {
        if rate <= 0.0 {
            return;
        }
        let covered = self.last_consolidation_cycle;
        let edges: Vec<_> = self.rels.edge_indices().collect();
        for edge in edges {
            let data = self.rels.edge_weight_mut(edge).expect("edge index live");
            let from = data.last_reinforced.max(covered);
            if cycle <= from {
                continue;
            }
            let idle = (cycle - from) as f32;
            data.weight = (data.weight * (1.0 - rate).powf(idle)).clamp(0.0, 1.0);
        }
    }

    /// Remove every edge touching `id`. Node removal in the stable graph
    /// drops incident edges in both directions.
    pub(crate) fn cascade_remove(&mut self, id: ConceptId) {
        if let Some(idx) = self.node_index.remove(&id) {
            self.rels.remove_node(idx);
        }
    }

    /// Re-point every edge touching `from` onto `to`, de-duplicating against
    /// edges already incident to `to`.
    ///
    /// An equivalent existing edge is reinforced by the moved edge's weight
    /// (so the result is at least the max of the two) and inherits the summed
    /// co-occurrence count. An edge directly between `from` and `to` would
    /// collapse into a self-loop and is dropped instead.
    pub(crate) fn repoint(&mut self, from: ConceptId, to: ConceptId) {
        let Some(&from_idx) = self.node_index.get(&from) else {
            return; // no edges ever touched `from`
        };

        let mut moved: Vec<(ConceptId, ConceptId, EdgeData)> = Vec::new();
        for edge in self.rels.edges_directed(from_idx, Direction::Outgoing) {
            let dst = *self.rels.node_weight(edge.target()).expect("target node live");
            moved.push((from, dst, edge.weight().clone()));
        }
        for edge in self.rels.edges_directed(from_idx, Direction::Incoming) {
            let src = *self.rels.node_weight(edge.source()).expect("source node live");
            moved.push((src, from, edge.weight().clone()));
        }

        self.node_index.remove(&from);
        self.rels.remove_node(from_idx);

        for (src, dst, data) in moved {
            let src = if src == from { to } else { src };
            let dst = if dst == from { to } else { dst };
            if src == dst {
                continue; // collapsed onto the survivor
            }
            let (Ok(src_idx), Ok(dst_idx)) = (self.ensure_node(src), self.ensure_node(dst))
            else {
                continue; // endpoint no longer live; edge dies with it
            };
            if let Some(existing) = self.find_edge(src_idx, dst_idx, &data.kind) {
                let kept = self.rels.edge_weight_mut(existing).expect("edge just found");
                kept.weight = (kept.weight + data.weight * (1.0 - kept.weight)).clamp(0.0, 1.0);
                kept.co_occurrence_count += data.co_occurrence_count;
                kept.last_reinforced = kept.last_reinforced.max(data.last_reinforced);
            } else {
                self.rels.add_edge(src_idx, dst_idx, data);
            }
        }
    }

    /// Remove edges whose weight has decayed below `min_weight` and which
    /// have been idle for at least `grace` cycles. Returns how many fell.
    pub(crate) fn prune_relations(&mut self, cycle: Cycle, min_weight: f32, grace: Cycle) -> usize {
        let doomed: Vec<_> = self
            .rels
            .edge_indices()
            .filter(|&e| {
                let data = &self.rels[e];
                data.weight < min_weight && cycle.saturating_sub(data.last_reinforced) >= grace
            })
            .collect();
        let count = doomed.len();
        for edge in doomed {
            self.rels.remove_edge(edge);
        }
        count
    }

    /// Look up a single relationship by its identifying triple.
    pub fn relationship(
        &self,
        source: ConceptId,
        target: ConceptId,
        kind: &RelationKind,
    ) -> Option<Relationship> {
        let src = *self.node_index.get(&source)?;
        let dst = *self.node_index.get(&target)?;
        self.rels
            .edges_connecting(src, dst)
            .find(|e| &e.weight().kind == kind)
            .map(|e| materialize(source, target, e.weight()))
    }

    /// Every relationship touching `id`, outgoing then incoming.
    pub fn relationships_of(&self, id: ConceptId) -> Vec<Relationship> {
        let Some(&idx) = self.node_index.get(&id) else {
            return vec![];
        };
        let mut out = Vec::new();
        for edge in self.rels.edges_directed(idx, Direction::Outgoing) {
            let dst = *self.rels.node_weight(edge.target()).expect("target node live");
            out.push(materialize(id, dst, edge.weight()));
        }
        for edge in self.rels.edges_directed(idx, Direction::Incoming) {
            let src = *self.rels.node_weight(edge.source()).expect("source node live");
            out.push(materialize(src, id, edge.weight()));
        }
        out
    }

    /// Strongest-weighted neighboring concepts of `id`, either direction,
    /// strongest first (ties broken by lower id). At most `fan_out` entries.
    pub fn strongest_neighbors(&self, id: ConceptId, fan_out: usize) -> Vec<(ConceptId, f32)> {
        use std::collections::HashMap;
        let mut best: HashMap<ConceptId, f32> = HashMap::new();
        for rel in self.relationships_of(id) {
            let other = if rel.source == id { rel.target } else { rel.source };
            let entry = best.entry(other).or_insert(0.0);
            if rel.weight > *entry {
                *entry = rel.weight;
            }
        }
        let mut ranked: Vec<_> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(fan_out);
        ranked
    }

    /// All live relationships in deterministic (source, target, kind) order.
    pub fn all_relationships(&self) -> Vec<Relationship> {
        let mut all: Vec<Relationship> = self
            .rels
            .edge_indices()
            .filter_map(|e| {
                let (src_idx, dst_idx) = self.rels.edge_endpoints(e)?;
                let src = *self.rels.node_weight(src_idx)?;
                let dst = *self.rels.node_weight(dst_idx)?;
                Some(materialize(src, dst, self.rels.edge_weight(e)?))
            })
            .collect();
        all.sort_by(|a, b| {
            (a.source, a.target, &a.kind).cmp(&(b.source, b.target, &b.kind))
        });
        all
    }
}

fn materialize(source: ConceptId, target: ConceptId, data: &EdgeData) -> Relationship {
    Relationship {
        source,
        target,
        kind: data.kind.clone(),
        weight: data.weight,
        co_occurrence_count: data.co_occurrence_count,
        last_reinforced: data.last_reinforced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::DomainTag;

    fn seeded() -> (KnowledgeGraph, ConceptId, ConceptId, ConceptId) {
        let mut g = KnowledgeGraph::new();
        let a = g.upsert_concept("gravity", DomainTag::new("physics"), 1, 0.3, 0.2).unwrap();
        let b = g.upsert_concept("mass", DomainTag::new("physics"), 1, 0.3, 0.2).unwrap();
        let c = g.upsert_concept("energy", DomainTag::new("physics"), 1, 0.3, 0.2).unwrap();
        (g, a, b, c)
    }

    #[test]
    fn reinforce_creates_then_strengthens() {
        let (mut g, a, b, _) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 1).unwrap();
        let rel = g.relationship(a, b, &RelationKind::Causes).unwrap();
        assert!((rel.weight - 0.4).abs() < f32::EPSILON);
        assert_eq!(rel.co_occurrence_count, 1);

        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 2).unwrap();
        let rel = g.relationship(a, b, &RelationKind::Causes).unwrap();
        assert!((rel.weight - 0.64).abs() < 1e-6); // 0.4 + 0.4 * 0.6
        assert_eq!(rel.co_occurrence_count, 2);
        assert_eq!(rel.last_reinforced, 2);
        assert_eq!(g.relation_count(), 1);
    }

    #[test]
    fn distinct_kinds_are_distinct_edges() {
        let (mut g, a, b, _) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 1).unwrap();
        g.reinforce_relation(a, b, RelationKind::Uses, 0.4, 1).unwrap();
        assert_eq!(g.relation_count(), 2);
    }

    #[test]
    fn direction_matters() {
        let (mut g, a, b, _) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 1).unwrap();
        g.reinforce_relation(b, a, RelationKind::Causes, 0.4, 1).unwrap();
        assert_eq!(g.relation_count(), 2);
    }

    #[test]
    fn self_loop_rejected() {
        let (mut g, a, _, _) = seeded();
        assert!(matches!(
            g.reinforce_relation(a, a, RelationKind::SimilarTo, 0.4, 1),
            Err(GraphError::SelfLoop { .. })
        ));
    }

    #[test]
    fn dead_endpoint_rejected() {
        let (mut g, a, _, _) = seeded();
        let ghost = ConceptId::new(404).unwrap();
        assert!(matches!(
            g.reinforce_relation(a, ghost, RelationKind::Causes, 0.4, 1),
            Err(GraphError::ConceptNotFound { .. })
        ));
    }

    #[test]
    fn decay_keyed_by_edge_recency() {
        let (mut g, a, b, c) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.8, 1).unwrap();
        g.reinforce_relation(a, c, RelationKind::Causes, 0.8, 5).unwrap();

        g.decay_relations(5, 0.1);

        let stale = g.relationship(a, b, &RelationKind::Causes).unwrap();
        let fresh = g.relationship(a, c, &RelationKind::Causes).unwrap();
        assert!(stale.weight < 0.8);
        assert!((fresh.weight - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn decay_already_covered_span_is_noop() {
        let (mut g, a, b, _) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.8, 1).unwrap();
        g.decay_relations(5, 0.1);
        let after_first = g.relationship(a, b, &RelationKind::Causes).unwrap().weight;
        assert!(after_first < 0.8);

        g.set_last_consolidation_cycle(5);
        g.decay_relations(5, 0.1);
        let after_second = g.relationship(a, b, &RelationKind::Causes).unwrap().weight;
        assert!((after_second - after_first).abs() < f32::EPSILON);
    }

    #[test]
    fn decay_zero_rate_noop() {
        let (mut g, a, b, _) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.8, 1).unwrap();
        g.decay_relations(100, 0.0);
        let rel = g.relationship(a, b, &RelationKind::Causes).unwrap();
        assert!((rel.weight - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn repoint_moves_and_deduplicates() {
        let (mut g, a, b, c) = seeded();
        // b -> c exists on both sides of the merge: should reinforce, not duplicate.
        g.reinforce_relation(a, c, RelationKind::Causes, 0.5, 1).unwrap();
        g.reinforce_relation(b, c, RelationKind::Causes, 0.3, 1).unwrap();
        // a -> b collapses into a self-loop and must drop.
        g.reinforce_relation(a, b, RelationKind::SimilarTo, 0.2, 1).unwrap();

        g.merge_concepts(a, b, 0.05).unwrap();

        assert_eq!(g.relation_count(), 1);
        let rel = g.relationship(a, c, &RelationKind::Causes).unwrap();
        // Merge conservation: at least the max of the pre-merge weights.
        assert!(rel.weight >= 0.5);
        assert!((rel.weight - 0.65).abs() < 1e-6); // 0.5 + 0.3 * 0.5
        assert_eq!(rel.co_occurrence_count, 2);
        g.verify_integrity().unwrap();
    }

    #[test]
    fn repoint_retargets_incoming_edges() {
        let (mut g, a, b, c) = seeded();
        g.reinforce_relation(c, b, RelationKind::Uses, 0.6, 1).unwrap();

        g.merge_concepts(a, b, 0.05).unwrap();

        let rel = g.relationship(c, a, &RelationKind::Uses).unwrap();
        assert!((rel.weight - 0.6).abs() < f32::EPSILON);
        g.verify_integrity().unwrap();
    }

    #[test]
    fn prune_respects_weight_and_grace() {
        let (mut g, a, b, c) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.01, 1).unwrap(); // weak, old
        g.reinforce_relation(a, c, RelationKind::Causes, 0.01, 10).unwrap(); // weak, fresh
        g.reinforce_relation(b, c, RelationKind::Causes, 0.9, 1).unwrap(); // strong, old

        let pruned = g.prune_relations(10, 0.05, 5);
        assert_eq!(pruned, 1);
        assert!(g.relationship(a, b, &RelationKind::Causes).is_none());
        assert!(g.relationship(a, c, &RelationKind::Causes).is_some());
        assert!(g.relationship(b, c, &RelationKind::Causes).is_some());
    }

    #[test]
    fn strongest_neighbors_ranked_and_bounded() {
        let (mut g, a, b, c) = seeded();
        let d = g.upsert_concept("momentum", DomainTag::new("physics"), 1, 0.3, 0.2).unwrap();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.2, 1).unwrap();
        g.reinforce_relation(a, c, RelationKind::Causes, 0.9, 1).unwrap();
        g.reinforce_relation(d, a, RelationKind::Uses, 0.5, 1).unwrap();

        let top = g.strongest_neighbors(a, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, c);
        assert_eq!(top[1].0, d);
    }

    #[test]
    fn all_relationships_deterministic_order() {
        let (mut g, a, b, c) = seeded();
        g.reinforce_relation(b, c, RelationKind::Causes, 0.4, 1).unwrap();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 1).unwrap();
        let first = g.all_relationships();
        let second = g.all_relationships();
        assert_eq!(first, second);
        assert_eq!(first[0].source, a);
    }

    #[test]
    fn snapshot_roundtrip_with_relationships() {
        let (mut g, a, b, _) = seeded();
        g.reinforce_relation(a, b, RelationKind::Causes, 0.4, 1).unwrap();

        let snap = g.to_snapshot();
        let restored = KnowledgeGraph::from_snapshot(snap).unwrap();
        assert_eq!(restored.concept_count(), 3);
        assert_eq!(restored.relation_count(), 1);
        let rel = restored.relationship(a, b, &RelationKind::Causes).unwrap();
        assert!((rel.weight - 0.4).abs() < f32::EPSILON);
        restored.verify_integrity().unwrap();
    }
}
