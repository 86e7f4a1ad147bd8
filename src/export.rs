//! Export views: read-only, label-resolved tabular dumps of graph state.
//!
//! These are derived artifacts for inspection and reporting, never
//! authoritative state — the snapshot in [`crate::persist`] is.

use serde::{Deserialize, Serialize};

use crate::graph::KnowledgeGraph;

/// Flattened concept row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptExport {
    pub id: u64,
    pub label: String,
    pub domain: String,
    pub confidence: f32,
    pub usage_count: u64,
    pub created_at: u64,
    pub last_accessed_at: u64,
    /// Ids of concepts merged into this one.
    pub merged_from: Vec<u64>,
}

/// Flattened relationship row with resolved endpoint labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipExport {
    pub source_id: u64,
    pub source_label: String,
    pub target_id: u64,
    pub target_label: String,
    pub kind: String,
    pub weight: f32,
    pub co_occurrence_count: u64,
}

/// Dump every live concept in id order.
pub fn export_concepts(graph: &KnowledgeGraph) -> Vec<ConceptExport> {
    graph
        .concepts()
        .map(|c| ConceptExport {
            id: c.id.get(),
            label: c.label.clone(),
            domain: c.domain.as_str().to_owned(),
            confidence: c.confidence,
            usage_count: c.usage_count,
            created_at: c.created_at,
            last_accessed_at: c.last_accessed_at,
            merged_from: c.merged_from.iter().map(|id| id.get()).collect(),
        })
        .collect()
}

/// Dump every live relationship in deterministic order.
pub fn export_relationships(graph: &KnowledgeGraph) -> Vec<RelationshipExport> {
    graph
        .all_relationships()
        .into_iter()
        .map(|r| RelationshipExport {
            source_id: r.source.get(),
            source_label: graph
                .concept(r.source)
                .map(|c| c.label.clone())
                .unwrap_or_default(),
            target_id: r.target.get(),
            target_label: graph
                .concept(r.target)
                .map(|c| c.label.clone())
                .unwrap_or_default(),
            kind: r.kind.name().to_owned(),
            weight: r.weight,
            co_occurrence_count: r.co_occurrence_count,
        })
        .collect()
}

/// Human-readable summary of accumulated knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeReport {
    pub concept_count: usize,
    pub relation_count: usize,
    pub cycle_count: u64,
    pub last_consolidation_cycle: u64,
    /// Most-used concepts, usage desc then id asc.
    pub top_concepts: Vec<ConceptExport>,
}

impl KnowledgeReport {
    /// Build a report over the graph with at most `top_n` highlighted concepts.
    pub fn from_graph(graph: &KnowledgeGraph, top_n: usize) -> Self {
        let mut rows = export_concepts(graph);
        rows.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then(a.id.cmp(&b.id)));
        rows.truncate(top_n);
        Self {
            concept_count: graph.concept_count(),
            relation_count: graph.relation_count(),
            cycle_count: graph.cycle_count(),
            last_consolidation_cycle: graph.last_consolidation_cycle(),
            top_concepts: rows,
        }
    }
}

impl std::fmt::Display for KnowledgeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "knowledge memory report")?;
        writeln!(f, "  concepts:       {}", self.concept_count)?;
        writeln!(f, "  relationships:  {}", self.relation_count)?;
        writeln!(f, "  cycles:         {}", self.cycle_count)?;
        writeln!(f, "  last consolidation: cycle {}", self.last_consolidation_cycle)?;
        if !self.top_concepts.is_empty() {
            writeln!(f, "  top concepts:")?;
            for row in &self.top_concepts {
                writeln!(
                    f,
                    "    {} ({}x, confidence {:.2})",
                    row.label, row.usage_count, row.confidence
                )?;
            }
        }
        Ok(())
    }
}
