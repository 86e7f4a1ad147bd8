//! Knowledge graph: the aggregate owning concepts and their relationships.
//!
//! The graph stores concept nodes in a deterministic id-ordered map with a
//! label uniqueness index, and weighted typed edges in a `petgraph`
//! [`StableDiGraph`] (stable indices across removals; removing a node
//! cascades to its incident edges).
//!
//! - **Concept store** ([`concepts`]): upsert, decay, remove, merge
//! - **Relationship index** ([`relations`]): reinforce, decay, cascade, repoint
//!
//! The graph is the single unit of ownership handed to the persistence
//! gateway; it converts to and from [`GraphSnapshot`] at process boundaries.

pub mod concepts;
pub mod relations;

use std::collections::{BTreeMap, HashMap};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};

use crate::concept::{Concept, ConceptId, ConceptIdAllocator, Cycle};
use crate::error::GraphError;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Snapshot format version, bumped on incompatible layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The kind of a directed relationship between two concepts.
///
/// The closed vocabulary covers the relation patterns observed during
/// extraction; `Custom` keeps the set open for deployments with their own
/// extraction taxonomies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationKind {
    IsA,
    HasA,
    Causes,
    PartOf,
    SimilarTo,
    OppositeOf,
    Uses,
    CreatedBy,
    Custom(String),
}

impl RelationKind {
    /// Canonical snake_case name for display and export.
    pub fn name(&self) -> &str {
        match self {
            RelationKind::IsA => "is_a",
            RelationKind::HasA => "has_a",
            RelationKind::Causes => "causes",
            RelationKind::PartOf => "part_of",
            RelationKind::SimilarTo => "similar_to",
            RelationKind::OppositeOf => "opposite_of",
            RelationKind::Uses => "uses",
            RelationKind::CreatedBy => "created_by",
            RelationKind::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A weighted, typed directed edge between two live concepts.
///
/// At most one relationship exists per `(source, target, kind)` triple;
/// repeat observation reinforces the existing edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: ConceptId,
    pub target: ConceptId,
    pub kind: RelationKind,
    /// Strength in [0.0, 1.0], reinforced by co-occurrence, eroded by decay.
    pub weight: f32,
    /// How many times this edge has been observed.
    pub co_occurrence_count: u64,
    /// Cycle of the most recent reinforcement, keys edge decay.
    pub last_reinforced: Cycle,
}

/// Edge payload stored on petgraph edges. Endpoints live on the graph itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EdgeData {
    pub(crate) kind: RelationKind,
    pub(crate) weight: f32,
    pub(crate) co_occurrence_count: u64,
    pub(crate) last_reinforced: Cycle,
}

/// A single concept observation supplied by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptObservation {
    /// Raw label text; normalized on ingestion.
    pub label: String,
    /// Raw domain tag text; normalized on ingestion.
    pub domain: String,
}

impl ConceptObservation {
    pub fn new(label: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            domain: domain.into(),
        }
    }
}

/// A co-occurrence hint between two labels within one experience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationObservation {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
}

impl RelationObservation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: RelationKind,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }
}

/// An immutable ingested record, kept for provenance only.
///
/// Experiences are append-only history: written to the experience log when
/// persistence is configured, never mutated, and droppable independently of
/// the graph once consolidated into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub cycle_id: Cycle,
    pub raw_text: String,
    /// Caller-supplied outcome score; recorded, not folded into confidence.
    pub outcome_score: f32,
    pub extracted_concepts: Vec<ConceptObservation>,
    pub extracted_relations: Vec<RelationObservation>,
}

/// The persisted form of the graph: every live concept and relationship plus
/// the scalar metadata, flattened for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub concepts: Vec<Concept>,
    pub relationships: Vec<Relationship>,
    pub cycle_count: Cycle,
    pub last_consolidation_cycle: Cycle,
    pub next_concept_id: u64,
}

/// The aggregate knowledge graph.
///
/// Single-writer by design: mutation goes through `&mut self`, and the
/// engine serializes ingestion/consolidation behind one exclusive lock.
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    /// Live concepts, id-ordered for deterministic iteration.
    concepts: BTreeMap<ConceptId, Concept>,
    /// Normalized label → concept id uniqueness index.
    labels: HashMap<String, ConceptId>,
    /// Relationship store; node weights are concept ids, edges carry [`EdgeData`].
    rels: StableDiGraph<ConceptId, EdgeData>,
    /// ConceptId → NodeIndex mapping for O(1) node lookups.
    node_index: HashMap<ConceptId, NodeIndex>,
    /// Id allocator, resumed from snapshots.
    allocator: ConceptIdAllocator,
    /// Number of experiences ingested over the graph's lifetime.
    cycle_count: Cycle,
    /// Cycle of the most recent committed consolidation pass.
    last_consolidation_cycle: Cycle,
}

impl KnowledgeGraph {
    /// Create a new empty knowledge graph.
    pub fn new() -> Self {
        Self {
            concepts: BTreeMap::new(),
            labels: HashMap::new(),
            rels: StableDiGraph::new(),
            node_index: HashMap::new(),
            allocator: ConceptIdAllocator::new(),
            cycle_count: 0,
            last_consolidation_cycle: 0,
        }
    }

    /// Look up a concept by id.
    pub fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    /// Resolve a raw label to a live concept id (normalizing first).
    pub fn resolve_label(&self, raw: &str) -> Option<ConceptId> {
        self.labels
            .get(&crate::concept::normalize_label(raw))
            .copied()
    }

    /// Look up a concept by raw label.
    pub fn concept_by_label(&self, raw: &str) -> Option<&Concept> {
        self.resolve_label(raw).and_then(|id| self.concept(id))
    }

    /// Iterate live concepts in id order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    /// Number of live concepts.
    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    /// Number of live relationships.
    pub fn relation_count(&self) -> usize {
        self.rels.edge_count()
    }

    /// Total experiences ingested.
    pub fn cycle_count(&self) -> Cycle {
        self.cycle_count
    }

    /// Cycle of the last committed consolidation pass (0 if never run).
    pub fn last_consolidation_cycle(&self) -> Cycle {
        self.last_consolidation_cycle
    }

    pub(crate) fn set_last_consolidation_cycle(&mut self, cycle: Cycle) {
        self.last_consolidation_cycle = cycle;
    }

    /// Advance the cycle counter for a newly ingested experience and return
    /// the new cycle id.
    pub(crate) fn advance_cycle(&mut self) -> Cycle {
        self.cycle_count += 1;
        self.cycle_count
    }

    /// Check every structural invariant the rest of the engine relies on.
    ///
    /// Returns `GraphError::Corrupt` on the first violation found. The
    /// consolidator runs this before committing a pass; the persistence path
    /// runs it after restoring a snapshot.
    pub fn verify_integrity(&self) -> GraphResult<()> {
        if self.labels.len() != self.concepts.len() {
            return Err(GraphError::Corrupt {
                message: format!(
                    "label index has {} entries for {} concepts",
                    self.labels.len(),
                    self.concepts.len()
                ),
            });
        }
        for (label, id) in &self.labels {
            match self.concepts.get(id) {
                None => {
                    return Err(GraphError::Corrupt {
                        message: format!("label {label:?} maps to missing concept {id}"),
                    });
                }
                Some(c) if &c.label != label => {
                    return Err(GraphError::Corrupt {
                        message: format!(
                            "label index {label:?} disagrees with concept label {:?}",
                            c.label
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        for concept in self.concepts.values() {
            if !concept.confidence.is_finite()
                || !(0.0..=1.0).contains(&concept.confidence)
            {
                return Err(GraphError::Corrupt {
                    message: format!(
                        "concept {} confidence {} out of [0,1]",
                        concept.id, concept.confidence
                    ),
                });
            }
        }
        for edge in self.rels.edge_indices() {
            let (src_idx, dst_idx) = self.rels.edge_endpoints(edge).ok_or_else(|| {
                GraphError::Corrupt {
                    message: "edge with no endpoints".into(),
                }
            })?;
            let src = *self.rels.node_weight(src_idx).ok_or_else(|| GraphError::Corrupt {
                message: "edge source node missing".into(),
            })?;
            let dst = *self.rels.node_weight(dst_idx).ok_or_else(|| GraphError::Corrupt {
                message: "edge target node missing".into(),
            })?;
            if src == dst {
                return Err(GraphError::Corrupt {
                    message: format!("self-loop on {src}"),
                });
            }
            if !self.concepts.contains_key(&src) || !self.concepts.contains_key(&dst) {
                return Err(GraphError::Corrupt {
                    message: format!("dangling relationship {src} -> {dst}"),
                });
            }
            let data = self.rels.edge_weight(edge).ok_or_else(|| GraphError::Corrupt {
                message: "edge with no payload".into(),
            })?;
            if !data.weight.is_finite() || !(0.0..=1.0).contains(&data.weight) {
                return Err(GraphError::Corrupt {
                    message: format!("relationship {src} -> {dst} weight {} out of [0,1]", data.weight),
                });
            }
        }
        Ok(())
    }

    /// Flatten the graph into its persisted form.
    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            concepts: self.concepts.values().cloned().collect(),
            relationships: self.all_relationships(),
            cycle_count: self.cycle_count,
            last_consolidation_cycle: self.last_consolidation_cycle,
            next_concept_id: self.allocator.peek_next(),
        }
    }

    /// Rebuild a graph from its persisted form, re-checking every invariant.
    ///
    /// Returns `GraphError::Corrupt` if the snapshot violates the data model
    /// (dangling edges, duplicate labels, out-of-range scalars).
    pub fn from_snapshot(snapshot: GraphSnapshot) -> GraphResult<Self> {
        let mut graph = Self::new();
        graph.cycle_count = snapshot.cycle_count;
        graph.last_consolidation_cycle = snapshot.last_consolidation_cycle;

        let mut max_id = 0u64;
        for concept in snapshot.concepts {
            max_id = max_id.max(concept.id.get());
            if graph
                .labels
                .insert(concept.label.clone(), concept.id)
                .is_some()
            {
                return Err(GraphError::Corrupt {
                    message: format!("duplicate label {:?} in snapshot", concept.label),
                });
            }
            graph.concepts.insert(concept.id, concept);
        }
        graph.allocator = ConceptIdAllocator::starting_from(snapshot.next_concept_id.max(max_id + 1));

        for rel in snapshot.relationships {
            graph.restore_relationship(rel)?;
        }

        graph.verify_integrity()?;
        Ok(graph)
    }
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}
