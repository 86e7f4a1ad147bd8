//! Core concept types for the seshat engine.
//!
//! Concepts are the atomic units of accumulated knowledge. Every learned idea
//! is identified by a [`ConceptId`], described by a [`Concept`] record, and
//! looked up through its normalized label. The [`ConceptIdAllocator`] provides
//! thread-safe, restart-resumable ID generation.

use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::GraphError;

/// Logical timestamp: a monotonically increasing cycle counter, not wall time.
///
/// One cycle corresponds to one ingested experience. All recency and decay
/// arithmetic is keyed to cycles so behavior is reproducible in tests.
pub type Cycle = u64;

/// Unique, niche-optimized identifier for a concept.
///
/// Uses `NonZeroU64` so that `Option<ConceptId>` is the same size as `ConceptId`
/// (the niche optimization lets the compiler use 0 as the `None` discriminant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConceptId(NonZeroU64);

impl ConceptId {
    /// Create a `ConceptId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ConceptId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cpt:{}", self.0)
    }
}

/// Normalize a raw label into its canonical lookup form.
///
/// NFKC normalization, lowercasing, and whitespace collapse, so that
/// `"  Gravity "` and `"gravity"` resolve to the same concept.
pub fn normalize_label(raw: &str) -> String {
    let folded: String = raw.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Coarse category a concept belongs to (e.g. "physics", "ethics").
///
/// Open vocabulary: the engine treats tags opaquely except for equality
/// during the consolidation merge pass. Normalized like labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainTag(String);

impl DomainTag {
    /// Create a normalized domain tag.
    pub fn new(raw: &str) -> Self {
        Self(normalize_label(raw))
    }

    /// The normalized tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DomainTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DomainTag {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// A node in the knowledge graph: one distinct learned idea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Unique identifier, stable for the concept's lifetime.
    pub id: ConceptId,
    /// Normalized text key, unique among live concepts.
    pub label: String,
    /// Coarse category used to scope the merge pass.
    pub domain: DomainTag,
    /// Belief strength in [0.0, 1.0], reinforced by observation, eroded by decay.
    pub confidence: f32,
    /// Number of times this concept has been observed.
    pub usage_count: u64,
    /// Cycle at which the concept was first seen.
    pub created_at: Cycle,
    /// Cycle at which the concept was last observed.
    pub last_accessed_at: Cycle,
    /// Ids of concepts merged into this one, kept for audit.
    #[serde(default)]
    pub merged_from: BTreeSet<ConceptId>,
}

impl Concept {
    /// Create a concept on first sighting of a label.
    pub fn new(
        id: ConceptId,
        label: impl Into<String>,
        domain: DomainTag,
        cycle: Cycle,
        initial_confidence: f32,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            domain,
            confidence: initial_confidence.clamp(0.0, 1.0),
            usage_count: 1,
            created_at: cycle,
            last_accessed_at: cycle,
            merged_from: BTreeSet::new(),
        }
    }

    /// Reinforce on repeat observation: diminishing-returns confidence gain,
    /// usage increment, recency refresh.
    ///
    /// `c' = c + gain * (1 - c)` — asymptotically approaches 1, never reaches it.
    pub fn reinforce(&mut self, gain: f32, cycle: Cycle) {
        self.confidence = (self.confidence + gain * (1.0 - self.confidence)).clamp(0.0, 1.0);
        self.usage_count += 1;
        self.last_accessed_at = cycle;
    }

    /// Exponential forgetting over the idle cycles not yet charged by an
    /// earlier pass:
    /// `c' = c * (1 - rate)^(cycle - max(last_accessed_at, decayed_through))`.
    ///
    /// `decayed_through` is the cycle decay was last applied through, so
    /// repeated passes charge each idle cycle exactly once. A no-op when the
    /// remaining span is empty or `rate == 0`.
    pub fn decay(&mut self, rate: f32, cycle: Cycle, decayed_through: Cycle) {
        let from = self.last_accessed_at.max(decayed_through);
        if cycle <= from || rate <= 0.0 {
            return;
        }
        let idle = (cycle - from) as f32;
        self.confidence = (self.confidence * (1.0 - rate).powf(idle)).clamp(0.0, 1.0);
    }

    /// Idle cycles since last access, saturating at zero.
    pub fn idle_cycles(&self, cycle: Cycle) -> u64 {
        cycle.saturating_sub(self.last_accessed_at)
    }
}

/// Thread-safe concept ID allocator.
///
/// Produces monotonically increasing IDs starting from 1.
/// Resumable after restart via [`ConceptIdAllocator::starting_from`].
#[derive(Debug)]
pub struct ConceptIdAllocator {
    next: AtomicU64,
}

impl ConceptIdAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given ID.
    ///
    /// Used when restoring state from a snapshot.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next concept ID.
    ///
    /// Returns an error if the ID space is exhausted (after 2^64 - 1 allocations).
    pub fn next_id(&self) -> Result<ConceptId, GraphError> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        ConceptId::new(raw).ok_or(GraphError::IdsExhausted)
    }

    /// Return the next ID that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for ConceptIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ConceptIdAllocator {
    fn clone(&self) -> Self {
        Self::starting_from(self.peek_next())
    }
}
