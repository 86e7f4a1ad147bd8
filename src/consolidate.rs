//! Consolidation: the periodic maintenance pass over the knowledge graph.
//!
//! Runs decay, a bounded fixed-point merge pass, and pruning — in that
//! order — with copy-then-swap semantics: the pass operates on a clone and
//! the live graph is replaced only when every invariant still holds, so no
//! reader ever observes a partially-consolidated graph.
//!
//! Label similarity for the merge pass sits behind the [`Similarity`] trait
//! so a stronger (e.g. embedding-based) implementation can be substituted
//! without touching merge/prune control flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, Cycle};
use crate::graph::{GraphResult, KnowledgeGraph};

/// Pluggable label-similarity function, scored in [0.0, 1.0].
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f32;
}

/// Default similarity: Dice coefficient over character bigrams.
///
/// Catches morphological near-duplicates ("car"/"cars", "gravity"/
/// "gravitation") without any semantic model. Labels shorter than two
/// characters only match exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

impl Similarity for LexicalSimilarity {
    fn score(&self, a: &str, b: &str) -> f32 {
        if a == b {
            return 1.0;
        }
        let a_grams = bigrams(a);
        let b_grams = bigrams(b);
        if a_grams.is_empty() || b_grams.is_empty() {
            return 0.0;
        }
        let mut counts: HashMap<(char, char), usize> = HashMap::new();
        for gram in &a_grams {
            *counts.entry(*gram).or_insert(0) += 1;
        }
        let mut shared = 0usize;
        for gram in &b_grams {
            if let Some(n) = counts.get_mut(gram) {
                if *n > 0 {
                    *n -= 1;
                    shared += 1;
                }
            }
        }
        (2.0 * shared as f32) / (a_grams.len() + b_grams.len()) as f32
    }
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Cooperative cancellation handle for the merge pass.
///
/// Checked between merge iterations so a caller can bound worst-case pause
/// time under pathological similarity clustering. Cancellation stops further
/// merging; decay and pruning still complete and the pass commits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight merge pass.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Re-arm the token for the next pass.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Tuning constants for the consolidation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationTuning {
    /// Per-idle-cycle concept confidence decay rate.
    #[serde(default = "default_concept_decay_rate")]
    pub concept_decay_rate: f32,
    /// Per-idle-cycle relationship weight decay rate.
    #[serde(default = "default_relation_decay_rate")]
    pub relation_decay_rate: f32,
    /// Similarity score above which same-domain concepts merge.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    /// Upper bound on merges per pass, guards against runaway collapse.
    #[serde(default = "default_max_merges_per_pass")]
    pub max_merges_per_pass: usize,
    /// Confidence bonus applied to a merge survivor (corroboration).
    #[serde(default = "default_merge_synergy_bonus")]
    pub merge_synergy_bonus: f32,
    /// Concepts below this confidence become prune candidates.
    #[serde(default = "default_prune_confidence")]
    pub prune_confidence: f32,
    /// Relationships below this weight become prune candidates.
    #[serde(default = "default_prune_weight")]
    pub prune_weight: f32,
    /// Concepts used at least this often survive low confidence.
    #[serde(default = "default_min_retention_usage")]
    pub min_retention_usage: u64,
    /// Idle cycles before a prune candidate may actually fall.
    #[serde(default = "default_prune_grace_cycles")]
    pub prune_grace_cycles: Cycle,
}

fn default_concept_decay_rate() -> f32 {
    0.02
}
fn default_relation_decay_rate() -> f32 {
    0.02
}
fn default_merge_threshold() -> f32 {
    0.75
}
fn default_max_merges_per_pass() -> usize {
    32
}
fn default_merge_synergy_bonus() -> f32 {
    0.05
}
fn default_prune_confidence() -> f32 {
    0.2
}
fn default_prune_weight() -> f32 {
    0.05
}
fn default_min_retention_usage() -> u64 {
    3
}
fn default_prune_grace_cycles() -> Cycle {
    7
}

impl Default for ConsolidationTuning {
    fn default() -> Self {
        Self {
            concept_decay_rate: default_concept_decay_rate(),
            relation_decay_rate: default_relation_decay_rate(),
            merge_threshold: default_merge_threshold(),
            max_merges_per_pass: default_max_merges_per_pass(),
            merge_synergy_bonus: default_merge_synergy_bonus(),
            prune_confidence: default_prune_confidence(),
            prune_weight: default_prune_weight(),
            min_retention_usage: default_min_retention_usage(),
            prune_grace_cycles: default_prune_grace_cycles(),
        }
    }
}

/// Summary of one committed consolidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Cycle the pass ran at.
    pub cycle: Cycle,
    pub concepts_merged: usize,
    pub concepts_pruned: usize,
    pub relations_pruned: usize,
    /// True if the merge pass stopped early on cancellation or the merge cap.
    pub merge_pass_truncated: bool,
}

/// Run one consolidation pass: decay, merge to a bounded fixed point, prune.
///
/// Operates on a clone; on success the clone replaces `graph` atomically from
/// the caller's perspective. On `Corrupt` the live graph is left untouched.
pub fn consolidate(
    graph: &mut KnowledgeGraph,
    tuning: &ConsolidationTuning,
    similarity: &dyn Similarity,
    cancel: &CancelToken,
) -> GraphResult<ConsolidationReport> {
    let cycle = graph.cycle_count();
    let mut work = graph.clone();

    // 1. Decay over the idle span since the last committed pass; cycles
    // already charged by an earlier pass are never re-charged.
    work.decay_concepts(cycle, tuning.concept_decay_rate);
    work.decay_relations(cycle, tuning.relation_decay_rate);

    // 2. Merge pass, run to a fixed point bounded by the merge cap.
    // Truncation means a mergeable pair was found but left unmerged, so a
    // capped pass that happens to land exactly on the fixed point is clean.
    let mut merged = 0usize;
    let mut truncated = false;
    while let Some((keep, drop)) = find_merge_pair(&work, tuning.merge_threshold, similarity) {
        if merged >= tuning.max_merges_per_pass || cancel.is_cancelled() {
            truncated = true;
            break;
        }
        work.merge_concepts(keep, drop, tuning.merge_synergy_bonus)?;
        merged += 1;
    }

    // 3. Prune pass: concepts first (cascading their edges), then edges on
    // their own weight/age rule.
    let doomed: Vec<ConceptId> = work
        .concepts()
        .filter(|c| {
            c.confidence < tuning.prune_confidence
                && c.usage_count < tuning.min_retention_usage
                && c.idle_cycles(cycle) >= tuning.prune_grace_cycles
        })
        .map(|c| c.id)
        .collect();
    for id in &doomed {
        let removed = work.remove_concept(*id)?;
        tracing::debug!(id = %id, label = %removed.label, "pruned concept");
    }
    let relations_pruned =
        work.prune_relations(cycle, tuning.prune_weight, tuning.prune_grace_cycles);

    // Commit only a graph that still honors every invariant.
    work.verify_integrity()?;
    work.set_last_consolidation_cycle(cycle);
    *graph = work;

    let report = ConsolidationReport {
        cycle,
        concepts_merged: merged,
        concepts_pruned: doomed.len(),
        relations_pruned,
        merge_pass_truncated: truncated,
    };
    tracing::info!(
        cycle,
        merged = report.concepts_merged,
        pruned = report.concepts_pruned,
        edges_pruned = report.relations_pruned,
        truncated = report.merge_pass_truncated,
        "consolidation committed"
    );
    Ok(report)
}

/// Find the first mergeable same-domain pair in deterministic id order.
///
/// Returns `(keep, drop)`: higher confidence survives, ties keep the lower id.
fn find_merge_pair(
    graph: &KnowledgeGraph,
    threshold: f32,
    similarity: &dyn Similarity,
) -> Option<(ConceptId, ConceptId)> {
    let concepts: Vec<_> = graph.concepts().collect();
    for (i, a) in concepts.iter().enumerate() {
        for b in &concepts[i + 1..] {
            if a.domain != b.domain {
                continue;
            }
            if similarity.score(&a.label, &b.label) <= threshold {
                continue;
            }
            // a has the lower id (id-ordered iteration), so it wins ties.
            return if b.confidence > a.confidence {
                Some((b.id, a.id))
            } else {
                Some((a.id, b.id))
            };
        }
    }
    None
}
