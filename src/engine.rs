//! The engine facade: configuration, lifecycle, ingestion, and queries.
//!
//! [`Engine`] owns the knowledge graph behind a single `RwLock`, the optional
//! persistence gateway, and the similarity strategy used by consolidation.
//! Ingestion and consolidation take the write lock; retrieval and stats take
//! read locks and never mutate.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::concept::{Cycle, DomainTag};
use crate::consolidate::{
    CancelToken, ConsolidationReport, ConsolidationTuning, LexicalSimilarity, Similarity,
    consolidate,
};
use crate::error::{EngineError, SeshatResult};
use crate::export::KnowledgeReport;
use crate::graph::{
    ConceptObservation, Experience, GraphSnapshot, KnowledgeGraph, RelationObservation,
};
use crate::persist::{Loaded, SnapshotGateway};
use crate::retrieve::{RetrievalWeights, RetrievedConcept, retrieve};

/// Engine configuration.
///
/// Serializable as TOML so deployments can pin their tuning alongside the
/// data directory. Every field has a default; an all-defaults config is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where snapshots and the experience log live. `None` disables
    /// persistence entirely (in-memory engine).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Confidence assigned to a newly observed concept.
    #[serde(default = "default_initial_confidence")]
    pub initial_confidence: f32,
    /// Diminishing-returns gain applied on re-observation.
    #[serde(default = "default_reinforcement_gain")]
    pub reinforcement_gain: f32,
    /// Weight increment for relationship reinforcement.
    #[serde(default = "default_relation_increment")]
    pub relation_increment: f32,
    /// Run consolidation every N ingested experiences (0 disables).
    #[serde(default = "default_consolidation_period")]
    pub consolidation_period: Cycle,
    /// Write a snapshot every N ingested experiences (0 disables).
    #[serde(default = "default_snapshot_period")]
    pub snapshot_period: Cycle,
    /// Snapshot write attempts before degrading to in-memory-only.
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    /// One-hop neighbors returned per retrieval hit.
    #[serde(default = "default_expansion_fan_out")]
    pub expansion_fan_out: usize,
    #[serde(default)]
    pub retrieval: RetrievalWeights,
    #[serde(default)]
    pub consolidation: ConsolidationTuning,
}

fn default_initial_confidence() -> f32 {
    0.3
}
fn default_reinforcement_gain() -> f32 {
    0.2
}
fn default_relation_increment() -> f32 {
    0.1
}
fn default_consolidation_period() -> Cycle {
    5
}
fn default_snapshot_period() -> Cycle {
    3
}
fn default_persist_retries() -> u32 {
    3
}
fn default_expansion_fan_out() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            initial_confidence: default_initial_confidence(),
            reinforcement_gain: default_reinforcement_gain(),
            relation_increment: default_relation_increment(),
            consolidation_period: default_consolidation_period(),
            snapshot_period: default_snapshot_period(),
            persist_retries: default_persist_retries(),
            expansion_fan_out: default_expansion_fan_out(),
            retrieval: RetrievalWeights::default(),
            consolidation: ConsolidationTuning::default(),
        }
    }
}

impl EngineConfig {
    /// In-memory config rooted at `data_dir` for persistence.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> SeshatResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: &Path) -> SeshatResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::ConfigWrite {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(path, content).map_err(|e| EngineError::ConfigWrite {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Reject configurations that would violate the confidence/weight model.
    pub fn validate(&self) -> SeshatResult<()> {
        let unit = |name: &str, v: f32| -> Result<(), EngineError> {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(EngineError::InvalidConfig {
                    message: format!("{name} must be in [0.0, 1.0], got {v}"),
                });
            }
            Ok(())
        };
        unit("initial_confidence", self.initial_confidence)?;
        unit("reinforcement_gain", self.reinforcement_gain)?;
        unit("relation_increment", self.relation_increment)?;
        unit("consolidation.concept_decay_rate", self.consolidation.concept_decay_rate)?;
        unit("consolidation.relation_decay_rate", self.consolidation.relation_decay_rate)?;
        unit("consolidation.merge_threshold", self.consolidation.merge_threshold)?;
        unit("consolidation.merge_synergy_bonus", self.consolidation.merge_synergy_bonus)?;
        unit("consolidation.prune_confidence", self.consolidation.prune_confidence)?;
        unit("consolidation.prune_weight", self.consolidation.prune_weight)?;
        for (name, v) in [
            ("retrieval.lexical", self.retrieval.lexical),
            ("retrieval.confidence", self.retrieval.confidence),
            ("retrieval.recency", self.retrieval.recency),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::InvalidConfig {
                    message: format!("{name} must be non-negative, got {v}"),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// What one ingested experience did to the graph.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Cycle assigned to this experience.
    pub cycle: Cycle,
    pub concepts_touched: usize,
    pub relations_touched: usize,
    /// Relation observations dropped (unknown endpoint label or self-loop).
    pub relations_skipped: usize,
    /// Present when this ingestion triggered a consolidation pass.
    pub consolidation: Option<ConsolidationReport>,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub concept_count: usize,
    pub relation_count: usize,
    pub cycle_count: Cycle,
    pub last_consolidation_cycle: Cycle,
    pub persistent: bool,
    /// True once snapshot writes have been given up on for this process.
    pub degraded: bool,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} concepts, {} relationships, cycle {} (last consolidation at {}), {}",
            self.concept_count,
            self.relation_count,
            self.cycle_count,
            self.last_consolidation_cycle,
            match (self.persistent, self.degraded) {
                (false, _) => "in-memory",
                (true, false) => "persistent",
                (true, true) => "persistent (degraded)",
            }
        )
    }
}

/// The persistent knowledge memory engine.
pub struct Engine {
    config: EngineConfig,
    graph: RwLock<KnowledgeGraph>,
    gateway: Option<SnapshotGateway>,
    similarity: Box<dyn Similarity>,
    cancel: CancelToken,
    degraded: AtomicBool,
}

impl Engine {
    /// Create an engine, restoring prior state if `data_dir` is configured
    /// and holds a valid snapshot.
    ///
    /// A corrupt snapshot is logged and discarded; the engine starts fresh
    /// rather than refusing to come up.
    pub fn new(config: EngineConfig) -> SeshatResult<Self> {
        Self::with_similarity(config, Box::new(LexicalSimilarity))
    }

    /// Like [`Engine::new`] with a caller-supplied similarity strategy.
    pub fn with_similarity(
        config: EngineConfig,
        similarity: Box<dyn Similarity>,
    ) -> SeshatResult<Self> {
        config.validate()?;
        let gateway = match &config.data_dir {
            Some(dir) => Some(SnapshotGateway::open(dir)?),
            None => None,
        };
        let graph = match gateway.as_ref().map(SnapshotGateway::load) {
            Some(Loaded::Snapshot(snapshot)) => match KnowledgeGraph::from_snapshot(snapshot) {
                Ok(graph) => graph,
                Err(e) => {
                    tracing::warn!(error = %e, "restored snapshot failed validation, starting fresh");
                    KnowledgeGraph::new()
                }
            },
            Some(Loaded::Fresh) | Some(Loaded::CorruptDiscarded) | None => KnowledgeGraph::new(),
        };
        tracing::info!(
            concepts = graph.concept_count(),
            relationships = graph.relation_count(),
            cycle = graph.cycle_count(),
            persistent = gateway.is_some(),
            "engine started"
        );
        Ok(Self {
            config,
            graph: RwLock::new(graph),
            gateway,
            similarity,
            cancel: CancelToken::new(),
            degraded: AtomicBool::new(false),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for cancelling an in-flight consolidation merge pass.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// True once snapshot writes have failed past the retry budget.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Ingest one experience: advance the cycle, upsert the extracted
    /// concepts, reinforce the extracted relations, and run the periodic
    /// consolidation/snapshot schedules.
    ///
    /// Relation observations whose endpoints were not extracted as concepts
    /// (in this or any earlier experience) are skipped with a warning, as are
    /// self-loops. `outcome_score` is recorded in the experience log for
    /// provenance; it does not feed confidence.
    pub fn report_experience(
        &self,
        raw_text: &str,
        outcome_score: f32,
        concepts: &[ConceptObservation],
        relations: &[RelationObservation],
    ) -> SeshatResult<IngestReport> {
        let mut report;
        let snapshot_due;
        {
            let mut graph = write_lock(&self.graph);
            let cycle = graph.advance_cycle();
            report = IngestReport {
                cycle,
                concepts_touched: 0,
                relations_touched: 0,
                relations_skipped: 0,
                consolidation: None,
            };

            for obs in concepts {
                graph.upsert_concept(
                    &obs.label,
                    DomainTag::new(&obs.domain),
                    cycle,
                    self.config.initial_confidence,
                    self.config.reinforcement_gain,
                )?;
                report.concepts_touched += 1;
            }

            for obs in relations {
                let (Some(source), Some(target)) =
                    (graph.resolve_label(&obs.source), graph.resolve_label(&obs.target))
                else {
                    tracing::warn!(
                        source = %obs.source,
                        target = %obs.target,
                        "skipping relation with unknown endpoint"
                    );
                    report.relations_skipped += 1;
                    continue;
                };
                if source == target {
                    tracing::warn!(label = %obs.source, "skipping self-loop relation");
                    report.relations_skipped += 1;
                    continue;
                }
                graph.reinforce_relation(
                    source,
                    target,
                    obs.kind.clone(),
                    self.config.relation_increment,
                    cycle,
                )?;
                report.relations_touched += 1;
            }

            if self.config.consolidation_period > 0
                && cycle % self.config.consolidation_period == 0
            {
                self.cancel.reset();
                report.consolidation = Some(consolidate(
                    &mut graph,
                    &self.config.consolidation,
                    self.similarity.as_ref(),
                    &self.cancel,
                )?);
            }

            snapshot_due =
                self.config.snapshot_period > 0 && cycle % self.config.snapshot_period == 0;
        }

        if let Some(gateway) = &self.gateway {
            let experience = Experience {
                cycle_id: report.cycle,
                raw_text: raw_text.to_owned(),
                outcome_score,
                extracted_concepts: concepts.to_vec(),
                extracted_relations: relations.to_vec(),
            };
            if let Err(e) = gateway.append_experience(&experience) {
                tracing::warn!(error = %e, "failed to append to experience log");
            }
            if snapshot_due {
                self.snapshot_with_retry();
            }
        }

        Ok(report)
    }

    /// Rank stored knowledge against `query`, returning at most `k` hits with
    /// their strongest neighbors. Read-only.
    pub fn retrieve(&self, query: &str, k: usize) -> Vec<RetrievedConcept> {
        let graph = read_lock(&self.graph);
        retrieve(
            &graph,
            query,
            k,
            &self.config.retrieval,
            self.config.expansion_fan_out,
        )
    }

    /// Run a consolidation pass now, outside the periodic schedule.
    pub fn force_consolidate(&self) -> SeshatResult<ConsolidationReport> {
        self.cancel.reset();
        let mut graph = write_lock(&self.graph);
        let report = consolidate(
            &mut graph,
            &self.config.consolidation,
            self.similarity.as_ref(),
            &self.cancel,
        )?;
        Ok(report)
    }

    /// Current counters.
    pub fn stats(&self) -> EngineStats {
        let graph = read_lock(&self.graph);
        EngineStats {
            concept_count: graph.concept_count(),
            relation_count: graph.relation_count(),
            cycle_count: graph.cycle_count(),
            last_consolidation_cycle: graph.last_consolidation_cycle(),
            persistent: self.gateway.is_some(),
            degraded: self.is_degraded(),
        }
    }

    /// Human-readable summary with the `top_n` most-used concepts.
    pub fn knowledge_report(&self, top_n: usize) -> KnowledgeReport {
        let graph = read_lock(&self.graph);
        KnowledgeReport::from_graph(&graph, top_n)
    }

    /// Run `f` against the live graph under a read lock.
    pub fn with_graph<T>(&self, f: impl FnOnce(&KnowledgeGraph) -> T) -> T {
        f(&read_lock(&self.graph))
    }

    /// Write a snapshot now, propagating the failure to the caller.
    ///
    /// No-op for in-memory engines.
    pub fn flush(&self) -> SeshatResult<()> {
        let Some(gateway) = &self.gateway else {
            return Ok(());
        };
        let snapshot = self.clone_snapshot();
        gateway.save(&snapshot)?;
        Ok(())
    }

    /// Read back the experience log (empty for in-memory engines).
    pub fn experiences(&self) -> SeshatResult<Vec<Experience>> {
        match &self.gateway {
            Some(gateway) => Ok(gateway.read_experiences()?),
            None => Ok(vec![]),
        }
    }

    /// Drop the experience log; the graph is unaffected.
    pub fn truncate_experience_log(&self) -> SeshatResult<()> {
        if let Some(gateway) = &self.gateway {
            gateway.truncate_log()?;
        }
        Ok(())
    }

    fn clone_snapshot(&self) -> GraphSnapshot {
        read_lock(&self.graph).to_snapshot()
    }

    /// Periodic snapshot path: bounded retries with backoff, then degrade.
    ///
    /// Degradation means the engine keeps serving from memory and logs loudly
    /// rather than failing ingestion over a disk problem.
    fn snapshot_with_retry(&self) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        let snapshot = self.clone_snapshot();
        let mut last_err = None;
        for attempt in 1..=self.config.persist_retries.max(1) {
            match gateway.save(&snapshot) {
                Ok(()) => {
                    self.degraded.store(false, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "snapshot write failed");
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                }
            }
        }
        self.degraded.store(true, Ordering::Relaxed);
        if let Some(e) = last_err {
            tracing::error!(
                error = %e,
                "snapshot writes exhausted retries, engine degraded to in-memory operation"
            );
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Best-effort final snapshot so a clean shutdown loses nothing.
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "final snapshot on shutdown failed");
        }
    }
}

fn read_lock(lock: &RwLock<KnowledgeGraph>) -> std::sync::RwLockReadGuard<'_, KnowledgeGraph> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock(lock: &RwLock<KnowledgeGraph>) -> std::sync::RwLockWriteGuard<'_, KnowledgeGraph> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
