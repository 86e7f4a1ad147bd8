//! # seshat
//!
//! A persistent knowledge memory engine: an embeddable library that turns a
//! stream of experiences into a durable, self-organizing knowledge graph.
//!
//! - **Concepts** ([`concept`]) are label-unique, confidence-weighted nodes
//!   that strengthen with repetition and fade when ignored.
//! - **Relationships** ([`graph`]) are weighted, typed directed edges
//!   reinforced by co-occurrence.
//! - **Consolidation** ([`consolidate`]) is the periodic maintenance pass:
//!   decay, near-duplicate merging, and pruning, committed atomically.
//! - **Retrieval** ([`retrieve`]) ranks stored knowledge against a query and
//!   expands hits with their strongest neighbors. Read-only.
//! - **Persistence** ([`persist`]) writes crash-safe snapshots and an
//!   append-only experience log under a data directory.
//!
//! The [`engine::Engine`] facade ties these together behind one lock:
//!
//! ```no_run
//! use seshat::engine::{Engine, EngineConfig};
//! use seshat::graph::{ConceptObservation, RelationObservation, RelationKind};
//!
//! fn main() -> miette::Result<()> {
//!     let engine = Engine::new(EngineConfig::with_data_dir("./memory"))?;
//!
//!     engine.report_experience(
//!         "gravity pulls mass toward mass",
//!         0.9,
//!         &[
//!             ConceptObservation::new("gravity", "physics"),
//!             ConceptObservation::new("mass", "physics"),
//!         ],
//!         &[RelationObservation::new("gravity", "mass", RelationKind::Causes)],
//!     )?;
//!
//!     for hit in engine.retrieve("what pulls mass?", 3) {
//!         println!("{} ({:.2})", hit.concept.label, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

pub mod concept;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod persist;
pub mod retrieve;

pub use engine::{Engine, EngineConfig};
pub use error::{SeshatError, SeshatResult};
