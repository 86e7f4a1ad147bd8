//! Rich diagnostic error types for the seshat engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! what went wrong and whether the condition is recoverable.

use miette::Diagnostic;
use thiserror::Error;

use crate::concept::ConceptId;

/// Top-level error type for the seshat engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum SeshatError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

/// Errors from concept-store and relationship-index operations.
///
/// `ConceptNotFound` and `InvalidMerge` are recoverable caller errors.
/// `Corrupt` signals an internal invariant violation and is fatal for the
/// current graph instance.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("concept not found: {id}")]
    #[diagnostic(
        code(seshat::graph::concept_not_found),
        help(
            "The referenced concept is not live in the graph. It may have been \
             pruned or merged away — re-resolve it by label and retry."
        )
    )]
    ConceptNotFound { id: ConceptId },

    #[error("invalid merge of {drop} into {keep}: {reason}")]
    #[diagnostic(
        code(seshat::graph::invalid_merge),
        help(
            "Merging requires two distinct live concepts. Check that both ids \
             resolve and that keep != drop."
        )
    )]
    InvalidMerge {
        keep: ConceptId,
        drop: ConceptId,
        reason: String,
    },

    #[error("self-loop rejected: {id} cannot relate to itself")]
    #[diagnostic(
        code(seshat::graph::self_loop),
        help("Relationships connect two distinct concepts. Drop the observation or fix the extraction.")
    )]
    SelfLoop { id: ConceptId },

    #[error("concept id space exhausted")]
    #[diagnostic(
        code(seshat::graph::ids_exhausted),
        help(
            "The concept ID space is exhausted. This requires 2^64 allocations \
             and indicates an allocation loop rather than real usage."
        )
    )]
    IdsExhausted,

    #[error("corrupt graph: {message}")]
    #[diagnostic(
        code(seshat::graph::corrupt),
        help(
            "An internal invariant was violated (e.g. a relationship references \
             a missing concept). The in-flight operation was aborted without \
             committing. Restore from the last good snapshot or start fresh."
        )
    )]
    Corrupt { message: String },
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Errors from snapshot and experience-log I/O.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(seshat::persist::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full. Writes are \
             retried a bounded number of times before the engine degrades to \
             in-memory-only operation."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(seshat::persist::serde),
        help(
            "Failed to serialize or deserialize snapshot data. This usually means \
             the stored format changed between versions."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(seshat::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(seshat::engine::config_read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {path}")]
    #[diagnostic(
        code(seshat::engine::config_parse),
        help("Check the TOML syntax in the engine config file.")
    )]
    ConfigParse { path: String, message: String },

    #[error("failed to write config file: {path}")]
    #[diagnostic(
        code(seshat::engine::config_write),
        help("Ensure you have write permissions to the config directory.")
    )]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for functions returning seshat results.
pub type SeshatResult<T> = std::result::Result<T, SeshatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_converts_to_seshat_error() {
        let err = GraphError::ConceptNotFound {
            id: ConceptId::new(7).unwrap(),
        };
        let top: SeshatError = err.into();
        assert!(matches!(
            top,
            SeshatError::Graph(GraphError::ConceptNotFound { .. })
        ));
    }

    #[test]
    fn persist_error_converts_to_seshat_error() {
        let err = PersistError::Serialization {
            message: "bad".into(),
        };
        let top: SeshatError = err.into();
        assert!(matches!(
            top,
            SeshatError::Persist(PersistError::Serialization { .. })
        ));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let keep = ConceptId::new(1).unwrap();
        let drop = ConceptId::new(2).unwrap();
        let err = GraphError::InvalidMerge {
            keep,
            drop,
            reason: "keep == drop".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("cpt:1"));
        assert!(msg.contains("keep == drop"));
    }
}
