//! Persistence gateway: durable snapshot and experience-log I/O.
//!
//! Snapshots are written atomically with respect to crashes: the blob goes to
//! a temporary sibling first, is synced, and only then renamed over the
//! canonical path — a crash mid-write never corrupts the last good snapshot.
//!
//! Loading distinguishes a genuinely-first run from a corrupted snapshot so
//! the two are separable in logs, but both recover by starting fresh rather
//! than failing the caller.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PersistError;
use crate::graph::{Experience, GraphSnapshot};

/// Result type for persistence operations.
pub type PersistResult<T> = std::result::Result<T, PersistError>;

/// Outcome of loading the canonical snapshot.
#[derive(Debug)]
pub enum Loaded {
    /// A valid snapshot was read.
    Snapshot(GraphSnapshot),
    /// No snapshot exists — first run.
    Fresh,
    /// A snapshot exists but could not be read or parsed; it was ignored.
    CorruptDiscarded,
}

/// File-backed gateway for one graph's durable state.
///
/// Owns two artifacts under the data directory: the canonical snapshot
/// (`memory.json`) and an optional append-only experience log
/// (`experience.jsonl`) that can be truncated independently of the graph.
#[derive(Debug)]
pub struct SnapshotGateway {
    snapshot_path: PathBuf,
    log_path: PathBuf,
}

impl SnapshotGateway {
    /// Open a gateway rooted at `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> PersistResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| io_err(data_dir, e))?;
        Ok(Self {
            snapshot_path: data_dir.join("memory.json"),
            log_path: data_dir.join("experience.jsonl"),
        })
    }

    /// Canonical snapshot location.
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Experience log location.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn tmp_path(&self) -> PathBuf {
        self.snapshot_path.with_extension("json.tmp")
    }

    /// Write a snapshot atomically: temp file, sync, rename.
    pub fn save(&self, snapshot: &GraphSnapshot) -> PersistResult<()> {
        let blob = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            PersistError::Serialization {
                message: format!("failed to serialize snapshot: {e}"),
            }
        })?;

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        file.write_all(&blob).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &self.snapshot_path)
            .map_err(|e| io_err(&self.snapshot_path, e))?;

        tracing::debug!(
            path = %self.snapshot_path.display(),
            concepts = snapshot.concepts.len(),
            relationships = snapshot.relationships.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Read the canonical snapshot, if any.
    ///
    /// Never fails the caller: a missing file is a first run, an unreadable
    /// or unparseable file is discarded with a warning. The distinction
    /// matters for operators, so both paths log differently.
    pub fn load(&self) -> Loaded {
        if !self.snapshot_path.exists() {
            tracing::info!(path = %self.snapshot_path.display(), "no snapshot found, starting fresh");
            return Loaded::Fresh;
        }
        let blob = match fs::read(&self.snapshot_path) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(
                    path = %self.snapshot_path.display(),
                    error = %e,
                    "snapshot exists but is unreadable, discarding"
                );
                return Loaded::CorruptDiscarded;
            }
        };
        match serde_json::from_slice::<GraphSnapshot>(&blob) {
            Ok(snapshot) => {
                tracing::info!(
                    path = %self.snapshot_path.display(),
                    concepts = snapshot.concepts.len(),
                    cycle = snapshot.cycle_count,
                    "snapshot loaded"
                );
                Loaded::Snapshot(snapshot)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.snapshot_path.display(),
                    error = %e,
                    "snapshot is corrupt, discarding"
                );
                Loaded::CorruptDiscarded
            }
        }
    }

    /// Append one experience to the log, one JSON object per line.
    pub fn append_experience(&self, experience: &Experience) -> PersistResult<()> {
        let line = serde_json::to_string(experience).map_err(|e| {
            PersistError::Serialization {
                message: format!("failed to serialize experience: {e}"),
            }
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| io_err(&self.log_path, e))?;
        writeln!(file, "{line}").map_err(|e| io_err(&self.log_path, e))?;
        Ok(())
    }

    /// Read back the experience log. Unparseable lines are skipped with a
    /// warning — the log is provenance, not authoritative state.
    pub fn read_experiences(&self) -> PersistResult<Vec<Experience>> {
        let content = match fs::read_to_string(&self.log_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err(&self.log_path, e)),
        };
        let mut experiences = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(exp) => experiences.push(exp),
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "skipping bad experience log line");
                }
            }
        }
        Ok(experiences)
    }

    /// Drop the experience log. Graph integrity is unaffected.
    pub fn truncate_log(&self) -> PersistResult<()> {
        match fs::remove_file(&self.log_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.log_path, e)),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}
