//! Durable session persistence
//!
//! One directory per session:
//!
//! ```text
//! lecture_data/
//! └── 2026-02-09_math-analysis/
//!     ├── meta.json                    # session metadata
//!     ├── transcripts/
//!     │   ├── realtime.jsonl           # one record per final segment, append-only
//!     │   └── full_transcript.txt      # consolidated, written at finalize
//!     └── analysis/
//!         ├── questions.json           # detected questions with their answers
//!         ├── summaries.json
//!         ├── suggestions.json
//!         └── ideas.json
//! ```
//!
//! A single writer task owns every file handle; all topics funnel through it
//! so multi-producer writes can never interleave.

mod writer;

pub use writer::StoreHandle;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::bus::EventBus;
use crate::error::PipelineError;
use crate::session::Session;

/// Session metadata record, persisted as `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub materials: Vec<String>,
    pub summary_interval_secs: u64,
}

/// A detected question together with its answer. A retry replacement
/// supersedes the stored answer rather than appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: crate::events::QuestionEvent,
    pub answer: Option<crate::events::AnswerEvent>,
}

pub struct SessionStore {
    root: PathBuf,
    transcripts_dir: PathBuf,
    analysis_dir: PathBuf,
    session_id: String,
}

impl SessionStore {
    /// Create the session directory tree and write `meta.json`.
    pub fn create(
        data_dir: impl AsRef<Path>,
        session: &Session,
        summary_interval_secs: u64,
    ) -> Result<Self, PipelineError> {
        let root = data_dir.as_ref().join(session.dir_name());
        let transcripts_dir = root.join("transcripts");
        let analysis_dir = root.join("analysis");

        for dir in [&transcripts_dir, &analysis_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create session directory: {}", dir.display()))
                .map_err(persistence)?;
        }

        let meta = SessionMeta {
            session_id: session.id.clone(),
            name: session.name.clone(),
            created_at: session.created_at,
            materials: session.materials_refs.clone(),
            summary_interval_secs,
        };
        write_json_atomic(&root.join("meta.json"), &meta).map_err(persistence)?;

        info!("session directory created: {}", root.display());

        Ok(Self {
            root,
            transcripts_dir,
            analysis_dir,
            session_id: session.id.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Spawn the single writer task and hand back its control handle.
    pub fn spawn_writer(self, bus: Arc<EventBus>) -> Result<StoreHandle, PipelineError> {
        writer::spawn(self, bus)
    }
}

/// List stored sessions by reading each session directory's `meta.json`.
pub fn list_sessions(data_dir: impl AsRef<Path>) -> anyhow::Result<Vec<(PathBuf, SessionMeta)>> {
    let mut sessions = Vec::new();
    let root = data_dir.as_ref();
    if !root.exists() {
        return Ok(sessions);
    }

    let mut entries: Vec<_> = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read data dir: {}", root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    for dir in entries {
        let meta_path = dir.join("meta.json");
        if !meta_path.exists() {
            continue;
        }
        let raw = std::fs::read_to_string(&meta_path)
            .with_context(|| format!("Failed to read {}", meta_path.display()))?;
        let meta: SessionMeta = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed meta.json in {}", dir.display()))?;
        sessions.push((dir, meta));
    }

    Ok(sessions)
}

/// Write a JSON document through a temp file and rename, so a crash mid-write
/// never corrupts the previously committed document.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, payload)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to commit {}", path.display()))?;
    Ok(())
}

fn persistence(e: anyhow::Error) -> PipelineError {
    PipelineError::Persistence(format!("{e:#}"))
}
