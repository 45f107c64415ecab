//! Session value and lifecycle state machine.
//!
//! The orchestrator exclusively owns the active session; nothing else
//! mutates it. Once `Ended`, a session is read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Active,
    Paused,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Control actions accepted by [`Session::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    End,
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            SessionAction::Start => "start",
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::End => "end",
        }
    }
}

/// One bounded classroom listening activity, from start to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Names of imported material documents.
    pub materials_refs: Vec<String>,
    pub state: SessionState,
}

impl Session {
    pub fn new(name: &str, materials_refs: Vec<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("{}-{}", created_at.format("%Y%m%d-%H%M%S"), short_uuid()),
            name: name.to_string(),
            created_at,
            materials_refs,
            state: SessionState::Created,
        }
    }

    /// Directory name used by the session store.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.created_at.format("%Y-%m-%d"), slugify(&self.name))
    }

    /// Apply a control action, validating the state machine:
    /// `Created -(start)-> Active <-(pause/resume)-> Paused`, and
    /// `Active | Paused -(end)-> Ended`. Invalid transitions are rejected
    /// with no side effects.
    pub fn transition(&mut self, action: SessionAction) -> Result<(), PipelineError> {
        let next = match (self.state, action) {
            (SessionState::Created, SessionAction::Start) => SessionState::Active,
            (SessionState::Active, SessionAction::Pause) => SessionState::Paused,
            (SessionState::Paused, SessionAction::Resume) => SessionState::Active,
            (SessionState::Active, SessionAction::End)
            | (SessionState::Paused, SessionAction::End) => SessionState::Ended,
            (from, action) => {
                return Err(PipelineError::InvalidStateTransition {
                    from: from.to_string(),
                    action: action.name(),
                })
            }
        };
        self.state = next;
        Ok(())
    }
}

fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_lowercase();
    if slug.is_empty() {
        "session".to_string()
    } else {
        slug
    }
}
