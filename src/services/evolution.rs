// src/services/evolution.rs
//! Append-only evolution log.
//!
//! Every structural change (atom creation/promotion/decay-out, principle
//! formation and lifecycle) lands here as one JSONL record. The log is the
//! audit trail behind the history and timeline views; records are never
//! rewritten or deleted, and append failures surface as storage errors
//! rather than being swallowed.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::errors::Result;
use crate::models::{EventKind, EvolutionEvent};
use crate::storage::{snapshot, StorePaths};

pub const DEFAULT_TIMELINE_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct EvolutionLog {
    path: PathBuf,
}

impl EvolutionLog {
    pub fn open(paths: &StorePaths) -> Self {
        Self {
            path: paths.evolution_log(),
        }
    }

    /// Append one event. The caller decides what to do on failure; nothing
    /// is retried or dropped here.
    pub fn record(&self, event: &EvolutionEvent) -> Result<()> {
        snapshot::append_jsonl(&self.path, event)?;
        tracing::debug!(
            event = event.event_type.as_str(),
            target = %event.target_id,
            "evolution event recorded"
        );
        Ok(())
    }

    /// Every parseable event in file order.
    pub fn all(&self) -> Result<Vec<EvolutionEvent>> {
        Ok(snapshot::read_jsonl(&self.path)?)
    }

    /// Full history, optionally narrowed to one target, oldest first.
    /// Equal timestamps keep insertion order.
    pub fn history(&self, target_id: Option<&str>) -> Result<Vec<EvolutionEvent>> {
        let mut events = self.all()?;
        if let Some(target) = target_id {
            events.retain(|e| e.target_id == target);
        }
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// Display view: newest first, optionally filtered by kind, capped.
    pub fn timeline(&self, kind: Option<EventKind>, limit: usize) -> Result<Vec<EvolutionEvent>> {
        let mut events = self.all()?;
        if let Some(kind) = kind {
            events.retain(|e| e.event_type == kind);
        }
        events.sort_by_key(|e| e.timestamp);
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    /// Timestamp of the most recent event, if any.
    pub fn last_event_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.all()?.iter().map(|e| e.timestamp).max())
    }
}
