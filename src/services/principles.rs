// src/services/principles.rs
//! Principle snapshot and lifecycle operations.
//!
//! All principles live in one compressed snapshot. Lifecycle mutations
//! (confirm, correct, deactivate) pair the snapshot write with an evolution
//! event: the snapshot goes first, and if the event append fails the
//! previous snapshot is restored so the two stay in step.
//!
//! Deletion is soft. An inactive principle keeps its row so atom
//! back-references never dangle, but every lifecycle operation on it fails
//! with `AlreadyDeleted`.

use chrono::{DateTime, Utc};
use std::fs;

use crate::errors::{EngineError, Result};
use crate::models::{EventKind, EvolutionEvent, Principle, PrincipleDimension};
use crate::services::evolution::EvolutionLog;
use crate::services::store::MIN_PREFIX_CHARS;
use crate::storage::{snapshot, StorePaths};
use crate::utils::text;

/// Listing filter; the default lists every active principle.
#[derive(Debug, Clone, Default)]
pub struct PrincipleFilter {
    pub dimension: Option<PrincipleDimension>,
    pub confirmed: Option<bool>,
    pub include_inactive: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PrincipleStore {
    paths: StorePaths,
}

impl PrincipleStore {
    pub fn open(paths: &StorePaths) -> Result<Self> {
        fs::create_dir_all(paths.principles_dir())
            .map_err(|err| anyhow::Error::new(err).context("create principles directory"))?;
        Ok(Self {
            paths: paths.clone(),
        })
    }

    pub fn load_all(&self) -> Result<Vec<Principle>> {
        Ok(snapshot::read_records(&self.paths.principles_snapshot())?)
    }

    fn save_all(&self, principles: &[Principle]) -> Result<()> {
        Ok(snapshot::write_records(
            &self.paths.principles_snapshot(),
            principles,
        )?)
    }

    /// Lookup by full id or prefix. Inactive principles stay resolvable so
    /// they can be inspected after deletion.
    pub fn get(&self, reference: &str) -> Result<Principle> {
        let principles = self.load_all()?;
        resolve(&principles, reference).cloned()
    }

    /// Filtered listing, highest confidence first, ties by most recent
    /// update and then ascending id.
    pub fn list(&self, filter: &PrincipleFilter) -> Result<Vec<Principle>> {
        let mut principles = self.load_all()?;
        if !filter.include_inactive {
            principles.retain(|p| p.active);
        }
        if let Some(dimension) = filter.dimension {
            principles.retain(|p| p.dimension == dimension);
        }
        if let Some(confirmed) = filter.confirmed {
            principles.retain(|p| p.user_confirmed == confirmed);
        }
        principles.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            principles.truncate(limit);
        }
        Ok(principles)
    }

    /// Upsert one principle and append its event as a unit. The snapshot is
    /// written first; a failed append restores the previous snapshot.
    pub fn save_with_event(
        &self,
        principle: &Principle,
        event: &EvolutionEvent,
        evolution: &EvolutionLog,
    ) -> Result<()> {
        let before = self.load_all()?;
        let mut after = before.clone();
        match after.iter_mut().find(|p| p.id == principle.id) {
            Some(slot) => *slot = principle.clone(),
            None => after.push(principle.clone()),
        }
        self.save_all(&after)?;
        if let Err(err) = evolution.record(event) {
            if let Err(rollback) = self.save_all(&before) {
                tracing::warn!(%rollback, "snapshot rollback after failed event append also failed");
            }
            return Err(err);
        }
        Ok(())
    }

    /// User agreement: boost confidence (capped at 1.0) and mark confirmed.
    pub fn confirm(
        &self,
        reference: &str,
        boost: f64,
        evolution: &EvolutionLog,
        now: DateTime<Utc>,
    ) -> Result<Principle> {
        let mut principle = self.get(reference)?;
        if !principle.active {
            return Err(EngineError::AlreadyDeleted(principle.id));
        }
        let previous = principle.confidence;
        principle.confidence = (principle.confidence + boost).min(1.0);
        principle.user_confirmed = true;
        principle.updated_at = now;
        let event = EvolutionEvent::new(
            EventKind::PrincipleConfirmed,
            &principle.id,
            format!("confidence {previous:.2} -> {:.2}", principle.confidence),
            now,
        );
        self.save_with_event(&principle, &event, evolution)?;
        Ok(principle)
    }

    /// Replace the statement. Confidence is untouched; the correction is
    /// direct user input, so the principle is marked confirmed.
    pub fn correct(
        &self,
        reference: &str,
        statement: &str,
        reason: &str,
        max_chars: usize,
        evolution: &EvolutionLog,
        now: DateTime<Utc>,
    ) -> Result<Principle> {
        let mut principle = self.get(reference)?;
        if !principle.active {
            return Err(EngineError::AlreadyDeleted(principle.id));
        }
        principle.statement = text::truncate_chars(statement.trim(), max_chars);
        principle.user_confirmed = true;
        principle.updated_at = now;
        let event = EvolutionEvent::new(
            EventKind::PrincipleCorrected,
            &principle.id,
            reason.trim(),
            now,
        );
        self.save_with_event(&principle, &event, evolution)?;
        Ok(principle)
    }

    /// Soft delete: flip `active` off and keep the row. Terminal; a second
    /// call fails with `AlreadyDeleted`.
    pub fn deactivate(
        &self,
        reference: &str,
        evolution: &EvolutionLog,
        now: DateTime<Utc>,
    ) -> Result<Principle> {
        let mut principle = self.get(reference)?;
        if !principle.active {
            return Err(EngineError::AlreadyDeleted(principle.id));
        }
        principle.active = false;
        principle.updated_at = now;
        let event = EvolutionEvent::new(
            EventKind::PrincipleDeleted,
            &principle.id,
            text::preview(&principle.statement, 80),
            now,
        );
        self.save_with_event(&principle, &event, evolution)?;
        Ok(principle)
    }

    /// Referential cleanup when a backing atom disappears. Floored at zero,
    /// no event. A missing principle id is tolerated so atom removal never
    /// fails on a stale link.
    pub fn decrement_evidence(&self, principle_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut principles = self.load_all()?;
        let Some(principle) = principles.iter_mut().find(|p| p.id == principle_id) else {
            tracing::warn!(id = %principle_id, "evidence decrement for unknown principle");
            return Ok(());
        };
        principle.evidence_count = principle.evidence_count.saturating_sub(1);
        principle.updated_at = now;
        self.save_all(&principles)?;
        Ok(())
    }
}

fn resolve<'a>(principles: &'a [Principle], reference: &str) -> Result<&'a Principle> {
    let reference = reference.trim();
    if let Some(exact) = principles.iter().find(|p| p.id == reference) {
        return Ok(exact);
    }
    let matches: Vec<&Principle> = principles
        .iter()
        .filter(|p| p.id.starts_with(reference))
        .collect();
    if reference.chars().count() < MIN_PREFIX_CHARS {
        return Err(EngineError::Ambiguous {
            entity: "principle",
            reference: reference.to_string(),
            matches: matches.len(),
        });
    }
    match matches.len() {
        0 => Err(EngineError::principle_not_found(reference)),
        1 => Ok(matches[0]),
        n => Err(EngineError::Ambiguous {
            entity: "principle",
            reference: reference.to_string(),
            matches: n,
        }),
    }
}
