// src/commands/api.rs
//! Commands: thin, stable facade over the engine services.
//!
//! - Construction opens (and if needed initializes) one store root.
//! - Mutating entry points take the writer lock for their whole
//!   read-modify-write sequence; reads never lock.
//! - Batch passes take an explicit `now` so embedders and tests control
//!   time; nothing in here calls the wall clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::commands::init;
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::models::{
    AtomDraft, EventKind, Evidence, EvolutionEvent, MemoryAtom, MemoryTier, MemoryType, Principle,
};
use crate::services::aggregator::{
    AggregationReport, Aggregator, ExtractiveSynthesizer, StatementSynthesizer,
};
use crate::services::decay;
use crate::services::evidence::{EvidenceDraft, EvidenceIndex};
use crate::services::evolution::{EvolutionLog, DEFAULT_TIMELINE_LIMIT};
use crate::services::injection::{self, InjectionItem};
use crate::services::principles::{PrincipleFilter, PrincipleStore};
use crate::services::store::{InsertOutcome, MaintenanceReport, MemoryStore};
use crate::storage::lock::WriterLock;
use crate::storage::{self, snapshot, StorePaths};
use crate::utils::text;

/// Outcome of one intake batch. Ids only; fetch details via `show_memory`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub inserted: Vec<String>,
    pub merged: Vec<String>,
    pub rejected: usize,
    pub notes: Vec<String>,
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub short_term: usize,
    pub working: usize,
    pub long_term: usize,
    pub total_memories: usize,
    pub principles: usize,
    pub active_principles: usize,
    pub confirmed_principles: usize,
    pub evidence_records: usize,
    pub events: usize,
    pub last_event_at: Option<DateTime<Utc>>,
}

pub struct Commands {
    config: EngineConfig,
    paths: StorePaths,
    store: MemoryStore,
    principles: PrincipleStore,
    evidence: EvidenceIndex,
    evolution: EvolutionLog,
}

impl Commands {
    /// Open the store at `root`, initializing the layout on first use and
    /// reading `config.toml` from it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        init::ensure_initialized(&root)?;
        let config = EngineConfig::load(&root)?;
        Self::build(root, config)
    }

    /// Open at the ambient root (`PERSONA_ROOT` or `.persona`).
    pub fn open_default() -> Result<Self> {
        Self::open(storage::engine_root())
    }

    /// Open with an explicit configuration, ignoring `config.toml`.
    pub fn open_with_config(root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let root = root.into();
        init::ensure_initialized(&root)?;
        Self::build(root, config)
    }

    fn build(root: PathBuf, config: EngineConfig) -> Result<Self> {
        let paths = StorePaths::new(root);
        let store = MemoryStore::open(&paths)?;
        let principles = PrincipleStore::open(&paths)?;
        let evidence = EvidenceIndex::open(&paths);
        let evolution = EvolutionLog::open(&paths);
        Ok(Self {
            config,
            paths,
            store,
            principles,
            evidence,
            evolution,
        })
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn writer_lock(&self) -> Result<WriterLock> {
        WriterLock::acquire(
            &self.paths.lock_file(),
            Duration::from_millis(self.config.storage.lock_wait_ms),
            Duration::from_secs(self.config.storage.lock_stale_secs),
        )
    }

    // ---------- intake ----------

    /// Validate and store a batch of drafts. A bad draft is rejected with a
    /// note and the batch continues; storage failures abort the batch.
    ///
    /// Per draft: unknown `type` rejects; content is trimmed and truncated
    /// to the configured bound, empty content rejects; a missing or
    /// non-finite confidence takes the default, out-of-range values are
    /// clamped into `[0, 1]`. Evidence text files an evidence row against
    /// the resulting (or reinforced) atom.
    pub fn ingest(&self, drafts: &[AtomDraft], now: DateTime<Utc>) -> Result<IntakeReport> {
        let _lock = self.writer_lock()?;
        let mut report = IntakeReport::default();
        for (idx, draft) in drafts.iter().enumerate() {
            let kind = match MemoryType::from_str(&draft.kind) {
                Ok(kind) => kind,
                Err(err) => {
                    report.rejected += 1;
                    report.notes.push(format!("draft {idx}: {err}"));
                    continue;
                }
            };
            let content =
                text::truncate_chars(draft.content.trim(), self.config.memory.content_max_chars);
            if content.is_empty() {
                report.rejected += 1;
                report.notes.push(format!("draft {idx}: empty content"));
                continue;
            }
            let confidence =
                clamp_confidence(draft.confidence, self.config.memory.default_confidence);
            let candidate = MemoryAtom::new(kind, content, confidence, now)
                .with_source_session(draft.source_session_id.clone())
                .with_tags(draft.tags.clone());
            let outcome = self
                .store
                .insert(candidate, &self.config, &self.evolution, now)?;
            if let Some(quote) = draft.evidence.as_deref() {
                if !quote.trim().is_empty() {
                    let atom = outcome.atom();
                    self.evidence.record(
                        EvidenceDraft {
                            memory_id: Some(&atom.id),
                            principle_id: None,
                            quote,
                            weight: atom.confidence,
                            source_session_id: draft.source_session_id.as_deref(),
                        },
                        self.config.memory.quote_max_chars,
                        now,
                    )?;
                }
            }
            match outcome {
                InsertOutcome::Inserted(atom) => report.inserted.push(atom.id),
                InsertOutcome::MergedInto(atom) => report.merged.push(atom.id),
            }
        }
        tracing::info!(
            inserted = report.inserted.len(),
            merged = report.merged.len(),
            rejected = report.rejected,
            "intake batch complete"
        );
        Ok(report)
    }

    // ---------- background passes ----------

    /// Decay, floor removal, and promotion across all tiers.
    pub fn apply_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let _lock = self.writer_lock()?;
        self.store
            .apply_maintenance(&self.config, &self.evolution, &self.principles, now)
    }

    /// Aggregation with the built-in extractive synthesizer.
    pub fn aggregate(&self, now: DateTime<Utc>) -> Result<AggregationReport> {
        self.aggregate_with(&ExtractiveSynthesizer, now)
    }

    /// Aggregation with a caller-provided statement synthesizer.
    pub fn aggregate_with(
        &self,
        synthesizer: &dyn StatementSynthesizer,
        now: DateTime<Utc>,
    ) -> Result<AggregationReport> {
        let _lock = self.writer_lock()?;
        let aggregator = Aggregator {
            store: &self.store,
            principles: &self.principles,
            evidence: &self.evidence,
            evolution: &self.evolution,
            synthesizer,
        };
        aggregator.aggregate(&self.config, now)
    }

    // ---------- memories ----------

    pub fn list_memories(
        &self,
        kind: Option<MemoryType>,
        tier: Option<MemoryTier>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryAtom>> {
        self.store.list(kind, tier, limit)
    }

    /// Lookup by full id or a prefix of at least 8 characters.
    pub fn show_memory(&self, reference: &str) -> Result<MemoryAtom> {
        self.store.get(reference)
    }

    /// Remove an atom. A backing principle keeps its statement but its
    /// evidence count drops by one.
    pub fn delete_memory(&self, reference: &str, now: DateTime<Utc>) -> Result<MemoryAtom> {
        let _lock = self.writer_lock()?;
        self.store.delete(reference, &self.principles, now)
    }

    /// When the atom would decay out, assuming no further reinforcement.
    pub fn projected_decay_out(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let atom = self.store.get(reference)?;
        Ok(decay::projected_decay_out(&atom, &self.config.decay, now))
    }

    // ---------- principles ----------

    pub fn list_principles(&self, filter: &PrincipleFilter) -> Result<Vec<Principle>> {
        self.principles.list(filter)
    }

    /// Lookup by full id or prefix; deleted principles stay visible here.
    pub fn show_principle(&self, reference: &str) -> Result<Principle> {
        self.principles.get(reference)
    }

    pub fn confirm_principle(&self, reference: &str, now: DateTime<Utc>) -> Result<Principle> {
        let _lock = self.writer_lock()?;
        self.principles.confirm(
            reference,
            self.config.aggregation.confirm_boost,
            &self.evolution,
            now,
        )
    }

    pub fn correct_principle(
        &self,
        reference: &str,
        statement: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Principle> {
        let _lock = self.writer_lock()?;
        self.principles.correct(
            reference,
            statement,
            reason,
            self.config.aggregation.statement_max_chars,
            &self.evolution,
            now,
        )
    }

    /// Soft delete; the principle stops influencing injection but its row
    /// and history remain.
    pub fn delete_principle(&self, reference: &str, now: DateTime<Utc>) -> Result<Principle> {
        let _lock = self.writer_lock()?;
        self.principles.deactivate(reference, &self.evolution, now)
    }

    // ---------- evidence ----------

    pub fn evidence_for_memory(&self, reference: &str) -> Result<Vec<Evidence>> {
        let atom = self.store.get(reference)?;
        self.evidence.by_atom(&atom.id)
    }

    pub fn evidence_for_principle(&self, reference: &str) -> Result<Vec<Evidence>> {
        let principle = self.principles.get(reference)?;
        self.evidence.by_principle(&principle.id)
    }

    pub fn evidence_for_session(&self, session_id: &str) -> Result<Vec<Evidence>> {
        self.evidence.by_session(session_id)
    }

    // ---------- history ----------

    /// Full event history, oldest first, optionally for one target.
    pub fn history(&self, target_id: Option<&str>) -> Result<Vec<EvolutionEvent>> {
        self.evolution.history(target_id)
    }

    /// Newest events first; `limit` defaults to 50.
    pub fn timeline(
        &self,
        kind: Option<EventKind>,
        limit: Option<usize>,
    ) -> Result<Vec<EvolutionEvent>> {
        self.evolution
            .timeline(kind, limit.unwrap_or(DEFAULT_TIMELINE_LIMIT))
    }

    // ---------- injection ----------

    /// Ranked selection for a new conversation. Read-only: selection never
    /// counts as a trigger.
    pub fn select_for_injection(
        &self,
        max_count: usize,
        confidence_threshold: f64,
    ) -> Result<Vec<InjectionItem>> {
        let atoms = self.store.load_all()?;
        let principles = self.principles.load_all()?;
        Ok(injection::select(
            &atoms,
            &principles,
            max_count,
            confidence_threshold,
        ))
    }

    /// The rendered profile block for the current selection.
    pub fn injection_profile(
        &self,
        max_count: usize,
        confidence_threshold: f64,
    ) -> Result<String> {
        let items = self.select_for_injection(max_count, confidence_threshold)?;
        Ok(injection::render_profile(
            &items,
            self.config.injection.profile_max_chars,
        ))
    }

    // ---------- store upkeep ----------

    pub fn stats(&self) -> Result<StoreStats> {
        let atoms = self.store.load_all()?;
        let principles = self.principles.load_all()?;
        let mut stats = StoreStats {
            total_memories: atoms.len(),
            principles: principles.len(),
            active_principles: principles.iter().filter(|p| p.active).count(),
            confirmed_principles: principles.iter().filter(|p| p.user_confirmed).count(),
            evidence_records: self.evidence.all()?.len(),
            events: self.evolution.all()?.len(),
            last_event_at: self.evolution.last_event_at()?,
            ..StoreStats::default()
        };
        for atom in &atoms {
            match atom.tier {
                MemoryTier::ShortTerm => stats.short_term += 1,
                MemoryTier::Working => stats.working += 1,
                MemoryTier::LongTerm => stats.long_term += 1,
            }
        }
        Ok(stats)
    }

    /// Upgrade plain-JSON snapshots from older stores to the compressed
    /// form. Returns how many files were migrated.
    pub fn migrate_snapshots(&self) -> Result<usize> {
        let _lock = self.writer_lock()?;
        let mut migrated = 0;
        for tier in MemoryTier::ALL {
            if snapshot::migrate_to_compressed(&self.paths.tier_snapshot(tier))? {
                migrated += 1;
            }
        }
        if snapshot::migrate_to_compressed(&self.paths.principles_snapshot())? {
            migrated += 1;
        }
        Ok(migrated)
    }
}

fn clamp_confidence(stated: Option<f64>, default: f64) -> f64 {
    match stated {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_clamping() {
        assert_eq!(clamp_confidence(Some(0.7), 0.5), 0.7);
        assert_eq!(clamp_confidence(Some(1.7), 0.5), 1.0);
        assert_eq!(clamp_confidence(Some(-0.2), 0.5), 0.0);
        assert_eq!(clamp_confidence(Some(f64::NAN), 0.5), 0.5);
        assert_eq!(clamp_confidence(None, 0.5), 0.5);
    }
}
