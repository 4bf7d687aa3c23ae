// src/services/store.rs
//! Tiered atom store.
//!
//! Three snapshots, one per tier. Inserts dedup against every tier of the
//! same type so a promoted atom cannot be re-created in `short_term` by a
//! rephrased observation. The maintenance pass decays, removes atoms under
//! the confidence floor, and cascades promotions, all computed from the
//! last persisted state so re-running it is harmless.
//!
//! Crash safety for relocation: tier snapshots are written longest
//! retention first, so a promoted atom is durable in its destination before
//! the source copy disappears. Loading reconciles the duplicate a crash can
//! leave behind by keeping the longer-retention copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::models::{EventKind, EvolutionEvent, MemoryAtom, MemoryTier, MemoryType};
use crate::services::evolution::EvolutionLog;
use crate::services::principles::PrincipleStore;
use crate::services::{decay, similarity};
use crate::storage::{snapshot, StorePaths};
use crate::utils::text;

/// Shortest id prefix the resolver accepts.
pub const MIN_PREFIX_CHARS: usize = 8;

/// What happened to an insert candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InsertOutcome {
    /// Stored as a new atom in `short_term`.
    Inserted(MemoryAtom),
    /// Folded into an existing atom as reinforcement; carries the refreshed
    /// existing atom.
    MergedInto(MemoryAtom),
}

impl InsertOutcome {
    pub fn atom(&self) -> &MemoryAtom {
        match self {
            InsertOutcome::Inserted(a) | InsertOutcome::MergedInto(a) => a,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, InsertOutcome::MergedInto(_))
    }
}

/// Outcome counters for one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub promoted: usize,
    pub decayed_out: usize,
    pub retained: usize,
    pub skipped: usize,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    paths: StorePaths,
}

impl MemoryStore {
    pub fn open(paths: &StorePaths) -> Result<Self> {
        fs::create_dir_all(paths.memories_dir())
            .map_err(|err| anyhow::Error::new(err).context("create memories directory"))?;
        Ok(Self {
            paths: paths.clone(),
        })
    }

    fn load_tier(&self, tier: MemoryTier) -> Result<Vec<MemoryAtom>> {
        Ok(snapshot::read_records(&self.paths.tier_snapshot(tier))?)
    }

    fn save_tier(&self, tier: MemoryTier, atoms: &[MemoryAtom]) -> Result<()> {
        Ok(snapshot::write_records(&self.paths.tier_snapshot(tier), atoms)?)
    }

    /// Every atom across all tiers, longest retention first.
    ///
    /// An id present in two snapshots (crash between relocation writes)
    /// keeps only its longer-retention copy; the stale one is dropped here
    /// and purged from disk by the next write of its tier.
    pub fn load_all(&self) -> Result<Vec<MemoryAtom>> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::new();
        for tier in MemoryTier::ALL {
            for mut atom in self.load_tier(tier)? {
                if seen.insert(atom.id.clone()) {
                    // The snapshot an atom sits in is authoritative for its tier.
                    atom.tier = tier;
                    out.push(atom);
                } else {
                    tracing::warn!(id = %atom.id, tier = %tier, "dropping duplicate atom copy from interrupted relocation");
                }
            }
        }
        Ok(out)
    }

    /// Insert a candidate, deduping against every stored atom of the same
    /// type. At or above the dedup threshold the best match is reinforced
    /// instead (highest similarity wins, ties to the lowest id); otherwise
    /// the candidate lands in `short_term` and an `atom_created` event is
    /// logged.
    pub fn insert(
        &self,
        mut candidate: MemoryAtom,
        cfg: &EngineConfig,
        evolution: &EvolutionLog,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        candidate.tier = MemoryTier::ShortTerm;
        let merge_target = {
            let mut same_type: Vec<&MemoryAtom> = Vec::new();
            let all = self.load_all()?;
            for atom in &all {
                if atom.kind == candidate.kind {
                    same_type.push(atom);
                }
            }
            same_type.sort_by(|a, b| a.id.cmp(&b.id));
            let mut best: Option<(f64, String, MemoryTier)> = None;
            for existing in same_type {
                let score = similarity::content_similarity(&candidate.content, &existing.content);
                let beats = match &best {
                    Some((s, _, _)) => score > *s,
                    None => true,
                };
                if beats {
                    best = Some((score, existing.id.clone(), existing.tier));
                }
            }
            best.filter(|(score, _, _)| *score >= cfg.memory.dedup_threshold)
        };

        if let Some((score, id, tier)) = merge_target {
            let mut atoms = self.load_tier(tier)?;
            let Some(atom) = atoms.iter_mut().find(|a| a.id == id) else {
                return Err(
                    anyhow::anyhow!("dedup target {id} missing from {tier} snapshot").into(),
                );
            };
            atom.reinforce(cfg.memory.reinforce_boost, now);
            let merged = atom.clone();
            self.save_tier(tier, &atoms)?;
            tracing::debug!(id = %merged.id, similarity = score, triggers = merged.trigger_count, "reinforced existing atom");
            return Ok(InsertOutcome::MergedInto(merged));
        }

        let mut atoms = self.load_tier(MemoryTier::ShortTerm)?;
        atoms.push(candidate.clone());
        self.save_tier(MemoryTier::ShortTerm, &atoms)?;
        evolution.record(&EvolutionEvent::new(
            EventKind::AtomCreated,
            &candidate.id,
            format!("{}: {}", candidate.kind, text::preview(&candidate.content, 80)),
            now,
        ))?;
        tracing::debug!(id = %candidate.id, kind = %candidate.kind, "atom created");
        Ok(InsertOutcome::Inserted(candidate))
    }

    /// Lookup by full id or by a prefix of at least [`MIN_PREFIX_CHARS`].
    pub fn get(&self, reference: &str) -> Result<MemoryAtom> {
        let atoms = self.load_all()?;
        resolve(&atoms, reference).cloned()
    }

    /// Atoms filtered by type and tier, most recently triggered first,
    /// equal timestamps ordered by ascending id.
    pub fn list(
        &self,
        kind: Option<MemoryType>,
        tier: Option<MemoryTier>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryAtom>> {
        let mut atoms = self.load_all()?;
        if let Some(kind) = kind {
            atoms.retain(|a| a.kind == kind);
        }
        if let Some(tier) = tier {
            atoms.retain(|a| a.tier == tier);
        }
        atoms.sort_by(|a, b| {
            b.last_triggered_at
                .cmp(&a.last_triggered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = limit {
            atoms.truncate(limit);
        }
        Ok(atoms)
    }

    /// Upsert by id. When the atom moved tiers the destination snapshot is
    /// written before stale copies are removed elsewhere.
    pub fn save(&self, atom: &MemoryAtom) -> Result<()> {
        let mut dest = self.load_tier(atom.tier)?;
        match dest.iter_mut().find(|a| a.id == atom.id) {
            Some(slot) => *slot = atom.clone(),
            None => dest.push(atom.clone()),
        }
        self.save_tier(atom.tier, &dest)?;
        for tier in MemoryTier::ALL {
            if tier == atom.tier {
                continue;
            }
            let mut atoms = self.load_tier(tier)?;
            let before = atoms.len();
            atoms.retain(|a| a.id != atom.id);
            if atoms.len() != before {
                self.save_tier(tier, &atoms)?;
            }
        }
        Ok(())
    }

    /// Stamp `related_principle_id` on the given atoms. Returns how many
    /// links were newly written.
    pub fn link_to_principle(&self, ids: &[String], principle_id: &str) -> Result<usize> {
        let mut linked = 0;
        for tier in MemoryTier::ALL {
            let mut atoms = self.load_tier(tier)?;
            let mut changed = false;
            for atom in atoms.iter_mut() {
                if ids.iter().any(|id| *id == atom.id)
                    && atom.related_principle_id.as_deref() != Some(principle_id)
                {
                    atom.related_principle_id = Some(principle_id.to_string());
                    linked += 1;
                    changed = true;
                }
            }
            if changed {
                self.save_tier(tier, &atoms)?;
            }
        }
        Ok(linked)
    }

    /// Remove an atom and return it. When the atom backed a principle, that
    /// principle's evidence count is decremented (floored at zero); the
    /// principle itself stays as it was.
    pub fn delete(
        &self,
        reference: &str,
        principles: &PrincipleStore,
        now: DateTime<Utc>,
    ) -> Result<MemoryAtom> {
        let removed = self.get(reference)?;
        for tier in MemoryTier::ALL {
            let mut atoms = self.load_tier(tier)?;
            let before = atoms.len();
            atoms.retain(|a| a.id != removed.id);
            if atoms.len() != before {
                self.save_tier(tier, &atoms)?;
            }
        }
        if let Some(principle_id) = &removed.related_principle_id {
            principles.decrement_evidence(principle_id, now)?;
        }
        tracing::debug!(id = %removed.id, tier = %removed.tier, "atom deleted");
        Ok(removed)
    }

    /// One decay/removal/promotion pass over every tier.
    ///
    /// Per atom: decay confidence over `now - updated_at` and advance the
    /// anchor; drop the atom (with an `atom_decayed_out` event) when it
    /// falls strictly below the floor; otherwise promote as long as the
    /// next tier's gates hold, so an atom can cross two tiers in one pass.
    /// Atoms with non-finite confidence are left untouched and counted as
    /// skipped. Running the pass twice at the same instant is a no-op.
    pub fn apply_maintenance(
        &self,
        cfg: &EngineConfig,
        evolution: &EvolutionLog,
        principles: &PrincipleStore,
        now: DateTime<Utc>,
    ) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let mut atoms = self.load_all()?;
        atoms.sort_by(|a, b| a.id.cmp(&b.id));

        let mut events: Vec<EvolutionEvent> = Vec::new();
        let mut decrements: Vec<String> = Vec::new();
        let mut kept: Vec<MemoryAtom> = Vec::with_capacity(atoms.len());

        for mut atom in atoms {
            if !atom.confidence.is_finite() {
                report.skipped += 1;
                report
                    .notes
                    .push(format!("skipped {}: non-finite confidence", atom.id));
                tracing::warn!(id = %atom.id, "skipping atom with non-finite confidence");
                kept.push(atom);
                continue;
            }
            decay::decay_in_place(&mut atom, &cfg.decay, now);
            if atom.confidence < cfg.decay.confidence_floor {
                events.push(EvolutionEvent::new(
                    EventKind::AtomDecayedOut,
                    &atom.id,
                    format!(
                        "{} confidence {:.3} below floor {:.2}",
                        atom.tier, atom.confidence, cfg.decay.confidence_floor
                    ),
                    now,
                ));
                if let Some(principle_id) = &atom.related_principle_id {
                    decrements.push(principle_id.clone());
                }
                report.decayed_out += 1;
                continue;
            }
            let mut moved = false;
            while let Some(next) = decay::promotion_target(&atom, &cfg.promotion) {
                let from = atom.tier;
                atom.tier = next;
                atom.updated_at = now;
                events.push(EvolutionEvent::new(
                    EventKind::AtomPromoted,
                    &atom.id,
                    format!("{from} -> {next}"),
                    now,
                ));
                moved = true;
            }
            if moved {
                report.promoted += 1;
            }
            report.retained += 1;
            kept.push(atom);
        }

        // Destination before source: long_term, then working, then short_term.
        let mut long = Vec::new();
        let mut working = Vec::new();
        let mut short = Vec::new();
        for atom in kept {
            match atom.tier {
                MemoryTier::LongTerm => long.push(atom),
                MemoryTier::Working => working.push(atom),
                MemoryTier::ShortTerm => short.push(atom),
            }
        }
        self.save_tier(MemoryTier::LongTerm, &long)?;
        self.save_tier(MemoryTier::Working, &working)?;
        self.save_tier(MemoryTier::ShortTerm, &short)?;

        for principle_id in decrements {
            principles.decrement_evidence(&principle_id, now)?;
        }
        for event in &events {
            evolution.record(event)?;
        }
        tracing::info!(
            promoted = report.promoted,
            decayed_out = report.decayed_out,
            retained = report.retained,
            skipped = report.skipped,
            "maintenance pass complete"
        );
        Ok(report)
    }
}

fn resolve<'a>(atoms: &'a [MemoryAtom], reference: &str) -> Result<&'a MemoryAtom> {
    let reference = reference.trim();
    if let Some(exact) = atoms.iter().find(|a| a.id == reference) {
        return Ok(exact);
    }
    let matches: Vec<&MemoryAtom> = atoms
        .iter()
        .filter(|a| a.id.starts_with(reference))
        .collect();
    if reference.chars().count() < MIN_PREFIX_CHARS {
        return Err(EngineError::Ambiguous {
            entity: "atom",
            reference: reference.to_string(),
            matches: matches.len(),
        });
    }
    match matches.len() {
        0 => Err(EngineError::atom_not_found(reference)),
        1 => Ok(matches[0]),
        n => Err(EngineError::Ambiguous {
            entity: "atom",
            reference: reference.to_string(),
            matches: n,
        }),
    }
}
