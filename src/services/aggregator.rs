// src/services/aggregator.rs
//! Principle formation and update.
//!
//! Aggregation reads eligible atoms (`working`/`long_term`, confidence at
//! or above the aggregation minimum), groups them by their type-derived
//! dimension, and clusters each group by connected components: any chain of
//! pairwise similarity links atoms into one cluster, whether or not the
//! endpoints resemble each other directly.
//!
//! A cluster with no atom already backing a principle can form a new one
//! once it is large and confident enough. A cluster containing linked
//! atoms folds its unlinked members into the existing principle instead,
//! blending confidence toward the cluster mean.
//!
//! Statement wording goes through [`StatementSynthesizer`] so embedders can
//! plug in their own summarizer; the built-in extractive one needs no
//! external calls and is also the fallback when a plugged-in synthesizer
//! fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::models::{EventKind, EvolutionEvent, MemoryAtom, MemoryTier, Principle, PrincipleDimension};
use crate::services::evidence::{EvidenceDraft, EvidenceIndex};
use crate::services::evolution::EvolutionLog;
use crate::services::principles::PrincipleStore;
use crate::services::similarity;
use crate::services::store::MemoryStore;
use crate::utils::text;

/// Produces the statement for a new principle from its member atoms.
/// Members arrive sorted by ascending id and are never empty.
pub trait StatementSynthesizer {
    fn synthesize(
        &self,
        dimension: PrincipleDimension,
        members: &[MemoryAtom],
    ) -> Result<String>;
}

/// Built-in synthesizer: the highest-confidence member's content, annotated
/// with keywords that recur across the cluster. Deterministic, no external
/// calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSynthesizer;

impl StatementSynthesizer for ExtractiveSynthesizer {
    fn synthesize(
        &self,
        _dimension: PrincipleDimension,
        members: &[MemoryAtom],
    ) -> Result<String> {
        Ok(extractive_statement(members))
    }
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub formed: Vec<Principle>,
    pub updated: Vec<Principle>,
    pub notes: Vec<String>,
}

/// Borrowing driver over the stores involved in one pass.
pub struct Aggregator<'a> {
    pub store: &'a MemoryStore,
    pub principles: &'a PrincipleStore,
    pub evidence: &'a EvidenceIndex,
    pub evolution: &'a EvolutionLog,
    pub synthesizer: &'a dyn StatementSynthesizer,
}

impl Aggregator<'_> {
    pub fn aggregate(&self, cfg: &EngineConfig, now: DateTime<Utc>) -> Result<AggregationReport> {
        let mut report = AggregationReport::default();

        let mut eligible: Vec<MemoryAtom> = self
            .store
            .load_all()?
            .into_iter()
            .filter(|a| {
                matches!(a.tier, MemoryTier::Working | MemoryTier::LongTerm)
                    && a.confidence.is_finite()
                    && a.confidence >= cfg.aggregation.min_confidence
            })
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));

        let mut groups: BTreeMap<PrincipleDimension, Vec<MemoryAtom>> = BTreeMap::new();
        for atom in eligible {
            groups.entry(atom.kind.dimension()).or_default().push(atom);
        }

        for (dimension, atoms) in &groups {
            for cluster in clusters(atoms, cfg.aggregation.similarity_threshold) {
                let members: Vec<MemoryAtom> = cluster.into_iter().cloned().collect();
                let mean =
                    members.iter().map(|a| a.confidence).sum::<f64>() / members.len() as f64;
                if mean < cfg.aggregation.min_confidence {
                    continue;
                }
                let (linked, unlinked): (Vec<&MemoryAtom>, Vec<&MemoryAtom>) = members
                    .iter()
                    .partition(|a| a.related_principle_id.is_some());

                if linked.is_empty() {
                    if members.len() < cfg.aggregation.min_cluster_size {
                        continue;
                    }
                    self.form_or_fold(*dimension, &members, mean, cfg, now, &mut report)?;
                } else {
                    if unlinked.is_empty() {
                        continue;
                    }
                    // Members are in ascending id order, so the first linked
                    // atom is the anchor that picks the target principle.
                    let anchor_id = linked[0]
                        .related_principle_id
                        .clone()
                        .unwrap_or_default();
                    let principle = match self.principles.get(&anchor_id) {
                        Ok(p) => p,
                        Err(err) if err.is_not_found() => {
                            report.notes.push(format!(
                                "cluster anchored to missing principle {anchor_id}, skipped"
                            ));
                            continue;
                        }
                        Err(err) => return Err(err),
                    };
                    if !principle.active {
                        report.notes.push(format!(
                            "cluster anchored to inactive principle {}, skipped",
                            principle.id
                        ));
                        continue;
                    }
                    let new_members: Vec<MemoryAtom> =
                        unlinked.into_iter().cloned().collect();
                    let refreshed = self.fold_into(principle, &new_members, mean, cfg, now)?;
                    report.updated.push(refreshed);
                }
            }
        }

        tracing::info!(
            formed = report.formed.len(),
            updated = report.updated.len(),
            "aggregation pass complete"
        );
        Ok(report)
    }

    /// Formation path for an all-unlinked cluster. When an active principle
    /// with the same dimension and statement already exists (for instance a
    /// pass interrupted between the principle write and the member links),
    /// the cluster folds into it instead of forming a duplicate.
    fn form_or_fold(
        &self,
        dimension: PrincipleDimension,
        members: &[MemoryAtom],
        mean: f64,
        cfg: &EngineConfig,
        now: DateTime<Utc>,
        report: &mut AggregationReport,
    ) -> Result<()> {
        let statement = self.statement_for(dimension, members, cfg, &mut report.notes);
        let existing = self
            .principles
            .load_all()?
            .into_iter()
            .find(|p| p.active && p.dimension == dimension && p.statement == statement);
        if let Some(existing) = existing {
            report.notes.push(format!(
                "cluster matched existing principle {}, folded instead of forming",
                existing.id
            ));
            let refreshed = self.fold_into(existing, members, mean, cfg, now)?;
            report.updated.push(refreshed);
            return Ok(());
        }

        let principle = Principle::new(dimension, &statement, mean, members.len() as u32, now);
        let event = EvolutionEvent::new(
            EventKind::PrincipleFormed,
            &principle.id,
            format!(
                "{dimension} from {} memories, confidence {mean:.2}",
                members.len()
            ),
            now,
        );
        self.principles
            .save_with_event(&principle, &event, self.evolution)?;
        let ids: Vec<String> = members.iter().map(|a| a.id.clone()).collect();
        self.store.link_to_principle(&ids, &principle.id)?;
        for member in members {
            self.evidence.record(
                EvidenceDraft {
                    memory_id: Some(&member.id),
                    principle_id: Some(&principle.id),
                    quote: &member.content,
                    weight: member.confidence,
                    source_session_id: member.source_session_id.as_deref(),
                },
                cfg.memory.quote_max_chars,
                now,
            )?;
        }
        tracing::info!(
            id = %principle.id,
            dimension = %dimension,
            members = members.len(),
            "principle formed"
        );
        report.formed.push(principle);
        Ok(())
    }

    /// Fold new members into an existing principle: blend confidence toward
    /// the cluster mean, grow the evidence count, link the atoms, and file
    /// one evidence row per new member.
    fn fold_into(
        &self,
        mut principle: Principle,
        new_members: &[MemoryAtom],
        cluster_mean: f64,
        cfg: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Principle> {
        let previous = principle.confidence;
        let w = cfg.aggregation.existing_weight;
        principle.confidence = w * principle.confidence + (1.0 - w) * cluster_mean;
        principle.evidence_count = principle
            .evidence_count
            .saturating_add(new_members.len() as u32);
        principle.updated_at = now;
        let event = EvolutionEvent::new(
            EventKind::PrincipleUpdated,
            &principle.id,
            format!(
                "{} new memories, confidence {previous:.2} -> {:.2}",
                new_members.len(),
                principle.confidence
            ),
            now,
        );
        self.principles
            .save_with_event(&principle, &event, self.evolution)?;
        let ids: Vec<String> = new_members.iter().map(|a| a.id.clone()).collect();
        self.store.link_to_principle(&ids, &principle.id)?;
        for member in new_members {
            self.evidence.record(
                EvidenceDraft {
                    memory_id: Some(&member.id),
                    principle_id: Some(&principle.id),
                    quote: &member.content,
                    weight: member.confidence,
                    source_session_id: member.source_session_id.as_deref(),
                },
                cfg.memory.quote_max_chars,
                now,
            )?;
        }
        tracing::info!(id = %principle.id, added = new_members.len(), "principle updated");
        Ok(principle)
    }

    fn statement_for(
        &self,
        dimension: PrincipleDimension,
        members: &[MemoryAtom],
        cfg: &EngineConfig,
        notes: &mut Vec<String>,
    ) -> String {
        let raw = match self.synthesizer.synthesize(dimension, members) {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) => {
                notes.push("synthesizer returned an empty statement, using extractive fallback".to_string());
                extractive_statement(members)
            }
            Err(err) => {
                notes.push(format!("synthesizer failed ({err}), using extractive fallback"));
                extractive_statement(members)
            }
        };
        text::truncate_chars(raw.trim(), cfg.aggregation.statement_max_chars)
    }
}

/// Connected components over pairwise similarity. Input is sorted by id;
/// each output cluster keeps that order, and clusters come out ordered by
/// their lowest member id.
fn clusters(atoms: &[MemoryAtom], threshold: f64) -> Vec<Vec<&MemoryAtom>> {
    let n = atoms.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if similarity::similar(&atoms[i], &atoms[j]) >= threshold {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    // Smaller index as root keeps clusters id-ordered.
                    let (lo, hi) = if ri < rj { (ri, rj) } else { (rj, ri) };
                    parent[hi] = lo;
                }
            }
        }
    }

    let mut grouped: BTreeMap<usize, Vec<&MemoryAtom>> = BTreeMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        grouped.entry(root).or_default().push(&atoms[i]);
    }
    grouped.into_values().collect()
}

fn extractive_statement(members: &[MemoryAtom]) -> String {
    let Some(mut anchor) = members.first() else {
        return String::new();
    };
    for member in &members[1..] {
        if member.confidence > anchor.confidence {
            anchor = member;
        }
    }
    let anchor_tokens = text::tokens(&anchor.content);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        for keyword in text::keywords(&member.content) {
            *counts.entry(keyword).or_insert(0) += 1;
        }
    }
    let mut themes: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(token, count)| *count >= 2 && !anchor_tokens.contains(token))
        .collect();
    themes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let themes: Vec<String> = themes.into_iter().take(3).map(|(token, _)| token).collect();
    if themes.is_empty() {
        anchor.content.clone()
    } else {
        format!("{} (recurring: {})", anchor.content, themes.join(", "))
    }
}
