// src/models.rs
//! Domain records shared across services.
//!
//! - `MemoryAtom` — a single scored, typed observation about the user.
//! - `Principle` — a stable statement aggregated from a cluster of atoms.
//! - `EvolutionEvent` — immutable audit record of a structural change.
//! - `Evidence` — immutable link from an atom to its conversation excerpt.
//!
//! All records serialize with snake_case wire forms and RFC 3339 UTC
//! timestamps so snapshots stay readable and diffable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::errors::EngineError;

/// JSON has no NaN/Infinity, so serde_json writes a non-finite confidence
/// as `null`. Read that back as NaN rather than failing the whole tier
/// snapshot; maintenance skips such atoms instead of decaying them.
fn confidence_or_nan<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

// ---------- memory atoms ----------

/// Closed set of observation types the intake boundary accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Identity,
    Value,
    Thinking,
    Preference,
    Communication,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Identity,
        MemoryType::Value,
        MemoryType::Thinking,
        MemoryType::Preference,
        MemoryType::Communication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Identity => "identity",
            MemoryType::Value => "value",
            MemoryType::Thinking => "thinking",
            MemoryType::Preference => "preference",
            MemoryType::Communication => "communication",
        }
    }

    /// Total, deterministic mapping from atom type to the principle
    /// dimension its clusters aggregate into.
    pub fn dimension(&self) -> PrincipleDimension {
        match self {
            MemoryType::Identity => PrincipleDimension::DomainThought,
            MemoryType::Value => PrincipleDimension::Values,
            MemoryType::Thinking => PrincipleDimension::DecisionPattern,
            MemoryType::Preference => PrincipleDimension::Worldview,
            MemoryType::Communication => PrincipleDimension::Worldview,
        }
    }
}

impl FromStr for MemoryType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "identity" => Ok(MemoryType::Identity),
            "value" => Ok(MemoryType::Value),
            "thinking" => Ok(MemoryType::Thinking),
            "preference" => Ok(MemoryType::Preference),
            "communication" => Ok(MemoryType::Communication),
            other => Err(EngineError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention class. Governs the decay half-life and promotion eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    Working,
    LongTerm,
}

impl MemoryTier {
    /// Load/iteration order. Longest retention first so that load-time
    /// reconciliation of a crash-interrupted relocation keeps the promoted
    /// copy (see storage notes in the store).
    pub const ALL: [MemoryTier; 3] = [
        MemoryTier::LongTerm,
        MemoryTier::Working,
        MemoryTier::ShortTerm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::Working => "working",
            MemoryTier::LongTerm => "long_term",
        }
    }

    /// The tier an atom moves into on promotion; `None` from the top.
    pub fn promoted(&self) -> Option<MemoryTier> {
        match self {
            MemoryTier::ShortTerm => Some(MemoryTier::Working),
            MemoryTier::Working => Some(MemoryTier::LongTerm),
            MemoryTier::LongTerm => None,
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scored observation. Belongs to exactly one tier at a time;
/// moving tiers is a relocation, never a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAtom {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub content: String,
    #[serde(deserialize_with = "confidence_or_nan")]
    pub confidence: f64,
    pub tier: MemoryTier,
    pub created_at: DateTime<Utc>,
    pub last_triggered_at: DateTime<Utc>,
    /// Last confidence/tier write. Doubles as the decay anchor: maintenance
    /// decays over `now - updated_at` and then advances it, so repeated
    /// passes compose into one exponential instead of compounding.
    pub updated_at: DateTime<Utc>,
    pub trigger_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_principle_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MemoryAtom {
    /// Fresh atom in `short_term`. Creation counts as the first trigger.
    pub fn new(kind: MemoryType, content: impl Into<String>, confidence: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            confidence,
            tier: MemoryTier::ShortTerm,
            created_at: now,
            last_triggered_at: now,
            updated_at: now,
            trigger_count: 1,
            source_session_id: None,
            related_principle_id: None,
            tags: Vec::new(),
        }
    }

    pub fn with_source_session(mut self, session: Option<String>) -> Self {
        self.source_session_id = session;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Re-observation of the same fact: bump the trigger count, refresh the
    /// trigger timestamp, and nudge confidence up (capped at 1.0).
    pub fn reinforce(&mut self, boost: f64, now: DateTime<Utc>) {
        self.trigger_count = self.trigger_count.saturating_add(1);
        self.last_triggered_at = now;
        self.updated_at = now;
        self.confidence = (self.confidence + boost).min(1.0);
    }
}

// ---------- principles ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipleDimension {
    Worldview,
    Values,
    DecisionPattern,
    DomainThought,
}

impl PrincipleDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipleDimension::Worldview => "worldview",
            PrincipleDimension::Values => "values",
            PrincipleDimension::DecisionPattern => "decision_pattern",
            PrincipleDimension::DomainThought => "domain_thought",
        }
    }
}

impl FromStr for PrincipleDimension {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "worldview" => Ok(PrincipleDimension::Worldview),
            "values" => Ok(PrincipleDimension::Values),
            "decision_pattern" => Ok(PrincipleDimension::DecisionPattern),
            "domain_thought" => Ok(PrincipleDimension::DomainThought),
            other => Err(EngineError::InvalidDimension(other.to_string())),
        }
    }
}

impl fmt::Display for PrincipleDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthesized stable statement backed by a cluster of atoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principle {
    pub id: String,
    pub dimension: PrincipleDimension,
    pub statement: String,
    pub confidence: f64,
    pub evidence_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_confirmed: bool,
    /// Soft-delete flag; an inactive principle is terminal but retained so
    /// atom back-references never dangle.
    pub active: bool,
}

impl Principle {
    pub fn new(
        dimension: PrincipleDimension,
        statement: impl Into<String>,
        confidence: f64,
        evidence_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dimension,
            statement: statement.into(),
            confidence,
            evidence_count,
            created_at: now,
            updated_at: now,
            user_confirmed: false,
            active: true,
        }
    }
}

// ---------- evolution events ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AtomCreated,
    PrincipleFormed,
    PrincipleUpdated,
    PrincipleConfirmed,
    PrincipleCorrected,
    PrincipleDeleted,
    AtomPromoted,
    AtomDecayedOut,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AtomCreated => "atom_created",
            EventKind::PrincipleFormed => "principle_formed",
            EventKind::PrincipleUpdated => "principle_updated",
            EventKind::PrincipleConfirmed => "principle_confirmed",
            EventKind::PrincipleCorrected => "principle_corrected",
            EventKind::PrincipleDeleted => "principle_deleted",
            EventKind::AtomPromoted => "atom_promoted",
            EventKind::AtomDecayedOut => "atom_decayed_out",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record; never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    pub id: String,
    pub event_type: EventKind,
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form context, e.g. a correction reason or the promotion edge.
    #[serde(default)]
    pub detail: String,
}

impl EvolutionEvent {
    pub fn new(
        event_type: EventKind,
        target_id: impl Into<String>,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            target_id: target_id.into(),
            timestamp: now,
            detail: detail.into(),
        }
    }
}

// ---------- evidence ----------

/// Immutable provenance record tying an atom (and optionally the principle
/// it was folded into) to the conversation excerpt that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principle_id: Option<String>,
    pub quote: String,
    /// blake3 hex digest of `quote`; content address for integrity checks
    /// and duplicate suppression.
    pub cid: String,
    /// The atom's confidence at recording time.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------- intake drafts ----------

/// A proposed atom from the external reasoning collaborator, prior to
/// validation. `kind` is a raw string on purpose: the intake boundary owns
/// checking it against the closed enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomDraft {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    /// Stated confidence; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Originating conversation excerpt, recorded in the evidence index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<String>,
}

impl AtomDraft {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            confidence: None,
            evidence: None,
            tags: Vec::new(),
            source_session_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_evidence(mut self, quote: impl Into<String>) -> Self {
        self.evidence = Some(quote.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.source_session_id = Some(session.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}
