// src/services/evidence.rs
//! Append-only evidence index.
//!
//! Each record ties an atom (and, once aggregation has folded it into a
//! principle, that principle) back to the conversation excerpt that produced
//! it. Rows are content-addressed with a blake3 digest of the stored quote;
//! the same quote for the same target is recorded once.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::Result;
use crate::storage::{snapshot, StorePaths};
use crate::{models::Evidence, utils::text};

/// Borrowed inputs for one evidence row.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceDraft<'a> {
    pub memory_id: Option<&'a str>,
    pub principle_id: Option<&'a str>,
    pub quote: &'a str,
    /// Confidence of the backing atom at recording time.
    pub weight: f64,
    pub source_session_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct EvidenceIndex {
    path: PathBuf,
}

impl EvidenceIndex {
    pub fn open(paths: &StorePaths) -> Self {
        Self {
            path: paths.evidence_index(),
        }
    }

    /// Append one evidence row, truncating the quote to `max_quote_chars`.
    ///
    /// Returns `Ok(None)` when an identical quote is already on file for the
    /// same atom/principle pair.
    pub fn record(
        &self,
        draft: EvidenceDraft<'_>,
        max_quote_chars: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Evidence>> {
        if draft.memory_id.is_none() && draft.principle_id.is_none() {
            return Err(anyhow::anyhow!("evidence needs an atom or principle reference").into());
        }
        let quote = text::truncate_chars(draft.quote.trim(), max_quote_chars);
        let cid = blake3::hash(quote.as_bytes()).to_hex().to_string();
        let existing = self.all()?;
        let duplicate = existing.iter().any(|e| {
            e.cid == cid
                && e.memory_id.as_deref() == draft.memory_id
                && e.principle_id.as_deref() == draft.principle_id
        });
        if duplicate {
            tracing::debug!(cid = %cid, "duplicate evidence quote skipped");
            return Ok(None);
        }
        let record = Evidence {
            id: Uuid::new_v4().to_string(),
            memory_id: draft.memory_id.map(str::to_string),
            principle_id: draft.principle_id.map(str::to_string),
            quote,
            cid,
            weight: draft.weight,
            source_session_id: draft.source_session_id.map(str::to_string),
            timestamp: now,
        };
        snapshot::append_jsonl(&self.path, &record)?;
        Ok(Some(record))
    }

    pub fn all(&self) -> Result<Vec<Evidence>> {
        Ok(snapshot::read_jsonl(&self.path)?)
    }

    pub fn by_atom(&self, memory_id: &str) -> Result<Vec<Evidence>> {
        let mut rows = self.all()?;
        rows.retain(|e| e.memory_id.as_deref() == Some(memory_id));
        Ok(rows)
    }

    pub fn by_principle(&self, principle_id: &str) -> Result<Vec<Evidence>> {
        let mut rows = self.all()?;
        rows.retain(|e| e.principle_id.as_deref() == Some(principle_id));
        Ok(rows)
    }

    pub fn by_session(&self, session_id: &str) -> Result<Vec<Evidence>> {
        let mut rows = self.all()?;
        rows.retain(|e| e.source_session_id.as_deref() == Some(session_id));
        Ok(rows)
    }
}
