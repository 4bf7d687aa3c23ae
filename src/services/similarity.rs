// src/services/similarity.rs
//! Token-set similarity between atoms.
//!
//! Dedup at intake and clustering during aggregation both ride on the same
//! measure: Jaccard overlap of lowercase alphanumeric token sets. Atoms of
//! different types never match, whatever their wording.

use crate::models::MemoryAtom;
use crate::utils::text;

/// Jaccard similarity of two content strings in `[0.0, 1.0]`.
///
/// Two empty contents count as identical; one empty side scores zero.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    let ta = text::tokens(a);
    let tb = text::tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

/// Similarity between two atoms, gated on matching type.
pub fn similar(a: &MemoryAtom, b: &MemoryAtom) -> f64 {
    if a.kind != b.kind {
        return 0.0;
    }
    content_similarity(&a.content, &b.content)
}
