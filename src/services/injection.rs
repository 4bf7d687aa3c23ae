// src/services/injection.rs
//! Read-only context injection.
//!
//! Selection ranks stored knowledge for a new conversation without touching
//! trigger counts or confidence; only intake reinforces. The renderer turns
//! a selection into the plain-text profile block an embedder prepends to
//! its system context.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{MemoryAtom, MemoryType, Principle};

pub const PROFILE_OPEN: &str = "<user-profile>";
pub const PROFILE_CLOSE: &str = "</user-profile>";
const PROFILE_INTRO: &str = "Known characteristics and preferences of this user:";
const OVERFLOW_MARKER: &str = "- ...";

/// One selected entry; principles and atoms rank in the same ordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InjectionItem {
    Atom(MemoryAtom),
    Principle(Principle),
}

impl InjectionItem {
    pub fn id(&self) -> &str {
        match self {
            InjectionItem::Atom(a) => &a.id,
            InjectionItem::Principle(p) => &p.id,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            InjectionItem::Atom(a) => a.confidence,
            InjectionItem::Principle(p) => p.confidence,
        }
    }

    /// Recency used for tie-breaking: last trigger for atoms, last update
    /// for principles.
    pub fn recency(&self) -> DateTime<Utc> {
        match self {
            InjectionItem::Atom(a) => a.last_triggered_at,
            InjectionItem::Principle(p) => p.updated_at,
        }
    }
}

/// Rank and cut: confidence descending, ties by recency descending, then
/// ascending id. Inactive principles and entries under the threshold never
/// appear. Pure function of its inputs.
pub fn select(
    atoms: &[MemoryAtom],
    principles: &[Principle],
    max_count: usize,
    confidence_threshold: f64,
) -> Vec<InjectionItem> {
    let mut items: Vec<InjectionItem> = Vec::new();
    for principle in principles {
        if principle.active
            && principle.confidence.is_finite()
            && principle.confidence >= confidence_threshold
        {
            items.push(InjectionItem::Principle(principle.clone()));
        }
    }
    for atom in atoms {
        if atom.confidence.is_finite() && atom.confidence >= confidence_threshold {
            items.push(InjectionItem::Atom(atom.clone()));
        }
    }
    items.sort_by(|a, b| {
        b.confidence()
            .total_cmp(&a.confidence())
            .then_with(|| b.recency().cmp(&a.recency()))
            .then_with(|| a.id().cmp(b.id()))
    });
    items.truncate(max_count);
    items
}

/// Render a selection as the profile block:
///
/// ```text
/// <user-profile>
/// Known characteristics and preferences of this user:
///
/// ## Principles
/// - Writes tests before code (high confidence) [confirmed]
///
/// ## Preferences
/// - prefers dark mode (moderate confidence)
/// </user-profile>
/// ```
///
/// Principles come first, then atoms grouped by type. The body is capped at
/// `max_chars`; overflow is marked with `- ...` and the closing tag is
/// always emitted.
pub fn render_profile(items: &[InjectionItem], max_chars: usize) -> String {
    let mut principle_lines: Vec<String> = Vec::new();
    let mut atom_lines: Vec<(MemoryType, String)> = Vec::new();
    for item in items {
        match item {
            InjectionItem::Principle(p) => {
                let confirmed = if p.user_confirmed { " [confirmed]" } else { "" };
                principle_lines.push(format!(
                    "- {}{}{confirmed}",
                    p.statement,
                    confidence_marker(p.confidence)
                ));
            }
            InjectionItem::Atom(a) => {
                atom_lines.push((
                    a.kind,
                    format!("- {}{}", a.content, confidence_marker(a.confidence)),
                ));
            }
        }
    }

    let mut body: Vec<String> = Vec::new();
    if !principle_lines.is_empty() {
        body.push(String::new());
        body.push("## Principles".to_string());
        body.extend(principle_lines);
    }
    for kind in MemoryType::ALL {
        let lines: Vec<&String> = atom_lines
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, line)| line)
            .collect();
        if lines.is_empty() {
            continue;
        }
        body.push(String::new());
        body.push(format!("## {}", section_label(kind)));
        for line in lines {
            body.push(line.clone());
        }
    }

    let mut rendered: Vec<String> = vec![PROFILE_OPEN.to_string(), PROFILE_INTRO.to_string()];
    let mut used: usize = rendered.iter().map(|l| l.chars().count() + 1).sum();
    for line in body {
        let cost = line.chars().count() + 1;
        if used + cost > max_chars {
            rendered.push(OVERFLOW_MARKER.to_string());
            break;
        }
        used += cost;
        rendered.push(line);
    }
    rendered.push(PROFILE_CLOSE.to_string());
    rendered.join("\n")
}

fn confidence_marker(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        " (high confidence)"
    } else if confidence >= 0.6 {
        " (moderate confidence)"
    } else if confidence >= 0.4 {
        " (low confidence)"
    } else {
        ""
    }
}

fn section_label(kind: MemoryType) -> &'static str {
    match kind {
        MemoryType::Identity => "Identity",
        MemoryType::Value => "Values",
        MemoryType::Thinking => "Thinking patterns",
        MemoryType::Preference => "Preferences",
        MemoryType::Communication => "Communication style",
    }
}
