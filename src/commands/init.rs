// src/commands/init.rs
//! Idempotent store initialization.
//!
//! `ensure_initialized` lays down the directory tree, the two append-only
//! logs, and a commented default `config.toml`. Existing files are never
//! touched, so calling it on every open is safe; the report says which
//! pieces were created this time and which already existed.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::storage::{snapshot, StorePaths};

/// Seeded into `<root>/config.toml` on first init. Values mirror the
/// built-in defaults; deleting a line falls back to the built-in.
pub const DEFAULT_CONFIG_TOML: &str = r#"# persona-core store configuration.
# Every key has a built-in default; remove a line to fall back to it.

[system]
name = "persona-core"
version = "0.1.0"

[memory]
# Characters kept from an incoming observation.
content_max_chars = 100
# Characters kept from an evidence quote.
quote_max_chars = 1000
# Confidence assigned when a draft states none.
default_confidence = 0.5
# Similarity at or above this folds a draft into an existing atom.
dedup_threshold = 0.85
# Confidence added per reinforcement, capped at 1.0.
reinforce_boost = 0.05

[decay]
short_term_half_life_days = 7.0
working_half_life_days = 30.0
long_term_half_life_days = 120.0
# Atoms decaying strictly below this are removed.
confidence_floor = 0.15

[promotion]
# short_term -> working
working_min_triggers = 3
working_min_confidence = 0.6
# working -> long_term
long_term_min_triggers = 8
long_term_min_confidence = 0.8

[aggregation]
# Pairwise similarity that links atoms into one cluster.
similarity_threshold = 0.6
# Minimum atoms for a brand-new principle.
min_cluster_size = 5
# Atoms below this are invisible to aggregation.
min_confidence = 0.6
# Weight of the existing confidence when folding in new evidence.
existing_weight = 0.7
statement_max_chars = 200
# Confidence added when the user confirms a principle.
confirm_boost = 0.2

[injection]
max_items = 10
confidence_threshold = 0.5
profile_max_chars = 2000

[storage]
lock_wait_ms = 2000
lock_stale_secs = 60
"#;

/// What `ensure_initialized` did, for logging and CLI display.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<String>,
    pub existed: Vec<String>,
}

/// Create the store layout under `root`. Safe to call repeatedly.
pub fn ensure_initialized(root: &Path) -> Result<InitReport> {
    let paths = StorePaths::new(root);
    let mut report = InitReport {
        root: root.to_path_buf(),
        created: Vec::new(),
        existed: Vec::new(),
    };

    ensure_dir(root, ".", &mut report)?;
    ensure_dir(&paths.memories_dir(), "memories", &mut report)?;
    ensure_dir(&paths.principles_dir(), "principles", &mut report)?;
    ensure_dir(&paths.evolution_dir(), "evolution", &mut report)?;
    ensure_dir(&paths.evidence_dir(), "evidence", &mut report)?;
    ensure_file(&paths.evolution_log(), "evolution/log.jsonl", &mut report)?;
    ensure_file(&paths.evidence_index(), "evidence/index.jsonl", &mut report)?;

    let config = paths.config_file();
    if config.exists() {
        report.existed.push("config.toml".to_string());
    } else {
        snapshot::write_atomic(&config, DEFAULT_CONFIG_TOML.as_bytes())?;
        report.created.push("config.toml".to_string());
    }

    if !report.created.is_empty() {
        tracing::info!(root = %root.display(), created = ?report.created, "store initialized");
    }
    Ok(report)
}

fn ensure_dir(path: &Path, label: &str, report: &mut InitReport) -> Result<()> {
    if path.is_dir() {
        report.existed.push(label.to_string());
    } else {
        fs::create_dir_all(path)
            .map_err(|err| anyhow::Error::new(err).context(format!("create {}", path.display())))?;
        report.created.push(label.to_string());
    }
    Ok(())
}

fn ensure_file(path: &Path, label: &str, report: &mut InitReport) -> Result<()> {
    if path.exists() {
        report.existed.push(label.to_string());
    } else {
        fs::write(path, b"")
            .map_err(|err| anyhow::Error::new(err).context(format!("create {}", path.display())))?;
        report.created.push(label.to_string());
    }
    Ok(())
}
