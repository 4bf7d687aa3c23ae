// src/storage/mod.rs
//! On-disk layout and low-level file plumbing.
//!
//! Everything lives under one root directory:
//!
//! ```text
//! <root>/
//!   config.toml
//!   writer.lock              (present only while a writer holds it)
//!   memories/<tier>.json.gz  (one snapshot per tier)
//!   principles/core.json.gz
//!   evolution/log.jsonl      (append-only)
//!   evidence/index.jsonl     (append-only)
//! ```
//!
//! The root comes from an explicit argument, the `PERSONA_ROOT` environment
//! variable, or `.persona` in the working directory, in that order.

pub mod lock; // single-writer exclusive lockfile
pub mod snapshot; // gzip JSON snapshots + JSONL appenders

use std::path::{Path, PathBuf};

use crate::models::MemoryTier;

pub const ROOT_ENV: &str = "PERSONA_ROOT";
pub const DEFAULT_ROOT: &str = ".persona";
pub const LOCK_FILE: &str = "writer.lock";

/// Resolve the engine root for callers that did not pass one explicitly.
pub fn engine_root() -> PathBuf {
    match std::env::var(ROOT_ENV) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
        _ => PathBuf::from(DEFAULT_ROOT),
    }
}

/// All paths the engine touches, derived from a single root.
///
/// Snapshot paths are the logical `.json` names; [`snapshot`] adds the `.gz`
/// suffix when reading and writing the compressed form.
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memories_dir(&self) -> PathBuf {
        self.root.join("memories")
    }

    pub fn principles_dir(&self) -> PathBuf {
        self.root.join("principles")
    }

    pub fn evolution_dir(&self) -> PathBuf {
        self.root.join("evolution")
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.root.join("evidence")
    }

    pub fn tier_snapshot(&self, tier: MemoryTier) -> PathBuf {
        self.memories_dir().join(format!("{}.json", tier.as_str()))
    }

    pub fn principles_snapshot(&self) -> PathBuf {
        self.principles_dir().join("core.json")
    }

    pub fn evolution_log(&self) -> PathBuf {
        self.evolution_dir().join("log.jsonl")
    }

    pub fn evidence_index(&self) -> PathBuf {
        self.evidence_dir().join("index.jsonl")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(crate::config::CONFIG_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}
