// src/config.rs
//! Engine configuration loaded from `<root>/config.toml`.
//!
//! Every threshold the engine consults lives here so tests and embedders can
//! tune behavior without recompiling. Missing file or missing keys fall back
//! to the defaults below; a present-but-malformed file is an error.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::models::MemoryTier;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub injection: InjectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            memory: MemoryConfig::default(),
            decay: DecayConfig::default(),
            promotion: PromotionConfig::default(),
            aggregation: AggregationConfig::default(),
            injection: InjectionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_system_name")]
    pub name: String,
    #[serde(default = "default_system_version")]
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: default_system_name(),
            version: default_system_version(),
        }
    }
}

/// Intake and dedup knobs for memory atoms.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Atom content is truncated to this many characters at intake.
    #[serde(default = "default_content_max_chars")]
    pub content_max_chars: usize,
    /// Evidence quotes are truncated to this many characters.
    #[serde(default = "default_quote_max_chars")]
    pub quote_max_chars: usize,
    /// Confidence assigned when a draft carries none (or a non-finite value).
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    /// Similarity at or above this merges an incoming draft into an existing atom.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    /// Confidence boost applied on each merge, capped at 1.0.
    #[serde(default = "default_reinforce_boost")]
    pub reinforce_boost: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            content_max_chars: default_content_max_chars(),
            quote_max_chars: default_quote_max_chars(),
            default_confidence: default_confidence(),
            dedup_threshold: default_dedup_threshold(),
            reinforce_boost: default_reinforce_boost(),
        }
    }
}

/// Exponential half-life decay, one half-life per tier, plus the removal floor.
#[derive(Debug, Clone, Deserialize)]
pub struct DecayConfig {
    #[serde(default = "default_short_term_half_life")]
    pub short_term_half_life_days: f64,
    #[serde(default = "default_working_half_life")]
    pub working_half_life_days: f64,
    #[serde(default = "default_long_term_half_life")]
    pub long_term_half_life_days: f64,
    /// Atoms whose decayed confidence falls strictly below this are removed.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

impl DecayConfig {
    pub fn half_life_days(&self, tier: MemoryTier) -> f64 {
        match tier {
            MemoryTier::ShortTerm => self.short_term_half_life_days,
            MemoryTier::Working => self.working_half_life_days,
            MemoryTier::LongTerm => self.long_term_half_life_days,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            short_term_half_life_days: default_short_term_half_life(),
            working_half_life_days: default_working_half_life(),
            long_term_half_life_days: default_long_term_half_life(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

/// Thresholds an atom must meet (post-decay) to move up a tier.
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionConfig {
    #[serde(default = "default_working_min_triggers")]
    pub working_min_triggers: u32,
    #[serde(default = "default_working_min_confidence")]
    pub working_min_confidence: f64,
    #[serde(default = "default_long_term_min_triggers")]
    pub long_term_min_triggers: u32,
    #[serde(default = "default_long_term_min_confidence")]
    pub long_term_min_confidence: f64,
}

impl PromotionConfig {
    /// Trigger and confidence gates for leaving `from` toward the next tier up.
    /// `None` when `from` is already the top tier.
    pub fn gate(&self, from: MemoryTier) -> Option<(u32, f64)> {
        match from {
            MemoryTier::ShortTerm => {
                Some((self.working_min_triggers, self.working_min_confidence))
            }
            MemoryTier::Working => {
                Some((self.long_term_min_triggers, self.long_term_min_confidence))
            }
            MemoryTier::LongTerm => None,
        }
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            working_min_triggers: default_working_min_triggers(),
            working_min_confidence: default_working_min_confidence(),
            long_term_min_triggers: default_long_term_min_triggers(),
            long_term_min_confidence: default_long_term_min_confidence(),
        }
    }
}

/// Principle formation and update thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Pairwise similarity at or above this links two atoms into one cluster.
    #[serde(default = "default_cluster_similarity")]
    pub similarity_threshold: f64,
    /// A brand-new principle needs at least this many clustered atoms.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Atoms below this confidence are ignored by aggregation; cluster mean
    /// must also reach it before a principle forms.
    #[serde(default = "default_aggregation_min_confidence")]
    pub min_confidence: f64,
    /// Weight of the existing confidence when an update blends in new evidence.
    #[serde(default = "default_existing_weight")]
    pub existing_weight: f64,
    /// Principle statements are truncated to this many characters.
    #[serde(default = "default_statement_max_chars")]
    pub statement_max_chars: usize,
    /// Boost applied when the user confirms a principle, capped at 1.0.
    #[serde(default = "default_confirm_boost")]
    pub confirm_boost: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_cluster_similarity(),
            min_cluster_size: default_min_cluster_size(),
            min_confidence: default_aggregation_min_confidence(),
            existing_weight: default_existing_weight(),
            statement_max_chars: default_statement_max_chars(),
            confirm_boost: default_confirm_boost(),
        }
    }
}

/// Defaults for context injection selection and rendering.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectionConfig {
    #[serde(default = "default_injection_max_items")]
    pub max_items: usize,
    #[serde(default = "default_injection_confidence")]
    pub confidence_threshold: f64,
    /// Character budget for the rendered profile block.
    #[serde(default = "default_profile_max_chars")]
    pub profile_max_chars: usize,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            max_items: default_injection_max_items(),
            confidence_threshold: default_injection_confidence(),
            profile_max_chars: default_profile_max_chars(),
        }
    }
}

/// Writer-lock tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// How long an acquire waits for a contended lock before failing.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// A lockfile older than this is treated as abandoned and taken over.
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: default_lock_wait_ms(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

impl EngineConfig {
    /// Load `<root>/config.toml`; absent file means defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: EngineConfig = toml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(cfg)
    }
}

fn default_system_name() -> String {
    "persona-core".to_string()
}
fn default_system_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_content_max_chars() -> usize {
    100
}
fn default_quote_max_chars() -> usize {
    1000
}
fn default_confidence() -> f64 {
    0.5
}
fn default_dedup_threshold() -> f64 {
    0.85
}
fn default_reinforce_boost() -> f64 {
    0.05
}
fn default_short_term_half_life() -> f64 {
    7.0
}
fn default_working_half_life() -> f64 {
    30.0
}
fn default_long_term_half_life() -> f64 {
    120.0
}
fn default_confidence_floor() -> f64 {
    0.15
}
fn default_working_min_triggers() -> u32 {
    3
}
fn default_working_min_confidence() -> f64 {
    0.6
}
fn default_long_term_min_triggers() -> u32 {
    8
}
fn default_long_term_min_confidence() -> f64 {
    0.8
}
fn default_cluster_similarity() -> f64 {
    0.6
}
fn default_min_cluster_size() -> usize {
    5
}
fn default_aggregation_min_confidence() -> f64 {
    0.6
}
fn default_existing_weight() -> f64 {
    0.7
}
fn default_statement_max_chars() -> usize {
    200
}
fn default_confirm_boost() -> f64 {
    0.2
}
fn default_injection_max_items() -> usize {
    10
}
fn default_injection_confidence() -> f64 {
    0.5
}
fn default_profile_max_chars() -> usize {
    2000
}
fn default_lock_wait_ms() -> u64 {
    2000
}
fn default_lock_stale_secs() -> u64 {
    60
}
