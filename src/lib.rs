// src/lib.rs
//! persona-core: a tiered personal memory and principle engine.
//!
//! The engine stores small, typed observations about one user ("memory
//! atoms") in three retention tiers, decays their confidence over time,
//! reinforces them on re-observation, and aggregates confident clusters
//! into durable principles. Every structural change lands in an append-only
//! evolution log, and every atom can be traced back to the conversation
//! excerpt that produced it through the evidence index.
//!
//! [`Commands`] is the embedding surface:
//!
//! ```no_run
//! use persona_core::{AtomDraft, Commands};
//!
//! # fn main() -> persona_core::Result<()> {
//! let engine = Commands::open(".persona")?;
//! let report = engine.ingest(
//!     &[AtomDraft::new("preference", "prefers dark mode").with_confidence(0.7)],
//!     chrono::Utc::now(),
//! )?;
//! println!("stored {} atom(s)", report.inserted.len());
//! let profile = engine.injection_profile(10, 0.5)?;
//! # let _ = profile;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use commands::{ensure_initialized, Commands, InitReport, IntakeReport, StoreStats};
pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use models::{
    AtomDraft, EventKind, Evidence, EvolutionEvent, MemoryAtom, MemoryTier, MemoryType, Principle,
    PrincipleDimension,
};
pub use services::aggregator::{AggregationReport, ExtractiveSynthesizer, StatementSynthesizer};
pub use services::injection::InjectionItem;
pub use services::principles::PrincipleFilter;
pub use services::store::{InsertOutcome, MaintenanceReport};
