// src/services/mod.rs
pub mod aggregator; // principle formation and update
pub mod decay; // confidence decay, promotion gates, removal projection
pub mod evidence; // append-only evidence index
pub mod evolution; // append-only evolution log
pub mod injection; // read-only context selection and profile rendering
pub mod principles; // principle snapshot and lifecycle
pub mod similarity; // type-gated token-set Jaccard
pub mod store; // tiered atom store and maintenance

pub use aggregator::{
    AggregationReport, Aggregator, ExtractiveSynthesizer, StatementSynthesizer,
};
pub use evidence::{EvidenceDraft, EvidenceIndex};
pub use evolution::EvolutionLog;
pub use injection::InjectionItem;
pub use principles::{PrincipleFilter, PrincipleStore};
pub use store::{InsertOutcome, MaintenanceReport, MemoryStore};
