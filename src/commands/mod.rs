// src/commands/mod.rs
pub mod api; // Commands facade
pub mod init; // idempotent store layout

pub use api::{Commands, IntakeReport, StoreStats};
pub use init::{ensure_initialized, InitReport, DEFAULT_CONFIG_TOML};
