//! Shared types, error model, and configuration for civicetl.
//!
//! This crate is the foundation depended on by all other civicetl crates.
//! It provides:
//! - [`CivicError`]: the unified error type
//! - Domain types ([`Term`], [`RawContactRow`], [`RawVoteRow`], [`AgendaItemRecord`])
//! - Configuration ([`AppConfig`], [`HttpConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CouncilConfig, DatabaseConfig, HttpConfig, OpenDataConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{CivicError, Result};
pub use types::{
    AgendaItemRecord, RawContactRow, RawVoteRow, Term, TextOrNumber,
};
