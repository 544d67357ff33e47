//! Pipeline orchestration for civicetl.
//!
//! This crate sequences the open data client, CSV ingestion, record
//! transformation, staging and view derivation into end-to-end runs
//! (e.g., [`pipeline::run_etl`]).

pub mod pipeline;
