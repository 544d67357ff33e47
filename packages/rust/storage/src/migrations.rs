//! SQL migration definitions for the civicetl database.
//!
//! Migrations cover the bookkeeping tables only. Staging tables and derived
//! views are dropped and rebuilt by every run, so they live in
//! [`crate::staging`] and [`crate::views`] instead.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: etl_runs ledger, etl_lock",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per ETL run
CREATE TABLE IF NOT EXISTS etl_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    status      TEXT NOT NULL,
    stats_json  TEXT,
    error       TEXT
);

CREATE INDEX IF NOT EXISTS idx_etl_runs_started ON etl_runs(started_at);

-- Advisory run lock: at most one row, id 1
CREATE TABLE IF NOT EXISTS etl_lock (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    holder      TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
