//! Embedded libSQL storage for the civic ETL.
//!
//! The [`Storage`] struct wraps one libSQL connection and owns:
//! - staging tables (`RawContacts`, `RawVotes`, `RawAgendaItems`), replaced
//!   wholesale by each load
//! - derived views (`Contacts`, `Councillors`, `Wards`, `Committees`,
//!   `AgendaItems`, `ProblemAgendaItems`, `Motions`, `Votes`), rebuilt from
//!   staging by [`Storage::derive_views`]
//! - the `etl_runs` ledger and the `etl_lock` advisory run lock
//!
//! **Access rules:**
//! - ETL runs: read-write (sole writer, guarded by the run lock) via [`Storage::open`]
//! - Lookups: read-only via [`Storage::open_readonly`]

mod migrations;
mod queries;
mod staging;
mod views;

use std::path::Path;

use chrono::Utc;
use civicetl_shared::{CivicError, Result};
use libsql::{Connection, Database, params};
use tracing::{debug, info};
use uuid::Uuid;

pub use queries::{ContactProfile, ContactVote, CouncillorSummary, MotionSummary, ViewCount};
pub use staging::StagingTable;
pub use views::derived_view_names;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Final state recorded for a run in `etl_runs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CivicError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        storage.ensure_staging_tables().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CivicError::Storage(format!(
                "database {} does not exist; run `civicetl run` first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CivicError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CivicError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Execute a statement that must touch exactly one row.
    async fn execute_single(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<()> {
        let affected = self
            .conn
            .execute(sql, params)
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;
        if affected != 1 {
            return Err(CivicError::RowCountMismatch {
                expected: 1,
                actual: affected,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run ledger
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run ID.
    pub async fn begin_run(&self) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.execute_single(
            "INSERT INTO etl_runs (id, started_at, status) VALUES (?1, ?2, ?3)",
            params![id.as_str(), now.as_str(), RunStatus::Running.as_str()],
        )
        .await?;
        debug!(run_id = %id, "run started");
        Ok(id)
    }

    /// Close an open run with its final status, stats and error text.
    ///
    /// Fails with [`CivicError::RowCountMismatch`] if the run does not exist
    /// or was already finished.
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        stats_json: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.execute_single(
            "UPDATE etl_runs SET finished_at = ?1, status = ?2, stats_json = ?3, error = ?4
             WHERE id = ?5 AND finished_at IS NULL",
            params![now.as_str(), status.as_str(), stats_json, error, run_id],
        )
        .await?;
        debug!(run_id, status = status.as_str(), "run finished");
        Ok(())
    }

    /// Status of a run, or `None` if no such run exists.
    pub async fn run_status(&self, run_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT status FROM etl_runs WHERE id = ?1", params![run_id])
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| CivicError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(CivicError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Run lock
    // -----------------------------------------------------------------------

    /// Take the single-writer run lock for `holder`.
    ///
    /// Fails with [`CivicError::RunInProgress`] naming the current holder if
    /// the lock is already taken.
    pub async fn acquire_run_lock(&self, holder: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO etl_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
                params![holder, now.as_str()],
            )
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        if inserted == 0 {
            let current = self.lock_holder().await?.unwrap_or_default();
            return Err(CivicError::RunInProgress { holder: current });
        }
        debug!(holder, "run lock acquired");
        Ok(())
    }

    /// Release the run lock held by `holder`.
    pub async fn release_run_lock(&self, holder: &str) -> Result<()> {
        self.check_writable()?;
        self.execute_single(
            "DELETE FROM etl_lock WHERE id = 1 AND holder = ?1",
            params![holder],
        )
        .await?;
        debug!(holder, "run lock released");
        Ok(())
    }

    /// Current holder of the run lock, if any.
    pub async fn lock_holder(&self) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT holder FROM etl_lock WHERE id = 1", params![])
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| CivicError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(CivicError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("civicetl_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("civicetl_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn run_ledger_lifecycle() {
        let storage = test_storage().await;

        let run_id = storage.begin_run().await.expect("begin run");
        assert!(!run_id.is_empty());
        assert_eq!(
            storage.run_status(&run_id).await.unwrap().as_deref(),
            Some("running")
        );

        storage
            .finish_run(&run_id, RunStatus::Succeeded, Some(r#"{"votes": 10}"#), None)
            .await
            .expect("finish run");
        assert_eq!(
            storage.run_status(&run_id).await.unwrap().as_deref(),
            Some("succeeded")
        );
    }

    #[tokio::test]
    async fn finishing_twice_is_row_count_mismatch() {
        let storage = test_storage().await;
        let run_id = storage.begin_run().await.unwrap();
        storage
            .finish_run(&run_id, RunStatus::Failed, None, Some("boom"))
            .await
            .unwrap();

        let err = storage
            .finish_run(&run_id, RunStatus::Succeeded, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CivicError::RowCountMismatch {
                expected: 1,
                actual: 0
            }
        ));
    }

    #[tokio::test]
    async fn run_lock_is_exclusive() {
        let storage = test_storage().await;

        storage.acquire_run_lock("run-a").await.expect("first acquire");
        let err = storage.acquire_run_lock("run-b").await.unwrap_err();
        match err {
            CivicError::RunInProgress { holder } => assert_eq!(holder, "run-a"),
            other => panic!("expected RunInProgress, got {other:?}"),
        }

        // Only the holder can release
        assert!(storage.release_run_lock("run-b").await.is_err());
        storage.release_run_lock("run-a").await.expect("release");
        assert_eq!(storage.lock_holder().await.unwrap(), None);

        storage.acquire_run_lock("run-b").await.expect("re-acquire");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("civicetl_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.begin_run().await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.begin_run().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("civicetl_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
