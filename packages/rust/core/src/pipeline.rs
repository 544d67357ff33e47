//! End-to-end ETL: catalog → CSV → canonical rows → staging → derived views.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, instrument, warn};

use civicetl_opendata::{ByteStream, CouncilClient, OpenDataClient, ResourceDescriptor};
use civicetl_shared::{
    AppConfig, CivicError, CouncilConfig, HttpConfig, OpenDataConfig, RawContactRow, RawVoteRow,
    Result, Term,
};
use civicetl_storage::{RunStatus, Storage, ViewCount};
use civicetl_tabular::{TabularRow, make_parser};
use civicetl_transform::{CONTACT_COLUMNS, VOTE_COLUMNS, contact_row, extract_term, vote_row};

/// Configuration for an ETL run.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub open_data: OpenDataConfig,
    pub council: CouncilConfig,
    pub http: HttpConfig,
    /// Meeting date range for agenda items. Agenda items are skipped when unset.
    pub agenda_range: Option<(NaiveDate, NaiveDate)>,
}

impl EtlConfig {
    /// Build from the loaded application config.
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            open_data: config.open_data.clone(),
            council: config.council.clone(),
            http: config.http.clone(),
            agenda_range: None,
        }
    }

    /// Set the agenda-item meeting range.
    pub fn with_agenda_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.agenda_range = Some((from, to));
        self
    }
}

/// Result of a full ETL run.
#[derive(Debug, Serialize)]
pub struct EtlReport {
    /// Ledger id of the run.
    pub run_id: String,
    /// Rows staged into `RawContacts`.
    pub contacts: u64,
    /// Rows staged into `RawVotes`.
    pub votes: u64,
    /// Rows staged into `RawAgendaItems`, if agenda items were requested.
    pub agenda_items: Option<u64>,
    /// Row counts of every derived view after the rebuild.
    #[serde(skip)]
    pub views: Vec<ViewCount>,
    /// Total elapsed time.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after a staging table has been replaced.
    fn staged(&self, table: &str, rows: u64);
    /// Called when a full run completes.
    fn done(&self, report: &EtlReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn staged(&self, _table: &str, _rows: u64) {}
    fn done(&self, _report: &EtlReport) {}
}

/// Identifier written into the run lock for this process.
pub fn lock_holder(label: &str) -> String {
    format!("{label}@pid{}", std::process::id())
}

/// Run `work` while holding the run lock, releasing it whatever the outcome.
///
/// A failure of `work` takes precedence over a failure to release.
pub async fn with_run_lock<T, F>(storage: &Storage, holder: &str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    storage.acquire_run_lock(holder).await?;
    let outcome = work.await;
    let released = storage.release_run_lock(holder).await;

    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "failed to release run lock after failed run");
            Err(e)
        }
    }
}

/// Run the full pipeline under the run lock and record it in the run ledger.
///
/// 1. Contacts: every full CSV resource of the contact catalog
/// 2. Votes: the newest-term CSV resource of the voting catalog
/// 3. Agenda items, when a meeting range is configured
/// 4. Derived views
#[instrument(skip_all)]
pub async fn run_etl(
    config: &EtlConfig,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<EtlReport> {
    let start = Instant::now();
    let holder = lock_holder("run");

    with_run_lock(storage, &holder, async {
        let run_id = storage.begin_run().await?;
        info!(%run_id, "starting ETL run");

        let outcome = run_stages(config, storage, progress, &run_id, start).await;

        let finished = match &outcome {
            Ok(report) => {
                let stats = serde_json::to_string(report).map_err(|e| {
                    CivicError::Storage(format!("failed to encode run stats: {e}"))
                })?;
                storage
                    .finish_run(&run_id, RunStatus::Succeeded, Some(&stats), None)
                    .await
            }
            Err(e) => {
                storage
                    .finish_run(&run_id, RunStatus::Failed, None, Some(&e.to_string()))
                    .await
            }
        };

        match (outcome, finished) {
            (Ok(report), Ok(())) => {
                progress.done(&report);
                info!(
                    run_id = %report.run_id,
                    contacts = report.contacts,
                    votes = report.votes,
                    elapsed_ms = report.elapsed.as_millis(),
                    "ETL run complete"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), finished) => {
                if let Err(ledger_err) = finished {
                    warn!(error = %ledger_err, "failed to record failed run");
                }
                Err(e)
            }
        }
    })
    .await
}

async fn run_stages(
    config: &EtlConfig,
    storage: &Storage,
    progress: &dyn ProgressReporter,
    run_id: &str,
    start: Instant,
) -> Result<EtlReport> {
    let open_data = OpenDataClient::new(&config.open_data, &config.http)?;

    let contacts = ingest_contacts(
        &open_data,
        &config.open_data.contact_catalog_id,
        storage,
        progress,
    )
    .await?;
    let votes = ingest_votes(&open_data, &config.open_data.vote_catalog_id, storage, progress).await?;

    let agenda_items = match config.agenda_range {
        Some((from, to)) => {
            let council = CouncilClient::new(&config.council, &config.http)?;
            Some(ingest_agenda_items(&council, from, to, storage, progress).await?)
        }
        None => None,
    };

    let views = derive_views(storage, progress).await?;

    Ok(EtlReport {
        run_id: run_id.to_string(),
        contacts,
        votes,
        agenda_items,
        views,
        elapsed: start.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Stage every contact CSV of `catalog_id` into `RawContacts`.
#[instrument(skip(client, storage, progress))]
pub async fn ingest_contacts(
    client: &OpenDataClient,
    catalog_id: &str,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    progress.phase("Fetching contacts");
    let resources = full_csv_resources(client, catalog_id).await?;

    let mut rows: Vec<RawContactRow> = Vec::new();
    for resource in &resources {
        let term = extract_term(&resource.name)?;
        let body = client.stream_dataset(&resource.url).await?;

        let parsed =
            parse_dataset(body, CONTACT_COLUMNS, move |row| contact_row(&row, &term)).await?;
        debug!(resource = %resource.name, rows = parsed.len(), "contacts parsed");
        rows.extend(parsed);
    }

    progress.phase("Staging contacts");
    let staged = storage.load_contacts(&rows).await?;
    progress.staged("RawContacts", staged);
    Ok(staged)
}

/// Stage the newest-term vote CSV of `catalog_id` into `RawVotes`.
#[instrument(skip(client, storage, progress))]
pub async fn ingest_votes(
    client: &OpenDataClient,
    catalog_id: &str,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    progress.phase("Fetching votes");
    let resources = full_csv_resources(client, catalog_id).await?;
    let (term, resource) = newest_term_resource(&resources)?;
    info!(resource = %resource.name, %term, "selected vote resource");

    let body = client.stream_dataset(&resource.url).await?;
    let rows: Vec<RawVoteRow> =
        parse_dataset(body, VOTE_COLUMNS, move |row| vote_row(&row, &term).map(Some)).await?;

    progress.phase("Staging votes");
    let staged = storage.load_votes(&rows).await?;
    progress.staged("RawVotes", staged);
    Ok(staged)
}

/// Stage agenda items with meetings between `from` and `to` into `RawAgendaItems`.
#[instrument(skip(client, storage, progress))]
pub async fn ingest_agenda_items(
    client: &CouncilClient,
    from: NaiveDate,
    to: NaiveDate,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    progress.phase("Fetching agenda items");
    let items = client.fetch_agenda_items(from, to).await?;

    progress.phase("Staging agenda items");
    let staged = storage.load_agenda_items(&items).await?;
    progress.staged("RawAgendaItems", staged);
    Ok(staged)
}

/// Rebuild the derived views and return their row counts.
pub async fn derive_views(
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<Vec<ViewCount>> {
    progress.phase("Deriving views");
    storage.derive_views().await?;
    storage.view_counts().await
}

/// Parse a dataset as it downloads, mapping each row in source order.
///
/// The CSV reader is synchronous, so it runs on a blocking thread fed from the
/// byte stream. `map` returning `None` drops the row.
async fn parse_dataset<T, F>(
    body: ByteStream,
    columns: &'static [&'static str],
    mut map: F,
) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: FnMut(TabularRow) -> Result<Option<T>> + Send + 'static,
{
    let reader = SyncIoBridge::new(StreamReader::new(body.map_err(std::io::Error::other)));

    tokio::task::spawn_blocking(move || -> Result<Vec<T>> {
        let mut out = Vec::new();
        for row in make_parser(columns).parse(reader)? {
            if let Some(value) = map(row?)? {
                out.push(value);
            }
        }
        Ok(out)
    })
    .await
    .map_err(|e| CivicError::parse(format!("CSV parse task failed: {e}")))?
}

async fn full_csv_resources(
    client: &OpenDataClient,
    catalog_id: &str,
) -> Result<Vec<ResourceDescriptor>> {
    let resources: Vec<_> = client
        .describe_dataset(catalog_id)
        .await?
        .into_iter()
        .filter(ResourceDescriptor::is_full_csv)
        .collect();
    if resources.is_empty() {
        return Err(CivicError::SourceUnavailable(format!(
            "catalog {catalog_id} lists no full CSV resources"
        )));
    }
    Ok(resources)
}

/// Pick the resource whose name carries the greatest term.
fn newest_term_resource(resources: &[ResourceDescriptor]) -> Result<(Term, &ResourceDescriptor)> {
    let mut newest: Option<(Term, &ResourceDescriptor)> = None;
    for resource in resources {
        let term = extract_term(&resource.name)?;
        if newest.as_ref().is_none_or(|(best, _)| term > *best) {
            newest = Some((term, resource));
        }
    }
    newest.ok_or_else(|| CivicError::SourceUnavailable("no vote resources to choose from".into()))
}
