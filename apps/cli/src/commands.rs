//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use civicetl_core::pipeline::{
    self, EtlConfig, EtlReport, ProgressReporter, lock_holder, with_run_lock,
};
use civicetl_opendata::{CouncilClient, OpenDataClient};
use civicetl_shared::{AppConfig, init_config, load_config};
use civicetl_storage::{Storage, ViewCount};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// civicetl: civic open data, normalized.
#[derive(Parser)]
#[command(
    name = "civicetl",
    version,
    about = "Load council contacts, voting records and agenda items into a queryable database.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `[database] path` from the config file).
    #[arg(long, global = true, env = "CIVICETL_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline: contacts, votes, agenda items, derived views.
    Run {
        /// First meeting date for agenda items (YYYY-MM-DD).
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last meeting date for agenda items (YYYY-MM-DD).
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// Stage councillor contacts only.
    Contacts,

    /// Stage the latest voting record only.
    Votes,

    /// Stage agenda items for a meeting date range.
    AgendaItems {
        /// First meeting date (YYYY-MM-DD).
        #[arg(long)]
        from: NaiveDate,

        /// Last meeting date (YYYY-MM-DD).
        #[arg(long)]
        to: NaiveDate,
    },

    /// Rebuild the derived views from the staging tables.
    Views,

    /// List the sitting councillors.
    Councillors,

    /// Show a councillor's contact details and vote history.
    Councillor {
        /// Contact slug, e.g. `gord-perks`.
        slug: String,

        /// Maximum number of votes to print.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show the motions recorded for an agenda item.
    Motions {
        /// Agenda item number, e.g. `2023.CC3.1`.
        agenda_item: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "civicetl=info",
        1 => "civicetl=debug",
        _ => "civicetl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Run { from, to } => cmd_run(db, from.zip(to)).await,
        Command::Contacts => cmd_contacts(db).await,
        Command::Votes => cmd_votes(db).await,
        Command::AgendaItems { from, to } => cmd_agenda_items(db, from, to).await,
        Command::Views => cmd_views(db).await,
        Command::Councillors => cmd_councillors(db).await,
        Command::Councillor { slug, limit } => cmd_councillor(db, &slug, limit).await,
        Command::Motions { agenda_item } => cmd_motions(db, &agenda_item).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Database path from the flag, else the config file.
fn db_path(flag: Option<PathBuf>, config: &AppConfig) -> PathBuf {
    flag.unwrap_or_else(|| PathBuf::from(&config.database.path))
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn cmd_run(db: Option<PathBuf>, range: Option<(NaiveDate, NaiveDate)>) -> Result<()> {
    let config = load_config()?;
    let path = db_path(db, &config);
    let storage = Storage::open(&path).await?;

    let mut etl_config = EtlConfig::from_app(&config);
    if let Some((from, to)) = range {
        etl_config = etl_config.with_agenda_range(from, to);
    }

    info!(db = %path.display(), agenda_items = range.is_some(), "starting run");

    let reporter = CliProgress::new();
    let report = match pipeline::run_etl(&etl_config, &storage, &reporter).await {
        Ok(report) => report,
        Err(e) => {
            reporter.fail();
            return Err(e.into());
        }
    };

    print_report(&report, &path);
    Ok(())
}

async fn cmd_contacts(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&db_path(db, &config)).await?;
    let client = OpenDataClient::new(&config.open_data, &config.http)?;

    let reporter = CliProgress::new();
    let staged = with_run_lock(
        &storage,
        &lock_holder("contacts"),
        pipeline::ingest_contacts(&client, &config.open_data.contact_catalog_id, &storage, &reporter),
    )
    .await;
    reporter.finish();

    println!("  Contacts staged: {}", staged?);
    Ok(())
}

async fn cmd_votes(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&db_path(db, &config)).await?;
    let client = OpenDataClient::new(&config.open_data, &config.http)?;

    let reporter = CliProgress::new();
    let staged = with_run_lock(
        &storage,
        &lock_holder("votes"),
        pipeline::ingest_votes(&client, &config.open_data.vote_catalog_id, &storage, &reporter),
    )
    .await;
    reporter.finish();

    println!("  Votes staged: {}", staged?);
    Ok(())
}

async fn cmd_agenda_items(db: Option<PathBuf>, from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from > to {
        return Err(eyre!("--from ({from}) must not be after --to ({to})"));
    }
    let config = load_config()?;
    let storage = Storage::open(&db_path(db, &config)).await?;
    let client = CouncilClient::new(&config.council, &config.http)?;

    let reporter = CliProgress::new();
    let staged = with_run_lock(
        &storage,
        &lock_holder("agenda-items"),
        pipeline::ingest_agenda_items(&client, from, to, &storage, &reporter),
    )
    .await;
    reporter.finish();

    println!("  Agenda items staged: {}", staged?);
    Ok(())
}

async fn cmd_views(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&db_path(db, &config)).await?;

    let reporter = CliProgress::new();
    let counts = with_run_lock(
        &storage,
        &lock_holder("views"),
        pipeline::derive_views(&storage, &reporter),
    )
    .await;
    reporter.finish();

    println!();
    print_view_counts(&counts?);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookup commands
// ---------------------------------------------------------------------------

async fn cmd_councillors(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(db, &config)).await?;

    let councillors = storage.list_councillors().await?;
    if councillors.is_empty() {
        println!("No councillors found. Run `civicetl run` first.");
        return Ok(());
    }

    println!();
    for c in &councillors {
        println!(
            "  {:<4} {:<32} {:<28} {}",
            c.ward_id.as_deref().unwrap_or("-"),
            c.ward_name.as_deref().unwrap_or("-"),
            c.contact_name,
            c.contact_slug,
        );
    }
    println!();
    println!("  {} councillors, term {}", councillors.len(), councillors[0].term);
    println!();
    Ok(())
}

async fn cmd_councillor(db: Option<PathBuf>, slug: &str, limit: usize) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(db, &config)).await?;

    let profile = storage
        .get_contact(slug)
        .await?
        .ok_or_else(|| eyre!("no contact with slug '{slug}'"))?;

    println!();
    println!("  {}", profile.contact_name);
    println!("  Email: {}", profile.email.as_deref().unwrap_or("-"));
    println!("  Phone: {}", profile.phone.as_deref().unwrap_or("-"));
    if let Some(photo) = &profile.photo_url {
        println!("  Photo: {photo}");
    }

    let votes = storage.votes_for_contact(slug).await?;
    println!();
    println!("  Votes ({} recorded, newest first):", votes.len());
    for vote in votes.iter().take(limit) {
        println!(
            "  {:<20} {:<14} {:<4} {:<10} {}",
            vote.date_time,
            vote.agenda_item_number,
            vote.value,
            vote.result_kind,
            vote.agenda_item_title.as_deref().unwrap_or(&vote.motion_type),
        );
    }
    println!();
    Ok(())
}

async fn cmd_motions(db: Option<PathBuf>, agenda_item: &str) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(db, &config)).await?;

    let motions = storage.list_motions(agenda_item).await?;
    if motions.is_empty() {
        println!("No consistent motions recorded for {agenda_item}.");
        return Ok(());
    }

    println!();
    for m in &motions {
        let tally = match (m.yes_votes, m.no_votes) {
            (Some(yes), Some(no)) => format!("{yes}-{no}"),
            _ => "-".to_string(),
        };
        println!(
            "  {:<20} {:<22} {:<10} {:<7} {}",
            m.date_time, m.motion_type, m.result_kind, tally, m.vote_description,
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &EtlReport, path: &std::path::Path) {
    println!();
    println!("  ETL run complete!");
    println!("  Run:          {}", report.run_id);
    println!("  Database:     {}", path.display());
    println!("  Contacts:     {}", report.contacts);
    println!("  Votes:        {}", report.votes);
    if let Some(items) = report.agenda_items {
        println!("  Agenda items: {items}");
    }
    println!("  Time:         {:.1}s", report.elapsed.as_secs_f64());
    println!();
    print_view_counts(&report.views);
    println!();
}

fn print_view_counts(counts: &[ViewCount]) {
    for count in counts {
        println!("  {:<20} {:>8}", count.view, count.rows);
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn fail(&self) {
        self.spinner.abandon_with_message("run failed");
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn staged(&self, table: &str, rows: u64) {
        self.spinner.println(format!("  staged {rows} rows into {table}"));
    }

    fn done(&self, _report: &EtlReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
