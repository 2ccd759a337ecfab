use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use visit_ledger::{
    classify, commit_visits, confirm_clear, format_date, load_batch, open_store, recent_payments,
    request_clear, subject_summary, write_history, write_report, ClearToken, Config, LedgerStats,
    LedgerStore, PaySelection, StoreError,
};

#[derive(Parser)]
#[command(name = "visit-ledger", version)]
#[command(about = "Reconcile uploaded visits against the ledger of paid visits")]
struct Cli {
    /// Config file (default: visit-ledger.toml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs)]
struct SelectionArgs {
    /// Also pay visits already paid under a different date
    #[arg(long)]
    include_same_visit: bool,

    /// Also pay visits sharing a date with a differently named paid visit
    #[arg(long)]
    include_suspicious: bool,
}

impl From<&SelectionArgs> for PaySelection {
    fn from(args: &SelectionArgs) -> Self {
        PaySelection {
            include_same_visit_type: args.include_same_visit,
            include_suspicious: args.include_suspicious,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an upload against the ledger without paying anything
    Classify {
        /// CSV upload: subject_id, visit_name, visit_date
        file: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Write one CSV per category into this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Classify an upload and mark the payable visits as paid
    Commit {
        /// CSV upload: subject_id, visit_name, visit_date
        file: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Payment date to record (default: today)
        #[arg(long)]
        payment_date: Option<NaiveDate>,
    },
    /// Show ledger statistics and the most recent payments
    History {
        /// Number of recent payments to list
        #[arg(long, default_value_t = 5)]
        recent: usize,

        /// Export the whole ledger to this CSV file
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Erase the ledger (run once for a token, again with --confirm <token>)
    Clear {
        #[arg(long)]
        confirm: Option<ClearToken>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    let store = open_store(&config.storage).context("Failed to open ledger store")?;

    match cli.command {
        Commands::Classify {
            file,
            selection,
            report_dir,
        } => run_classify(store.as_ref(), &file, (&selection).into(), report_dir.as_deref()),
        Commands::Commit {
            file,
            selection,
            payment_date,
        } => run_commit(
            store.as_ref(),
            &file,
            (&selection).into(),
            payment_date.unwrap_or_else(|| Local::now().date_naive()),
        ),
        Commands::History { recent, export } => run_history(store.as_ref(), recent, export.as_deref()),
        Commands::Clear { confirm } => run_clear(store.as_ref(), confirm),
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_classify(
    store: &dyn LedgerStore,
    file: &Path,
    selection: PaySelection,
    report_dir: Option<&Path>,
) -> Result<()> {
    let batch = load_batch(file).with_context(|| format!("Rejected upload {}", file.display()))?;
    let snapshot = store
        .load_all()
        .context("Cannot classify: ledger could not be loaded")?;

    println!("📂 Loaded {} visits from {}", batch.len(), file.display());
    println!("📊 Ledger holds {} paid visits\n", snapshot.len());

    let classification = classify(&batch, &snapshot.entries);

    println!("🆕 New: {}", classification.new.len());
    for visit in &classification.new {
        println!("   {} | {} | {}", visit.subject_id, visit.visit_name, format_date(visit.visit_date));
    }

    println!("🚫 Exact duplicates (never paid again): {}", classification.exact_duplicate.len());
    for row in &classification.exact_duplicate {
        println!(
            "   {} | {} | {}, paid {}",
            row.visit.subject_id,
            row.visit.visit_name,
            format_date(row.visit.visit_date),
            format_date(row.previous_payment_date)
        );
    }

    println!(
        "🔄 Same visit, different date: {}",
        classification.same_visit_different_date.len()
    );
    for row in &classification.same_visit_different_date {
        println!(
            "   {} | {} | {}, previously {} (paid {})",
            row.visit.subject_id,
            row.visit.visit_name,
            format_date(row.visit.visit_date),
            row.previous_visit_date.map(format_date).unwrap_or_default(),
            format_date(row.previous_payment_date)
        );
    }

    println!("🚨 Suspicious, same date: {}", classification.suspicious_same_date.len());
    for row in &classification.suspicious_same_date {
        println!(
            "   {} | {} | {}, already paid {} that day (paid {})",
            row.visit.subject_id,
            row.visit.visit_name,
            format_date(row.visit.visit_date),
            row.previous_visit_name.as_deref().unwrap_or_default(),
            format_date(row.previous_payment_date)
        );
    }

    let to_pay = classification.visits_to_pay(&selection);
    println!("\n✅ {} visits payable with current selection", to_pay.len());
    for count in subject_summary(&to_pay) {
        println!("   {}: {}", count.subject_id, count.visit_count);
    }

    if let Some(dir) = report_dir {
        let written = write_report(dir, &classification, &selection)
            .with_context(|| format!("Failed to write report to {}", dir.display()))?;
        println!("\n📥 Report: {} files in {}", written.len(), dir.display());
    }

    Ok(())
}

fn run_commit(
    store: &dyn LedgerStore,
    file: &Path,
    selection: PaySelection,
    payment_date: NaiveDate,
) -> Result<()> {
    let batch = load_batch(file).with_context(|| format!("Rejected upload {}", file.display()))?;

    // An unreachable ledger must never look like an empty one here
    let snapshot = store
        .load_all()
        .context("Cannot commit: ledger could not be loaded")?;

    let classification = classify(&batch, &snapshot.entries);
    println!("📊 {}", classification.summary());

    for held in classification.held_back(&selection) {
        println!(
            "⏸️  Held for review ({}): {} | {} | {}",
            held.category.label(),
            held.visit.subject_id,
            held.visit.visit_name,
            format_date(held.visit.visit_date)
        );
    }

    let to_pay = classification.visits_to_pay(&selection);
    let count = to_pay.len();

    commit_visits(store, &snapshot.version, to_pay, payment_date).map_err(|err| {
        write_failure(
            err,
            "Ledger changed while classifying; nothing was paid, rerun the commit",
            "Ledger was not updated",
        )
    })?;

    println!("✅ {} visits marked as paid on {}", count, format_date(payment_date));
    Ok(())
}

fn run_history(store: &dyn LedgerStore, recent: usize, export: Option<&Path>) -> Result<()> {
    let snapshot = store.load_all().context("Failed to load ledger")?;

    if snapshot.is_empty() {
        println!("📭 Ledger is empty");
        return Ok(());
    }

    let stats = LedgerStats::from_entries(&snapshot.entries);
    println!("📊 Paid visits: {}", stats.total_paid);
    println!("👤 Unique subjects: {}", stats.unique_subjects);
    println!("🏥 Unique visit types: {}", stats.unique_visit_names);

    println!("\n🕒 Recent payments:");
    for entry in recent_payments(&snapshot.entries, recent) {
        println!(
            "   {} | {} | {} | {}",
            format_date(entry.payment_date),
            entry.subject_id,
            entry.visit_name,
            format_date(entry.visit_date)
        );
    }

    if let Some(path) = export {
        write_history(path, &snapshot.entries)
            .with_context(|| format!("Failed to export history to {}", path.display()))?;
        println!("\n📥 Exported {} entries to {}", snapshot.len(), path.display());
    }

    Ok(())
}

fn run_clear(store: &dyn LedgerStore, confirm: Option<ClearToken>) -> Result<()> {
    match confirm {
        None => {
            let token = request_clear(store).context("Failed to load ledger")?;
            println!(
                "⚠️  This will erase {} paid visits from {}",
                token.entry_count(),
                store.describe()
            );
            println!("   To proceed run: visit-ledger clear --confirm {}", token);
        }
        Some(token) => {
            confirm_clear(store, &token).map_err(|err| {
                write_failure(
                    err,
                    "Ledger not cleared: it changed since the token was issued",
                    "Ledger not cleared",
                )
            })?;
            println!("🗑️  Ledger cleared ({} entries erased)", token.entry_count());
        }
    }

    Ok(())
}

/// Wrap a failed conditional write, naming the conflict only when there was one.
fn write_failure(
    err: StoreError,
    on_conflict: &'static str,
    otherwise: &'static str,
) -> anyhow::Error {
    let context = if err.is_conflict() { on_conflict } else { otherwise };
    anyhow::Error::new(err).context(context)
}
