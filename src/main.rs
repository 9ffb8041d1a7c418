use address_match::{
    load_canonical_csv, load_transactions_csv, write_reports, MatchConfig, MatchStore, RunReport,
    SqliteStore, Waterfall,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "address-match", version, about = "Match transaction addresses against a canonical corpus")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "ADDRESS_MATCH_DB", default_value = "address_match.db", global = true)]
    db: PathBuf,

    /// TOML file overriding thresholds and batch sizes
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load canonical addresses and/or transactions from CSV
    Ingest {
        #[arg(long)]
        canonical: Option<PathBuf>,
        #[arg(long)]
        transactions: Option<PathBuf>,
    },
    /// Compute missing blocking prefixes and phonetic keys
    Index,
    /// Parse, index and run exact → fuzzy → phonetic
    Match,
    /// Export final output and unmatched report
    Report {
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Match, then export reports
    Run {
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Match a single address without touching stored transactions
    Lookup {
        raw_address: String,
    },
    /// Show recent match runs from the audit trail
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = MatchConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Command::Ingest { canonical, transactions } => run_ingest(&cli.db, canonical.as_deref(), transactions.as_deref()),
        Command::Index => run_index(&cli.db, config),
        Command::Match => run_match(&cli.db, config).map(|_| ()),
        Command::Report { output_dir } => run_report(&cli.db, &output_dir),
        Command::Run { output_dir } => {
            run_match(&cli.db, config)?;
            run_report(&cli.db, &output_dir)
        }
        Command::Lookup { raw_address } => run_lookup(&cli.db, config, &raw_address),
        Command::Runs { limit } => run_history(&cli.db, limit),
    }
}

fn open_store(db_path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(db_path).with_context(|| format!("Failed to open database {:?}", db_path))
}

fn run_ingest(db_path: &Path, canonical: Option<&Path>, transactions: Option<&Path>) -> Result<()> {
    println!("📥 Ingest - CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if canonical.is_none() && transactions.is_none() {
        anyhow::bail!("nothing to ingest: pass --canonical and/or --transactions");
    }

    let mut store = open_store(db_path)?;

    if let Some(path) = canonical {
        println!("\n📂 Loading canonical addresses from {:?}...", path);
        let rows = load_canonical_csv(path).context("Failed to read canonical CSV")?;
        let counts = store.insert_canonical(&rows)?;
        println!("✓ Inserted: {} canonical addresses", counts.inserted);
        println!("✓ Skipped duplicates: {}", counts.duplicates);
    }

    if let Some(path) = transactions {
        println!("\n📂 Loading transactions from {:?}...", path);
        let rows = load_transactions_csv(path).context("Failed to read transactions CSV")?;
        let counts = store.insert_transactions(&rows)?;
        println!("✓ Inserted: {} transactions", counts.inserted);
        println!("✓ Skipped duplicates: {}", counts.duplicates);
    }

    println!("\n🔍 Database contains {} canonical addresses, {} transactions",
        store.count_canonical()?,
        store.count_transactions()?
    );
    Ok(())
}

fn run_index(db_path: &Path, config: MatchConfig) -> Result<()> {
    println!("📚 Canonical index - prefixes + phonetic keys");

    let mut store = open_store(db_path)?;
    let waterfall = Waterfall::new(config)?;
    let stats = waterfall.ensure_index(&mut store).context("Index build failed")?;

    println!("✓ {}", stats.summary());
    Ok(())
}

fn run_match(db_path: &Path, config: MatchConfig) -> Result<RunReport> {
    println!("🌊 Matching waterfall - exact → fuzzy → phonetic");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut store = open_store(db_path)?;
    let waterfall = Waterfall::new(config)?;
    let report = waterfall.run(&mut store).context("Match run failed")?;

    println!("\n✓ Parsed: {} ({} unparseable)", report.parsed.parsed, report.parsed.unparseable);
    println!("✓ {}", report.index.summary());
    println!("✓ {}", report.exact.summary());
    println!("✓ {}", report.fuzzy.summary());
    println!("✓ {}", report.phonetic.summary());
    println!("✓ Finalized unmatched: {}", report.finalized);
    println!("\n🎉 Run {} complete: {} matched", report.run_id, report.total_matched());

    Ok(report)
}

fn run_report(db_path: &Path, output_dir: &Path) -> Result<()> {
    println!("\n📊 Writing reports to {:?}...", output_dir);

    let store = open_store(db_path)?;
    let rows = store.all_transactions()?;
    let (final_rows, unmatched_rows) = write_reports(output_dir, &rows).context("Failed to write reports")?;

    println!("✓ Final output: {} rows", final_rows);
    println!("✓ Unmatched report: {} rows", unmatched_rows);
    Ok(())
}

fn run_lookup(db_path: &Path, config: MatchConfig, raw_address: &str) -> Result<()> {
    let mut store = open_store(db_path)?;
    let waterfall = Waterfall::new(config)?;
    waterfall.ensure_index(&mut store)?;
    let index = waterfall.load_index(&store)?;

    let response = waterfall.lookup(&index, raw_address);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_history(db_path: &Path, limit: usize) -> Result<()> {
    println!("📜 Recent match runs");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = open_store(db_path)?;
    let runs = store.recent_runs(limit).context("Failed to read run history")?;
    if runs.is_empty() {
        println!("\n⚠️  No runs recorded yet");
        return Ok(());
    }

    for run in runs {
        println!(
            "\n🔖 {} ({} → {})",
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339()
        );
        println!(
            "   exact {} · fuzzy {} · phonetic {} · unmatched {}",
            run.exact.matched, run.fuzzy.matched, run.phonetic.matched, run.finalized
        );
    }
    Ok(())
}
