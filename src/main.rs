// 🌱 Niche Seeder - CLI
//
//   niche-seeder data/industries.json            load into the hosted store
//   niche-seeder data/industries.json --reset    wipe everything first
//   niche-seeder data/industries.json --sqlite seed.db
//
// Progress goes to stdout, errors to stderr. Exit code 0 on success, 1 otherwise.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use niche_seeder::{
    plan, BatchProgress, LoadError, LoadPlan, LoadReport, Loader, LoaderOptions, ProgressObserver,
    ReferenceDataset, RunState, SqliteStore, Store, TableLayout, DEFAULT_BATCH_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "niche-seeder", version, about = "Load industries and niches into the reference store")]
struct Cli {
    /// Dataset file (.json manifest or .csv)
    dataset: PathBuf,

    /// Delete all user state, niches and industries before loading
    #[arg(long)]
    reset: bool,

    /// Records per write
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Table and column names to write to
    #[arg(long, value_enum, default_value_t = Layout::Niches)]
    layout: Layout,

    /// Write to a local SQLite file instead of the hosted store
    #[arg(long, value_name = "PATH")]
    sqlite: Option<PathBuf>,

    /// Do not create categories; every referenced one must already exist
    #[arg(long)]
    existing_categories_only: bool,

    /// Check the dataset and print the plan without touching any store
    #[arg(long)]
    dry_run: bool,

    /// Re-read the loaded rows and fail if a record is missing or duplicated
    #[arg(long)]
    verify: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    /// industries / niches / niche_user_state
    Niches,
    /// categories / leaf_records / dependent_state
    Generic,
}

impl Layout {
    fn tables(self) -> TableLayout {
        match self {
            Layout::Niches => TableLayout::niches(),
            Layout::Generic => TableLayout::generic(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            report_error(&err);
            std::process::exit(1);
        }
    }
}

/// Returns Ok(false) when the load finished but verification found gaps
fn run(cli: &Cli) -> Result<bool> {
    println!("🌱 Niche Seeder v{}", niche_seeder::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let options = LoaderOptions {
        reset: cli.reset,
        batch_size: cli.batch_size,
        layout: cli.layout.tables(),
        verify: cli.verify,
    };

    // 1. Load dataset
    println!("\n📂 Loading {}...", cli.dataset.display());
    let mut dataset = ReferenceDataset::load(&cli.dataset)?;
    if cli.existing_categories_only {
        dataset = dataset.without_creation_set();
    }
    println!(
        "✓ {} records in {} categories",
        dataset.len(),
        dataset.referenced_categories().len()
    );

    if cli.dry_run {
        let plan = plan(&mut dataset, &options)?;
        print_plan(&plan);
        return Ok(true);
    }

    // 2. Open store
    let store = open_store(cli, &options.layout)?;

    // 3. Run
    let mut loader = Loader::new(store, options);
    let report = loader.run(dataset, &mut ConsoleProgress)?;

    Ok(print_report(&report))
}

fn open_store(cli: &Cli, layout: &TableLayout) -> Result<Box<dyn Store>> {
    match &cli.sqlite {
        Some(path) => {
            println!("\n🔧 Opening SQLite store {}...", path.display());
            let store = SqliteStore::open(path, layout)
                .with_context(|| format!("opening SQLite store {}", path.display()))?;
            Ok(Box::new(store))
        }
        None => open_remote_store(),
    }
}

#[cfg(feature = "remote")]
fn open_remote_store() -> Result<Box<dyn Store>> {
    let config = niche_seeder::RemoteConfig::from_env()?;
    println!("\n🌐 Target: {}", config.base_url());
    Ok(Box::new(niche_seeder::PostgrestStore::new(&config)?))
}

#[cfg(not(feature = "remote"))]
fn open_remote_store() -> Result<Box<dyn Store>> {
    Err(LoadError::configuration("built without the `remote` feature; pass --sqlite PATH").into())
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Prints one line per state change and per written batch
struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_state(&mut self, state: RunState) {
        match state {
            RunState::Resetting => println!("\n🧹 Resetting: user state → niches → industries..."),
            RunState::ResolvingCategories => println!("\n🏷️  Resolving categories..."),
            RunState::Upserting => println!("\n💾 Upserting records..."),
            RunState::Verifying => println!("\n🔍 Verifying..."),
            _ => {}
        }
    }

    fn on_batch(&mut self, p: &BatchProgress) {
        println!(
            "✓ Batch {}/{}: {} records ({} new), {} of {} inserted so far",
            p.batch_index + 1,
            p.batch_count,
            p.submitted,
            p.written,
            p.cumulative,
            p.total_records
        );
    }
}

fn print_plan(plan: &LoadPlan) {
    println!("\n📋 Dry run - nothing will be written");
    println!("   Fingerprint: {}", plan.fingerprint);
    println!("   Records:     {}", plan.records);
    println!(
        "   Categories:  {} referenced, {} declared",
        plan.categories_referenced, plan.categories_declared
    );
    println!("   Batches:     {} of up to {}", plan.batches, plan.batch_size);
    println!("   Reset:       {}", if plan.reset { "yes" } else { "no" });
    println!("   Quality:     {}", plan.quality.summary());
    for issue in &plan.quality.issues {
        println!("     {}", issue);
    }
}

fn print_report(report: &LoadReport) -> bool {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if let Some(reset) = &report.reset {
        println!(
            "🧹 Deleted {} user state rows, {} niches, {} industries",
            reset.dependent_state, reset.leaf_records, reset.categories
        );
    }
    println!(
        "🏷️  {} categories resolved ({} created)",
        report.categories_resolved,
        report.categories_created.len()
    );
    println!(
        "💾 {} records in {} batches: {} inserted, {} already present",
        report.upsert.submitted,
        report.upsert.batches,
        report.upsert.affected,
        report.upsert.skipped()
    );

    if let Some(verify) = &report.verify {
        if !verify.is_complete() {
            eprintln!(
                "❌ Verification failed: {} missing, {} duplicated",
                verify.missing.len(),
                verify.duplicated.len()
            );
            for (category, name) in &verify.missing {
                eprintln!("   missing:    {} / {}", category, name);
            }
            for (category, name) in &verify.duplicated {
                eprintln!("   duplicated: {} / {}", category, name);
            }
            return false;
        }
        println!("🔍 Verified {} records ({} rows found)", verify.expected, verify.rows_found);
    }

    println!("✅ Done in {} ms", report.duration_ms());
    true
}

fn report_error(err: &anyhow::Error) {
    eprintln!("\n❌ {}", err);

    if let Some(load) = err.downcast_ref::<LoadError>() {
        eprintln!("   Stage: {}", load.stage());
        if let LoadError::Persistence {
            batch_index: Some(index),
            ..
        } = load
        {
            eprintln!("   Failed batch: {}", index + 1);
        }
        if load.committed() > 0 {
            eprintln!(
                "   {} rows were committed before the failure; re-run to finish the load",
                load.committed()
            );
        }
    }
}
