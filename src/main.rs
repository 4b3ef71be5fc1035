use anyhow::{Context, Result};
use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use postcode_import::{
    update_postcode_coordinates, update_states_and_counties, ImportConfig, ImportContext,
};

const USAGE: &str = "Usage: postcode-import <coordinates|hierarchy> <file.gz>";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config = ImportConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    let (job, file_name) = match args.as_slice() {
        [_, job, file_name] => (job.as_str(), file_name.as_str()),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    println!("📮 Postcode Import {}", postcode_import::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📂 Import path: {}", config.import_path.display());
    println!("🗄️  Database:    {}", config.database_path.display());

    let mut ctx = ImportContext::from_config(&config).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;

    let outcome = match job {
        "coordinates" => run_coordinates(&mut ctx, file_name),
        "hierarchy" => run_hierarchy(&mut ctx, file_name),
        other => Err(anyhow::anyhow!("Unknown job '{}'. {}", other, USAGE)),
    };

    // Queued aggregation runs finish before the process exits
    let stats = ctx.shutdown();
    if stats.completed + stats.failed > 0 {
        println!(
            "📊 Aggregation jobs: {} completed, {} failed",
            stats.completed, stats.failed
        );
    }

    outcome
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn run_coordinates(ctx: &mut ImportContext, file_name: &str) -> Result<()> {
    println!("\n🧭 Importing postcode boundaries from {}...", file_name);

    let report = update_postcode_coordinates(ctx, file_name)
        .with_context(|| format!("Postcode coordinate import of {} failed", file_name))?;

    println!("✓ {}", report.summary());
    println!("✅ Coordinates imported");

    Ok(())
}

fn run_hierarchy(ctx: &mut ImportContext, file_name: &str) -> Result<()> {
    println!("\n🏛️  Importing states and counties from {}...", file_name);

    let import = update_states_and_counties(ctx, file_name)
        .with_context(|| format!("State/county import of {} failed", file_name))?;

    if import.reconciliation.locations == 0 {
        println!("⚠️  No postcode locations in the database, run the coordinates job first");
    }

    println!("✓ {}", import.reconciliation.summary());
    println!("✓ Skipped rows: {}", import.skipped_rows);
    println!("✓ Aggregation job queued: {}", import.aggregation_job);
    println!("✅ States and counties imported");

    Ok(())
}
