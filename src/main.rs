use anyhow::{bail, Context, Result};
use std::env;

use trial_warehouse::{
    run_pipeline, ApiIngestor, CsvIngestor, Ingestor, PipelineConfig, RunSummary, Severity,
};

const DEFAULT_DB_PATH: &str = "trial_warehouse.db";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("csv") => run_csv(&args[2..]),
        Some("api") => run_api(&args[2..]),
        Some("both") => run_both(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("Trial Warehouse - clinical trial ETL");
    println!();
    println!("Usage:");
    println!("  trial-warehouse csv <file.csv> [--db <path>]");
    println!("  trial-warehouse api [--condition <term>] [--status <status>]");
    println!("                      [--phase <phase>] [--max <n>] [--db <path>]");
    println!("  trial-warehouse both <file.csv> [api options] [--db <path>]");
    println!();
    println!("Examples:");
    println!("  trial-warehouse csv ctg-studies.csv");
    println!("  trial-warehouse api --condition diabetes --max 200");
    println!("  trial-warehouse both ctg-studies.csv --condition diabetes");
}

fn run_csv(args: &[String]) -> Result<()> {
    let csv_path = positional_path(args)
        .context("csv mode needs a file path: trial-warehouse csv <file.csv>")?;
    let db_path = flag_value(args, "--db")?.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

    println!("📂 Ingesting CSV: {}", csv_path);
    let source = CsvIngestor::new(csv_path);
    let summary = run_pipeline(&[&source], &PipelineConfig::new(&db_path))
        .with_context(|| format!("pipeline run over {} failed", csv_path))?;

    print_summary(&summary, &db_path);
    Ok(())
}

fn run_api(args: &[String]) -> Result<()> {
    let db_path = flag_value(args, "--db")?.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    let source = build_api_source(args)?;

    println!("🌐 Fetching from ClinicalTrials.gov...");
    let summary = run_pipeline(&[&source], &PipelineConfig::new(&db_path))
        .context("pipeline run over the API source failed")?;

    print_summary(&summary, &db_path);
    Ok(())
}

/// Combined run: bulk CSV and API ingested into one batch, cleaned,
/// validated, and loaded under a single run id.
fn run_both(args: &[String]) -> Result<()> {
    let csv_path = positional_path(args)
        .context("both mode needs a file path: trial-warehouse both <file.csv> [api options]")?;
    let db_path = flag_value(args, "--db")?.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

    let csv_source = CsvIngestor::new(csv_path);
    let api_source = build_api_source(args)?;

    println!("📂 Ingesting CSV: {}", csv_path);
    println!("🌐 Fetching from ClinicalTrials.gov...");
    let sources: [&dyn Ingestor; 2] = [&csv_source, &api_source];
    let summary = run_pipeline(&sources, &PipelineConfig::new(&db_path))
        .context("combined pipeline run failed")?;

    print_summary(&summary, &db_path);
    Ok(())
}

fn build_api_source(args: &[String]) -> Result<ApiIngestor> {
    let mut source = ApiIngestor::new();
    if let Some(condition) = flag_value(args, "--condition")? {
        source = source.with_condition(&condition);
    }
    if let Some(status) = flag_value(args, "--status")? {
        source = source.with_status(&status);
    }
    if let Some(phase) = flag_value(args, "--phase")? {
        source = source.with_phase(&phase);
    }
    if let Some(max) = flag_value(args, "--max")? {
        let max: usize = max
            .parse()
            .with_context(|| format!("--max expects a number, got '{}'", max))?;
        source = source.with_max_studies(max);
    }
    Ok(source)
}

fn positional_path(args: &[String]) -> Option<&String> {
    args.first().filter(|a| !a.starts_with("--"))
}

/// `--flag value` lookup; errors when the flag is present without a value.
fn flag_value(args: &[String], flag: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => match args.get(i + 1) {
            Some(value) if !value.starts_with("--") => Ok(Some(value.clone())),
            _ => bail!("{} requires a value", flag),
        },
        None => Ok(None),
    }
}

fn print_summary(summary: &RunSummary, db_path: &str) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Run {} complete", summary.run_id);
    println!("✓ Ingested: {} records", summary.rows_ingested);
    println!("✓ Cleaning:");
    for (rule, count) in summary.cleaning.iter() {
        println!("    {}: {}", rule, count);
    }

    let warnings = summary
        .validation
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .count();
    if warnings > 0 {
        println!("⚠ Validation passed with {} warning(s)", warnings);
    } else {
        println!("✓ Validation passed");
    }

    println!(
        "✓ Loaded: {} studies inserted, {} updated, {} organizations",
        summary.load.studies_inserted,
        summary.load.studies_updated,
        summary.load.organizations_inserted
    );
    println!(
        "✓ Bridges: {} rows ({} rejected), {} locations",
        summary.load.bridge_rows_inserted,
        summary.load.bridge_rows_rejected,
        summary.load.locations_inserted
    );
    println!(
        "✓ Warehouse now holds {} studies across {} organizations ({})",
        summary.load.warehouse_studies, summary.load.warehouse_organizations, db_path
    );
}
