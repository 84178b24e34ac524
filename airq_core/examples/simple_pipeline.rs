use airq_core::{Aggregation, Pipeline, PipelineConfig};
use std::env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Directory of raw site CSVs, e.g. `cargo run --example simple_pipeline -- data/raw`
    let input = env::args().nth(1).unwrap_or_else(|| "data/raw".to_string());

    let mut config = PipelineConfig::new(input);
    config.aggregation = Aggregation::Mean;
    config.drop_duplicates = true;

    let outcome = Pipeline::new(config)?.run()?;

    println!("Air Quality Pipeline Results");
    println!("============================");
    println!(
        "Files: {} found, {} loaded, {} skipped",
        outcome.load_report.files_found,
        outcome.load_report.files_loaded,
        outcome.load_report.skipped.len()
    );
    println!("Long table rows: {}", outcome.long.height());
    println!("Duplicates removed: {}", outcome.duplicates_removed);
    println!(
        "Wide table: {} hours x {} columns",
        outcome.wide.height(),
        outcome.wide.width()
    );
    if let (Some(start), Some(end)) = (outcome.description.start, outcome.description.end) {
        println!("Span: {} to {}", start, end);
    }
    println!();

    println!("Most incomplete columns:");
    for entry in outcome.missing.entries.iter().take(5) {
        println!(
            "  {:<40} {:>6} missing ({:.1}%)",
            entry.column,
            entry.missing_count,
            entry.missing_percent.unwrap_or(0.0)
        );
    }

    println!();
    println!("Outputs written to {}", outcome.layout.dir().display());
    Ok(())
}
