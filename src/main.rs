use airq_core::{Aggregation, ParsePolicy, Pipeline, PipelineConfig, PipelineOutcome};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

mod missing_visualization;
mod output_verifier;

use missing_visualization::MissingDataPlotter;

#[derive(Parser)]
#[command(name = "airq_processor")]
#[command(about = "Merge, reshape and audit air-quality sensor CSV exports")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load, identify, reshape and diagnose a directory of raw CSV files
    Run(RunArgs),
    /// Check the artifacts of a finished run
    Verify {
        /// Directory holding the processed CSV files
        #[arg(long, default_value = "data_processed")]
        processed: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Root directory of the raw CSV files (prompted for when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// JSON pipeline configuration; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How readings sharing an hour and site are combined
    #[arg(long, value_enum)]
    aggregation: Option<AggregationArg>,

    /// What to do with a CSV file that cannot be parsed
    #[arg(long, value_enum)]
    parse_policy: Option<ParsePolicyArg>,

    /// Drop duplicate rows before pivoting
    #[arg(long)]
    drop_duplicates: bool,

    /// Comma-separated columns that define a duplicate row
    #[arg(long, value_delimiter = ',')]
    duplicate_subset: Option<Vec<String>>,

    /// Also write Parquet copies of the long and wide tables
    #[arg(long)]
    parquet: bool,

    /// Skip chart rendering
    #[arg(long)]
    no_plots: bool,

    /// Worker threads for file parsing (defaults to all cores)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AggregationArg {
    Mean,
    Collect,
}

impl From<AggregationArg> for Aggregation {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Collect => Aggregation::Collect,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ParsePolicyArg {
    Skip,
    Abort,
}

impl From<ParsePolicyArg> for ParsePolicy {
    fn from(arg: ParsePolicyArg) -> Self {
        match arg {
            ParsePolicyArg::Skip => ParsePolicy::Skip,
            ParsePolicyArg::Abort => ParsePolicy::Abort,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Verify { processed } => {
            let report = output_verifier::verify_processed_dir(&processed)?;
            if report.issues > 0 {
                bail!("{} issues found in {}", report.issues, processed.display());
            }
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.unwrap_or_else(num_cpus::get))
        .build_global()?;

    let config = build_config(&args)?;

    println!("🚀 Air Quality Data Pipeline");
    println!("Input directory: {}", config.input_dir.display());
    println!(
        "Rayon thread pool configured with {} threads",
        rayon::current_num_threads()
    );
    println!("{}", "=".repeat(60));

    let pipeline = Pipeline::new(config)?;
    let outcome = pipeline.run()?;
    print_summary(&outcome)?;

    if args.no_plots {
        info!("Chart rendering disabled");
    } else {
        let plots_dir = outcome.layout.plots_dir()?;
        let plotter = MissingDataPlotter::new(plots_dir)?;
        plotter.generate_all(&outcome.wide, &outcome.monthly)?;
    }

    println!("\n✅ Outputs written to {}", outcome.layout.dir().display());
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(input) = &args.input {
        config.input_dir = input.clone();
    } else if config.input_dir.as_os_str().is_empty() {
        config.input_dir = prompt_for_input()?;
    }
    if let Some(aggregation) = args.aggregation {
        config.aggregation = aggregation.into();
    }
    if let Some(policy) = args.parse_policy {
        config.parse_policy = policy.into();
    }
    if args.drop_duplicates {
        config.drop_duplicates = true;
    }
    if let Some(subset) = &args.duplicate_subset {
        config.duplicate_subset = Some(subset.clone());
    }
    if args.parquet {
        config.write_parquet = true;
    }

    config.validate()?;
    Ok(config)
}

fn prompt_for_input() -> Result<PathBuf> {
    print!("Enter the path to the raw data directory: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim().trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() {
        bail!("no input directory given");
    }
    Ok(PathBuf::from(trimmed))
}

fn print_summary(outcome: &PipelineOutcome) -> Result<()> {
    let load = &outcome.load_report;
    println!("\n📁 Loading");
    println!(
        "  Files found: {}, loaded: {}, skipped: {}",
        load.files_found,
        load.files_loaded,
        load.skipped.len()
    );
    for skipped in &load.skipped {
        println!("    ⚠️  {}: {}", skipped.path.display(), skipped.reason);
    }
    if load.invalid_timestamps > 0 {
        println!(
            "  ⚠️  {} timestamps could not be parsed and were left empty",
            load.invalid_timestamps
        );
    }
    println!("  Merged shape: ({}, {})", load.rows, load.columns);

    println!("\n🔁 Duplicates");
    let duplicates = &outcome.duplicates;
    if duplicates.duplicate_rows > 0 {
        println!(
            "  Number of duplicate rows: {} in {} groups",
            duplicates.duplicate_rows,
            duplicates.groups.len()
        );
        if outcome.duplicates_removed == 0 {
            let sample = duplicates.rows_of(outcome.long.frame())?;
            println!("{}", sample.head(Some(10)));
        }
    } else {
        println!("  No duplicate rows");
    }
    if outcome.duplicates_removed > 0 {
        println!("  Removed {} duplicate rows", outcome.duplicates_removed);
    }

    let description = &outcome.description;
    println!("\n📊 Wide table");
    println!(
        "  Shape: ({}, {})",
        description.rows, description.columns
    );
    if let (Some(start), Some(end)) = (description.start, description.end) {
        println!("  Time span: {} to {}", start, end);
    }
    match &description.inferred_frequency {
        Some(freq) => println!("  Inferred frequency of the datetime index: {}", freq),
        None => println!("  Inferred frequency of the datetime index: unknown"),
    }
    println!("  Rows per month:");
    for (month, rows) in &description.rows_per_month {
        println!("    {}  {}", month, rows);
    }

    let missing = &outcome.missing;
    println!("\n🕳️  Missing data");
    println!(
        "  Total rows with any missing values: {} of {}",
        missing.rows_with_missing, missing.total_rows
    );
    for entry in missing.entries.iter().take(15) {
        println!(
            "  {:<45} {:>8} {:>8.2}%",
            entry.column,
            entry.missing_count,
            entry.missing_percent.unwrap_or(0.0)
        );
    }
    if missing.entries.len() > 15 {
        println!("  ... and {} more columns", missing.entries.len() - 15);
    }

    println!("\n📦 Artifacts");
    for path in &outcome.artifacts {
        println!("  {}", path.display());
    }
    Ok(())
}
