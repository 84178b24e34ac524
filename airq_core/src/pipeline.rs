use crate::config::PipelineConfig;
use crate::data_loader::{DataLoader, LoadReport};
use crate::diagnostics::{
    describe, duplicate_check, missing_report, monthly_missing, remove_duplicates, Description,
    DuplicateSummary, MissingReport, MonthlyMissing,
};
use crate::error::Result;
use crate::models::{LongTable, WideTable};
use crate::output::{
    persist_table, OutputLayout, DESCRIBE_JSON, LONG_TABLE, MISSING_REPORT, MONTHLY_COUNTS,
    MONTHLY_MISSING_PERCENT, WIDE_TABLE,
};
use crate::reshaper::Reshaper;
use crate::site_identifier::derive_site_ids;
use log::info;
use std::path::PathBuf;

/// Everything a run produced, handed to the caller for display and plotting.
pub struct PipelineOutcome {
    pub layout: OutputLayout,
    pub load_report: LoadReport,
    pub long: LongTable,
    pub duplicates: DuplicateSummary,
    pub duplicates_removed: usize,
    pub wide: WideTable,
    pub description: Description,
    pub missing: MissingReport,
    pub monthly: MonthlyMissing,
    pub artifacts: Vec<PathBuf>,
}

/// Load -> identify -> reshape -> diagnose, each stage taking the previous
/// stage's table explicitly.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(&self) -> Result<PipelineOutcome> {
        let config = &self.config;
        let mut artifacts = Vec::new();

        // Stage 1: merge
        let loader = DataLoader::new(config);
        let (long, load_report) = loader.load()?;
        let layout = OutputLayout::for_input(loader.input_dir());
        layout.ensure()?;
        artifacts.extend(persist_table(&layout, LONG_TABLE, long.frame(), config.write_parquet)?);

        // Stage 2: identify
        let identified = derive_site_ids(&long)?;

        // Stage 3: reshape
        let subset = config.duplicate_subset.as_deref();
        let duplicates = duplicate_check(identified.frame(), subset)?;
        let (pivot_input, duplicates_removed) = if config.drop_duplicates {
            let (cleaned, removed) = remove_duplicates(identified.frame(), subset)?;
            (LongTable::new(cleaned), removed)
        } else {
            (identified, 0)
        };

        let reshaper = Reshaper::from_config(config);
        let wide = reshaper.reshape(&pivot_input)?;
        artifacts.extend(persist_table(
            &layout,
            WIDE_TABLE,
            &wide.to_dataframe()?,
            config.write_parquet,
        )?);

        // Stage 4: diagnose
        let description = describe(&wide);
        let missing = missing_report(&wide);
        let monthly = monthly_missing(&wide);

        let describe_path = layout.file(DESCRIBE_JSON);
        description.write_json(&describe_path)?;
        artifacts.push(describe_path);

        let missing_path = layout.file(MISSING_REPORT);
        missing.write_csv(&missing_path)?;
        artifacts.push(missing_path);

        let counts_path = layout.file(MONTHLY_COUNTS);
        monthly.write_counts_csv(&counts_path)?;
        artifacts.push(counts_path);

        let percent_path = layout.file(MONTHLY_MISSING_PERCENT);
        monthly.write_percent_csv(&percent_path)?;
        artifacts.push(percent_path);

        info!(
            "Pipeline finished: {} artifacts under {}",
            artifacts.len(),
            layout.dir().display()
        );

        Ok(PipelineOutcome {
            layout,
            load_report,
            long: pivot_input,
            duplicates,
            duplicates_removed,
            wide,
            description,
            missing,
            monthly,
            artifacts,
        })
    }
}
