use crate::config::PROCESSED_DIR;
use crate::error::Result;
use log::info;
use polars::prelude::*;
use std::path::{Path, PathBuf};

pub const LONG_TABLE: &str = "01_long";
pub const WIDE_TABLE: &str = "02_wide_pm";
pub const MONTHLY_COUNTS: &str = "monthly_counts.csv";
pub const MONTHLY_MISSING_PERCENT: &str = "monthly_missing_percent.csv";
pub const MISSING_REPORT: &str = "missing_report.csv";
pub const DESCRIBE_JSON: &str = "describe.json";
pub const PLOTS_DIR: &str = "plots";

/// Where a run's artifacts go: `data_processed/` next to the input root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    dir: PathBuf,
}

impl OutputLayout {
    pub fn for_input(input_dir: &Path) -> Self {
        let absolute = input_dir
            .canonicalize()
            .unwrap_or_else(|_| input_dir.to_path_buf());
        let parent = absolute.parent().unwrap_or(&absolute);
        Self {
            dir: parent.join(PROCESSED_DIR),
        }
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directory; a no-op if it already exists.
    pub fn ensure(&self) -> Result<&Path> {
        if !self.dir.exists() {
            info!("Created directory: {}", self.dir.display());
        }
        std::fs::create_dir_all(&self.dir)?;
        Ok(&self.dir)
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn csv(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", stem))
    }

    pub fn parquet(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.parquet", stem))
    }

    pub fn plots_dir(&self) -> Result<PathBuf> {
        let plots = self.dir.join(PLOTS_DIR);
        std::fs::create_dir_all(&plots)?;
        Ok(plots)
    }
}

pub fn write_csv(df: &DataFrame, path: &Path) -> Result<()> {
    CsvWriter::new(std::fs::File::create(path)?)
        .has_header(true)
        .finish(&mut df.clone())?;
    info!("Saved {} rows to {}", df.height(), path.display());
    Ok(())
}

pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<()> {
    ParquetWriter::new(std::fs::File::create(path)?).finish(&mut df.clone())?;
    info!("Saved {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Write `<stem>.csv`, plus `<stem>.parquet` when requested; returns the paths written.
pub fn persist_table(
    layout: &OutputLayout,
    stem: &str,
    df: &DataFrame,
    with_parquet: bool,
) -> Result<Vec<PathBuf>> {
    layout.ensure()?;
    let mut written = Vec::new();

    let csv_path = layout.csv(stem);
    write_csv(df, &csv_path)?;
    written.push(csv_path);

    if with_parquet {
        let parquet_path = layout.parquet(stem);
        write_parquet(df, &parquet_path)?;
        written.push(parquet_path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_is_sibling_of_input() {
        let root = TempDir::new().unwrap();
        let raw = root.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();

        let layout = OutputLayout::for_input(&raw);
        assert!(layout.dir().ends_with(PROCESSED_DIR));
        assert_eq!(
            layout.dir().parent().unwrap().file_name(),
            root.path().canonicalize().unwrap().file_name()
        );
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let root = TempDir::new().unwrap();
        let layout = OutputLayout::at(root.path().join("out"));
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.dir().is_dir());
    }

    #[test]
    fn test_persist_writes_csv_and_parquet() {
        let root = TempDir::new().unwrap();
        let layout = OutputLayout::at(root.path().join("out"));
        let df = df!("a" => &[1i64, 2, 3]).unwrap();

        let written = persist_table(&layout, "table", &df, true).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|p| p.exists()));
    }
}
