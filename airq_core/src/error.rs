use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input path: {} does not exist or is not a directory", .path.display())]
    InvalidPath { path: PathBuf },

    #[error("Failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("No CSV files found under {}", .root.display())]
    EmptyInput { root: PathBuf },

    #[error("Found {skipped} CSV files under {} but none could be parsed", .root.display())]
    NoUsableData { root: PathBuf, skipped: usize },

    #[error("Required column '{0}' is missing")]
    MissingColumn(String),

    #[error("Wide column name '{0}' is produced by more than one (measurement, site) pair")]
    ColumnCollision(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
