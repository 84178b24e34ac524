use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SITE_NAME: &str = "site_name";
pub const DEVICE_NAME: &str = "device_name";
pub const DATETIME: &str = "datetime";
pub const SITE_ID: &str = "site_id";
pub const UNKNOWN_DEVICE: &str = "unknown_device";
pub const PROCESSED_DIR: &str = "data_processed";

pub const DEFAULT_MEASUREMENTS: [&str; 4] = [
    "pm2_5",
    "pm2_5_calibrated_value",
    "pm10",
    "pm10_calibrated_value",
];

/// How several readings for the same (hour, site) collapse into one cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Arithmetic mean of the non-missing values.
    #[default]
    Mean,
    /// Every non-missing value, in encounter order.
    Collect,
}

/// What the loader does with a CSV file it cannot parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParsePolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub measurements: Vec<String>,
    pub aggregation: Aggregation,
    pub parse_policy: ParsePolicy,
    pub drop_duplicates: bool,
    /// Columns that define a duplicate row; `None` means every column.
    pub duplicate_subset: Option<Vec<String>>,
    pub write_parquet: bool,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            measurements: DEFAULT_MEASUREMENTS.iter().map(|m| m.to_string()).collect(),
            aggregation: Aggregation::Mean,
            parse_policy: ParsePolicy::Skip,
            drop_duplicates: false,
            duplicate_subset: None,
            write_parquet: false,
            show_progress: true,
        }
    }
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.measurements.is_empty() {
            return Err(PipelineError::Config(
                "at least one measurement column is required".to_string(),
            ));
        }
        if let Some(subset) = &self.duplicate_subset {
            if subset.is_empty() {
                return Err(PipelineError::Config(
                    "duplicate_subset must name at least one column".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("/tmp/raw");
        assert_eq!(config.input_dir, PathBuf::from("/tmp/raw"));
        assert_eq!(config.measurements.len(), 4);
        assert_eq!(config.aggregation, Aggregation::Mean);
        assert_eq!(config.parse_policy, ParsePolicy::Skip);
        assert!(!config.drop_duplicates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"input_dir": "data/raw", "aggregation": "collect", "drop_duplicates": true}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.aggregation, Aggregation::Collect);
        assert!(config.drop_duplicates);
        assert_eq!(config.measurements[0], "pm2_5");
        assert_eq!(config.parse_policy, ParsePolicy::Skip);
    }

    #[test]
    fn test_empty_subset_rejected() {
        let mut config = PipelineConfig::new("x");
        config.duplicate_subset = Some(vec![]);
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }
}
