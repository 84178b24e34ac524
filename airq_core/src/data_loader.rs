use crate::config::{ParsePolicy, PipelineConfig, DATETIME, SITE_NAME};
use crate::error::{PipelineError, Result};
use crate::models::{datetime_series, LongTable};
use crate::timestamps::parse_timestamp;
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use polars::prelude::*;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const ROW_ORDER: &str = "__row_order";

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub files_found: usize,
    pub files_loaded: usize,
    pub skipped: Vec<SkippedFile>,
    pub invalid_timestamps: usize,
    pub rows: usize,
    pub columns: usize,
}

pub struct DataLoader {
    input_dir: PathBuf,
    measurements: Vec<String>,
    parse_policy: ParsePolicy,
    show_progress: bool,
}

impl DataLoader {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            measurements: config.measurements.clone(),
            parse_policy: config.parse_policy,
            show_progress: config.show_progress,
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Every `*.csv` file under the input root, in file-name order.
    pub fn discover_csv_files(&self) -> Result<Vec<PathBuf>> {
        if !self.input_dir.is_dir() {
            return Err(PipelineError::InvalidPath {
                path: self.input_dir.clone(),
            });
        }

        let files: Vec<PathBuf> = WalkDir::new(&self.input_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_csv(p))
            .collect();

        Ok(files)
    }

    /// Discover, parse, merge, coerce and sort into the long table.
    pub fn load(&self) -> Result<(LongTable, LoadReport)> {
        let files = self.discover_csv_files()?;
        if files.is_empty() {
            return Err(PipelineError::EmptyInput {
                root: self.input_dir.clone(),
            });
        }

        info!("Found {} CSV files under {}", files.len(), self.input_dir.display());

        let pb = if self.show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        // Parsed in parallel, collected in discovery order.
        let parsed: Vec<(PathBuf, std::result::Result<DataFrame, String>)> = files
            .par_iter()
            .map(|file| {
                let outcome = read_csv_file(file);
                pb.inc(1);
                (file.clone(), outcome)
            })
            .collect();

        pb.finish_with_message("Files loaded");

        let mut report = LoadReport {
            files_found: files.len(),
            ..LoadReport::default()
        };
        let mut frames = Vec::with_capacity(parsed.len());

        for (path, outcome) in parsed {
            match outcome {
                Ok(df) => {
                    debug!("Parsed {} ({} rows)", path.display(), df.height());
                    frames.push(df);
                }
                Err(reason) => match self.parse_policy {
                    ParsePolicy::Abort => return Err(PipelineError::Parse { path, reason }),
                    ParsePolicy::Skip => {
                        warn!("Skipping {}: {}", path.display(), reason);
                        report.skipped.push(SkippedFile { path, reason });
                    }
                },
            }
        }

        if frames.is_empty() {
            return Err(PipelineError::NoUsableData {
                root: self.input_dir.clone(),
                skipped: report.skipped.len(),
            });
        }
        report.files_loaded = frames.len();

        info!("Combining {} dataframes...", frames.len());
        let mut merged = merge_frames(frames)?;

        report.invalid_timestamps = coerce_datetime(&mut merged)?;
        if report.invalid_timestamps > 0 {
            warn!(
                "{} datetime values could not be parsed and were set to missing",
                report.invalid_timestamps
            );
        }

        cast_measurements(&mut merged, &self.measurements)?;
        let sorted = sort_long(merged)?;

        report.rows = sorted.height();
        report.columns = sorted.width();
        info!("Combined shape: ({}, {})", report.rows, report.columns);

        Ok((LongTable::new(sorted), report))
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Read one file with every column as text so files with different
/// inferred types still union cleanly.
fn read_csv_file(path: &Path) -> std::result::Result<DataFrame, String> {
    let df = CsvReader::from_path(path)
        .map_err(|e| e.to_string())?
        .has_header(true)
        .infer_schema(Some(0))
        .finish()
        .map_err(|e| e.to_string())?;

    let columns = df.get_column_names();
    for required in [SITE_NAME, DATETIME] {
        if !columns.contains(&required) {
            return Err(format!("missing required column '{}'", required));
        }
    }

    Ok(df)
}

/// Row-wise union; a column absent from a frame is filled with nulls.
pub fn merge_frames(frames: Vec<DataFrame>) -> Result<DataFrame> {
    let mut union: Vec<String> = Vec::new();
    for df in &frames {
        for name in df.get_column_names() {
            if !union.iter().any(|u| u == name) {
                union.push(name.to_string());
            }
        }
    }

    let mut aligned = Vec::with_capacity(frames.len());
    for mut df in frames {
        let height = df.height();
        for name in &union {
            if df.column(name).is_err() {
                df.with_column(Series::full_null(name, height, &DataType::Utf8))?;
            } else if df.column(name)?.dtype() != &DataType::Utf8 {
                let text = df.column(name)?.cast(&DataType::Utf8)?;
                df.with_column(text)?;
            }
        }
        aligned.push(df.select(&union)?.lazy());
    }

    Ok(concat(aligned.as_slice(), UnionArgs::default())?.collect()?)
}

/// Replace the text `datetime` column with a parsed one; returns how many
/// non-empty values could not be parsed.
pub fn coerce_datetime(df: &mut DataFrame) -> Result<usize> {
    let mut invalid = 0;
    let parsed: Vec<Option<NaiveDateTime>> = {
        let raw = df
            .column(DATETIME)
            .map_err(|_| PipelineError::MissingColumn(DATETIME.to_string()))?
            .cast(&DataType::Utf8)?;
        let values: Vec<Option<NaiveDateTime>> = raw
            .utf8()?
            .into_iter()
            .map(|value| {
                let ts = value.and_then(parse_timestamp);
                if value.is_some() && ts.is_none() {
                    invalid += 1;
                }
                ts
            })
            .collect();
        values
    };

    df.with_column(datetime_series(DATETIME, &parsed)?)?;
    Ok(invalid)
}

/// Measurement columns become Float64; unparseable text becomes null.
pub fn cast_measurements(df: &mut DataFrame, measurements: &[String]) -> Result<()> {
    for measurement in measurements {
        let cast = match df.column(measurement) {
            Ok(series) => series.cast(&DataType::Float64)?,
            Err(_) => {
                debug!("Measurement column '{}' not present", measurement);
                continue;
            }
        };
        df.with_column(cast)?;
    }
    Ok(())
}

/// Stable sort by `(site_name, datetime)`, nulls last.
pub fn sort_long(df: DataFrame) -> Result<DataFrame> {
    let sorted = df
        .with_row_count(ROW_ORDER, None)?
        .lazy()
        .sort_by_exprs(
            [col(SITE_NAME), col(DATETIME), col(ROW_ORDER)],
            [false, false, false],
            true,
            true,
        )
        .collect()?;
    Ok(sorted.drop(ROW_ORDER)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datetime_values;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn quiet_config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::new(dir);
        config.show_progress = false;
        config
    }

    fn text_column(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name)
            .unwrap()
            .utf8()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_missing_directory_is_invalid_path() {
        let loader = DataLoader::new(&quiet_config(Path::new("/definitely/not/here")));
        assert!(matches!(loader.load(), Err(PipelineError::InvalidPath { .. })));
    }

    #[test]
    fn test_no_csv_files_is_empty_input() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "notes.txt", "hello");
        let loader = DataLoader::new(&quiet_config(tmp.path()));
        assert!(matches!(loader.load(), Err(PipelineError::EmptyInput { .. })));
    }

    #[test]
    fn test_recursive_discovery_in_name_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.csv", "site_name,datetime\n");
        write(tmp.path(), "nested/deeper/a.CSV", "site_name,datetime\n");
        write(tmp.path(), "nested/readme.md", "x");

        let loader = DataLoader::new(&quiet_config(tmp.path()));
        let files = loader.discover_csv_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_csv(f)));
    }

    #[test]
    fn test_union_sort_and_coercion() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "site_b.csv",
            "site_name,device_name,datetime,pm2_5\n\
             \"Beta, Town\",dev_b,2024-01-01 02:00:00,12.5\n\
             \"Beta, Town\",dev_b,2024-01-01 01:00:00,oops\n",
        );
        write(
            tmp.path(),
            "site_a.csv",
            "site_name,datetime,pm2_5,pm10\n\
             \"Alpha, City\",garbage,3.0,4.0\n\
             \"Alpha, City\",2024-01-01 00:00:00,1.0,2.0\n",
        );

        let loader = DataLoader::new(&quiet_config(tmp.path()));
        let (long, report) = loader.load().unwrap();
        let df = long.frame();

        assert_eq!(report.files_loaded, 2);
        assert_eq!(report.invalid_timestamps, 1);
        assert_eq!(df.height(), 4);
        // Union keeps every column seen in any file.
        for name in ["site_name", "device_name", "datetime", "pm2_5", "pm10"] {
            assert!(df.column(name).is_ok(), "missing column {}", name);
        }

        let sites = text_column(df, SITE_NAME);
        assert_eq!(sites[0].as_deref(), Some("Alpha, City"));
        assert_eq!(sites[3].as_deref(), Some("Beta, Town"));

        // Null timestamps sort last within their site.
        let times = datetime_values(df.column(DATETIME).unwrap()).unwrap();
        assert!(times[0].is_some());
        assert!(times[1].is_none());
        assert!(times[2] < times[3]);

        // Unparseable measurement text becomes missing.
        let pm = df.column("pm2_5").unwrap().f64().unwrap();
        assert_eq!(pm.get(2), None);
        assert_eq!(pm.get(3), Some(12.5));

        let devices = text_column(df, "device_name");
        assert_eq!(devices[0], None);
        assert_eq!(devices[2].as_deref(), Some("dev_b"));
    }

    #[test]
    fn test_ties_keep_encounter_order() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "one.csv",
            "site_name,datetime,pm2_5\nX,2024-01-01 00:00:00,1\nX,2024-01-01 00:00:00,2\nX,2024-01-01 00:00:00,3\n",
        );

        let loader = DataLoader::new(&quiet_config(tmp.path()));
        let (long, _) = loader.load().unwrap();
        let values: Vec<Option<f64>> = long
            .frame()
            .column("pm2_5")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_parse_policy_skip_and_abort() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good.csv", "site_name,datetime,pm2_5\nX,2024-01-01,1\n");
        write(tmp.path(), "bad.csv", "station,timestamp\nX,2024-01-01\n");

        let mut config = quiet_config(tmp.path());
        let (long, report) = DataLoader::new(&config).load().unwrap();
        assert_eq!(long.height(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("bad.csv"));

        config.parse_policy = ParsePolicy::Abort;
        assert!(matches!(
            DataLoader::new(&config).load(),
            Err(PipelineError::Parse { .. })
        ));
    }

    #[test]
    fn test_all_files_skipped_is_no_usable_data() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "bad.csv", "station,timestamp\nX,2024-01-01\n");
        let loader = DataLoader::new(&quiet_config(tmp.path()));
        assert!(matches!(
            loader.load(),
            Err(PipelineError::NoUsableData { skipped: 1, .. })
        ));
    }
}
