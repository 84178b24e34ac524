use airq_core::config::{DATETIME, SITE_NAME};
use airq_core::timestamps::parse_timestamp;
use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use glob::glob;
use polars::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct VerificationReport {
    pub files_checked: usize,
    pub issues: usize,
}

enum ArtifactKind {
    Long,
    Wide,
    Other,
}

fn classify(df: &DataFrame) -> ArtifactKind {
    let names = df.get_column_names();
    if names.contains(&SITE_NAME) && names.contains(&DATETIME) {
        ArtifactKind::Long
    } else if names.first() == Some(&DATETIME) {
        ArtifactKind::Wide
    } else {
        ArtifactKind::Other
    }
}

/// Read-only sanity pass over the CSV artifacts of a finished run.
pub fn verify_processed_dir(dir: &Path) -> Result<VerificationReport> {
    println!("\n🔍 Data Quality Verification");
    println!("{}", "=".repeat(60));

    let pattern = dir.join("*.csv");
    let files: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
        .filter_map(std::result::Result::ok)
        .collect();

    let mut report = VerificationReport::default();
    if files.is_empty() {
        println!("⚠️  No CSV artifacts found in {}", dir.display());
        return Ok(report);
    }

    println!("\n📁 Checking {} files in {}", files.len(), dir.display());

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let df = CsvReader::from_path(&file)?
            .has_header(true)
            .infer_schema(Some(0))
            .finish()?;

        match classify(&df) {
            ArtifactKind::Long => {
                println!("\n  Verifying long table: {}", name);
                verify_long(&df)?;
            }
            ArtifactKind::Wide => {
                println!("\n  Verifying wide table: {}", name);
                report.issues += verify_wide(&df)?;
            }
            ArtifactKind::Other => {
                println!("\n  Skipping {} (report, not a table)", name);
                continue;
            }
        }
        report.files_checked += 1;
        println!("    📊 Total records: {}", df.height());
    }

    println!("\n{}", "=".repeat(60));
    if report.issues == 0 {
        println!("✅ Data quality verification passed! No issues found.");
    } else {
        println!(
            "⚠️  Data quality verification found {} issues",
            report.issues
        );
    }

    Ok(report)
}

/// Repeated (site_name, datetime) pairs are expected in the long table; the
/// reshaper aggregates them, so they are reported but never counted as issues.
fn verify_long(df: &DataFrame) -> Result<()> {
    let repeated = df
        .clone()
        .lazy()
        .filter(col(DATETIME).is_not_null())
        .group_by([col(SITE_NAME), col(DATETIME)])
        .agg([col(DATETIME).count().alias("count")])
        .filter(col("count").gt(lit(1)))
        .collect()?;

    if repeated.height() > 0 {
        println!(
            "    ⚠️  {} (site_name, datetime) pairs repeat; they are aggregated in the wide table",
            repeated.height()
        );
    } else {
        println!("    ✅ No repeated (site_name, datetime) pairs");
    }

    println!(
        "    📊 Unique sites: {}",
        df.column(SITE_NAME)?.n_unique()?
    );
    Ok(())
}

fn verify_wide(df: &DataFrame) -> Result<usize> {
    let mut issues = 0;

    let raw = df.column(DATETIME)?.utf8()?;
    let mut index: Vec<NaiveDateTime> = Vec::with_capacity(df.height());
    let mut unparseable = 0;
    for value in raw.into_iter() {
        match value.and_then(parse_timestamp) {
            Some(ts) => index.push(ts),
            None => unparseable += 1,
        }
    }
    if unparseable > 0 {
        println!("    ❌ {} index values are not timestamps", unparseable);
        issues += unparseable;
    }

    let checks = check_hourly_index(&index);
    if checks.duplicates > 0 {
        println!("    ❌ Found {} duplicate timestamps", checks.duplicates);
        issues += checks.duplicates;
    } else {
        println!("    ✅ No duplicate timestamps");
    }

    if checks.gaps > 0 {
        println!("    ⚠️  Found {} non-hourly steps in the index", checks.gaps);
        issues += checks.gaps;
    } else {
        println!("    ✅ No gaps in hourly index");
    }

    if checks.sorted {
        println!("    ✅ Data is properly sorted");
    } else {
        println!("    ⚠️  Data is not sorted by datetime");
        issues += 1;
    }

    println!("    📊 Data columns: {}", df.width().saturating_sub(1));
    Ok(issues)
}

#[derive(Debug, PartialEq)]
struct IndexChecks {
    duplicates: usize,
    gaps: usize,
    sorted: bool,
}

fn check_hourly_index(index: &[NaiveDateTime]) -> IndexChecks {
    let mut seen = HashSet::with_capacity(index.len());
    let duplicates = index.iter().filter(|ts| !seen.insert(**ts)).count();
    let sorted = index.windows(2).all(|w| w[0] <= w[1]);
    let gaps = index
        .windows(2)
        .filter(|w| w[1] != w[0] && w[1] - w[0] != Duration::hours(1))
        .count();

    IndexChecks {
        duplicates,
        gaps,
        sorted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_clean_processed_dir_passes() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("02_wide_pm.csv"),
            "datetime,pm2_5_a\n\
             2024-01-01 00:00:00,1.0\n\
             2024-01-01 01:00:00,\n\
             2024-01-01 02:00:00,3.0\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("01_long.csv"),
            "site_name,device_name,datetime,pm2_5\n\
             A,d1,2024-01-01 00:00:00,1.0\n\
             B,d2,2024-01-01 00:00:00,2.0\n\
             A,d1,,4.0\n\
             A,d1,,5.0\n",
        )
        .unwrap();
        fs::write(tmp.path().join("missing_report.csv"), "column,missing_count\n").unwrap();

        let report = verify_processed_dir(tmp.path()).unwrap();
        assert_eq!(
            report,
            VerificationReport {
                files_checked: 2,
                issues: 0
            }
        );
    }

    #[test]
    fn test_broken_tables_are_flagged() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("02_wide_pm.csv"),
            "datetime,pm2_5_a\n\
             2024-01-01 00:00:00,1.0\n\
             2024-01-01 03:00:00,2.0\n\
             2024-01-01 03:00:00,2.0\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("01_long.csv"),
            "site_name,datetime,pm2_5\n\
             A,2024-01-01 00:00:00,1.0\n\
             A,2024-01-01 00:00:00,2.0\n",
        )
        .unwrap();

        let report = verify_processed_dir(tmp.path()).unwrap();
        // one duplicate timestamp and one gap; the repeated long pair is not an issue
        assert_eq!(report.issues, 2);
    }

    #[test]
    fn test_repeated_long_pairs_are_informational() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("01_long.csv"),
            "site_name,device_name,datetime,pm2_5\n\
             A,d1,2024-01-01 00:00:00,1.0\n\
             A,d1,2024-01-01 00:00:00,3.0\n\
             A,d1,2024-01-01 01:00:00,2.0\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("02_wide_pm.csv"),
            "datetime,pm2_5_a\n\
             2024-01-01 00:00:00,2.0\n\
             2024-01-01 01:00:00,2.0\n",
        )
        .unwrap();

        let report = verify_processed_dir(tmp.path()).unwrap();
        assert_eq!(
            report,
            VerificationReport {
                files_checked: 2,
                issues: 0
            }
        );
    }

    #[test]
    fn test_unsorted_index_is_detected() {
        let at = |h: u32| {
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        let checks = check_hourly_index(&[at(1), at(0), at(1)]);
        assert!(!checks.sorted);
        assert_eq!(checks.duplicates, 1);
    }
}
