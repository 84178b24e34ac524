//! Descriptive statistics, missing-data accounting and duplicate detection.
//!
//! Everything here reads a finished table and produces a summary; nothing
//! writes back into the tables it inspects.

use crate::config::Aggregation;
use crate::error::{PipelineError, Result};
use crate::models::WideTable;
use crate::timestamps::{format_step, month_end, month_ends_between, quarter_of};
use chrono::{NaiveDate, NaiveDateTime};
use log::{info, warn};
use polars::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Description {
    pub rows: usize,
    pub columns: usize,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub span_hours: Option<i64>,
    /// `None` when the timeline is too short or irregular to call.
    pub inferred_frequency: Option<String>,
    pub rows_with_missing: usize,
    pub rows_per_month: Vec<(NaiveDate, usize)>,
    pub stats: Vec<ColumnStats>,
}

impl Description {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

pub fn describe(wide: &WideTable) -> Description {
    let start = wide.index.first().copied();
    let end = wide.index.last().copied();
    let span_hours = start.zip(end).map(|(s, e)| (e - s).num_hours());

    let rows_with_missing = rows_with_missing(wide);

    let mut per_month: Vec<(NaiveDate, usize)> = Vec::new();
    for ts in &wide.index {
        let label = month_end(ts.date());
        match per_month.last_mut() {
            Some((month, count)) if *month == label => *count += 1,
            _ => per_month.push((label, 1)),
        }
    }

    let stats = match wide.aggregation {
        Aggregation::Mean => wide
            .columns
            .iter()
            .map(|column| {
                let values: Vec<f64> = column
                    .cells
                    .iter()
                    .filter_map(|cell| cell.as_ref().and_then(|c| c.as_scalar()))
                    .collect();
                column_stats(&column.name, values)
            })
            .collect(),
        Aggregation::Collect => Vec::new(),
    };

    Description {
        rows: wide.height(),
        columns: wide.width(),
        start,
        end,
        span_hours,
        inferred_frequency: infer_frequency(&wide.index),
        rows_with_missing,
        rows_per_month: per_month,
        stats,
    }
}

fn rows_with_missing(wide: &WideTable) -> usize {
    (0..wide.height())
        .filter(|&row| (0..wide.width()).any(|c| wide.is_missing(row, c)))
        .count()
}

fn column_stats(name: &str, mut values: Vec<f64>) -> ColumnStats {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let count = values.len();
    let mean = (count > 0).then(|| values.iter().sum::<f64>() / count as f64);
    let std = mean.filter(|_| count > 1).map(|m| {
        let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    });

    ColumnStats {
        column: name.to_string(),
        count,
        mean,
        std,
        min: values.first().copied(),
        q25: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        q75: quantile(&values, 0.75),
        max: values.last().copied(),
    }
}

/// Linear-interpolated quantile of already sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// A single constant positive step across at least three timestamps.
pub fn infer_frequency(index: &[NaiveDateTime]) -> Option<String> {
    if index.len() < 3 {
        return None;
    }
    let step = index[1] - index[0];
    if step <= chrono::Duration::zero() {
        return None;
    }
    index
        .windows(2)
        .all(|w| w[1] - w[0] == step)
        .then(|| format_step(step))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MissingEntry {
    pub column: String,
    pub missing_count: usize,
    pub present_count: usize,
    /// `None` when the table has no rows.
    pub missing_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingReport {
    pub total_rows: usize,
    pub rows_with_missing: usize,
    /// Only columns with at least one missing cell, highest percentage first.
    pub entries: Vec<MissingEntry>,
}

/// Missing and present counts for every column.
pub fn missing_counts(wide: &WideTable) -> Vec<MissingEntry> {
    let total = wide.height();
    wide.columns
        .iter()
        .map(|column| {
            let missing = column.cells.iter().filter(|c| c.is_none()).count();
            MissingEntry {
                column: column.name.clone(),
                missing_count: missing,
                present_count: total - missing,
                missing_percent: percent(missing, total),
            }
        })
        .collect()
}

pub fn missing_report(wide: &WideTable) -> MissingReport {
    let mut entries: Vec<MissingEntry> = missing_counts(wide)
        .into_iter()
        .filter(|e| e.missing_count > 0)
        .collect();
    entries.sort_by(|a, b| {
        b.missing_percent
            .partial_cmp(&a.missing_percent)
            .unwrap_or(Ordering::Equal)
    });

    let rows_with_missing = rows_with_missing(wide);

    MissingReport {
        total_rows: wide.height(),
        rows_with_missing,
        entries,
    }
}

impl MissingReport {
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["column", "missing_count", "missing_percent"])?;
        for entry in &self.entries {
            writer.write_record([
                entry.column.clone(),
                entry.missing_count.to_string(),
                format_optional(entry.missing_percent),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn percent(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthBucket {
    /// Month label: the last calendar day of the month.
    pub month_end: NaiveDate,
    pub total_rows: usize,
    /// Missing cells per column, aligned with `MonthlyMissing::columns`.
    pub missing: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyMissing {
    pub columns: Vec<String>,
    pub column_sites: Vec<String>,
    pub months: Vec<MonthBucket>,
}

/// Per calendar month (labelled by month end): rows present and missing
/// cells per column. Months with no rows still appear, with zero totals.
pub fn monthly_missing(wide: &WideTable) -> MonthlyMissing {
    let columns: Vec<String> = wide.columns.iter().map(|c| c.name.clone()).collect();
    let column_sites: Vec<String> = wide.columns.iter().map(|c| c.site_key.clone()).collect();

    let (Some(first), Some(last)) = (wide.index.first(), wide.index.last()) else {
        return MonthlyMissing {
            columns,
            column_sites,
            months: Vec::new(),
        };
    };

    let mut months: Vec<MonthBucket> = month_ends_between(first.date(), last.date())
        .into_iter()
        .map(|month_end| MonthBucket {
            month_end,
            total_rows: 0,
            missing: vec![0; wide.width()],
        })
        .collect();
    let slot: HashMap<NaiveDate, usize> = months
        .iter()
        .enumerate()
        .map(|(i, m)| (m.month_end, i))
        .collect();

    for (row, ts) in wide.index.iter().enumerate() {
        let Some(&i) = slot.get(&month_end(ts.date())) else {
            continue;
        };
        months[i].total_rows += 1;
        for c in 0..wide.width() {
            if wide.is_missing(row, c) {
                months[i].missing[c] += 1;
            }
        }
    }

    MonthlyMissing {
        columns,
        column_sites,
        months,
    }
}

impl MonthlyMissing {
    /// Missing percentage of one column in one month; `None` for empty months.
    pub fn percent(&self, month: usize, column: usize) -> Option<f64> {
        let bucket = &self.months[month];
        percent(bucket.missing[column], bucket.total_rows)
    }

    /// All of a site's columns pooled together.
    pub fn site_percent(&self, month: usize, site: &str) -> Option<f64> {
        let bucket = &self.months[month];
        let site_columns: Vec<usize> = (0..self.columns.len())
            .filter(|&c| self.column_sites[c] == site)
            .collect();
        let missing: usize = site_columns.iter().map(|&c| bucket.missing[c]).sum();
        percent(missing, bucket.total_rows * site_columns.len())
    }

    pub fn sites(&self) -> Vec<String> {
        let mut sites: Vec<String> = Vec::new();
        for site in &self.column_sites {
            if !sites.contains(site) {
                sites.push(site.clone());
            }
        }
        sites
    }

    pub fn write_counts_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["month_end".to_string(), "total_rows".to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for bucket in &self.months {
            let mut record = vec![bucket.month_end.to_string(), bucket.total_rows.to_string()];
            record.extend(bucket.missing.iter().map(|m| m.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_percent_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["month_end".to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for (m, bucket) in self.months.iter().enumerate() {
            let mut record = vec![bucket.month_end.to_string()];
            record.extend((0..self.columns.len()).map(|c| format_optional(self.percent(m, c))));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QuarterSlice {
    pub year: i32,
    pub quarter: u32,
    pub table: WideTable,
}

impl QuarterSlice {
    pub fn label(&self) -> String {
        format!("Q{} {}", self.quarter, self.year)
    }

    pub fn file_tag(&self) -> String {
        format!("Q{}_{}", self.quarter, self.year)
    }
}

/// Consecutive calendar-quarter slices (January anchored) of a sorted table.
pub fn quarters(wide: &WideTable) -> Vec<QuarterSlice> {
    let mut slices = Vec::new();
    let mut start = 0;
    while start < wide.height() {
        let key = quarter_of(&wide.index[start]);
        let mut end = start + 1;
        while end < wide.height() && quarter_of(&wide.index[end]) == key {
            end += 1;
        }
        slices.push(QuarterSlice {
            year: key.0,
            quarter: key.1,
            table: wide.slice(start, end),
        });
        start = end;
    }
    slices
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub key: Vec<Option<String>>,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateSummary {
    pub subset: Vec<String>,
    /// Every member of every duplicate group is counted.
    pub duplicate_rows: usize,
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateSummary {
    pub fn row_indices(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.groups.iter().flat_map(|g| g.rows.iter().copied()).collect();
        rows.sort_unstable();
        rows
    }

    /// The duplicated rows of `df`, in table order.
    pub fn rows_of(&self, df: &DataFrame) -> Result<DataFrame> {
        let idx: Vec<IdxSize> = self.row_indices().into_iter().map(|i| i as IdxSize).collect();
        Ok(df.take(&IdxCa::from_vec("idx", idx))?)
    }
}

fn resolve_subset(df: &DataFrame, subset: Option<&[String]>) -> Result<Vec<String>> {
    match subset {
        Some(columns) => {
            for name in columns {
                if df.column(name).is_err() {
                    return Err(PipelineError::MissingColumn(name.clone()));
                }
            }
            Ok(columns.to_vec())
        }
        None => Ok(df.get_column_names().iter().map(|s| s.to_string()).collect()),
    }
}

const ROW_NR: &str = "__row_nr";

/// Rows that repeat under `subset` (all columns when `None`). Nulls compare equal.
pub fn duplicate_check(df: &DataFrame, subset: Option<&[String]>) -> Result<DuplicateSummary> {
    let names = resolve_subset(df, subset)?;
    let keyed = df.select(&names)?;

    let mask = keyed.is_duplicated()?;
    let duplicate_rows = keyed.filter(&mask)?.height();

    let key_exprs: Vec<Expr> = names.iter().map(|n| col(n)).collect();
    let grouped = keyed
        .with_row_count(ROW_NR, None)?
        .lazy()
        .group_by_stable(key_exprs)
        .agg([col(ROW_NR)])
        .filter(col(ROW_NR).list().lengths().gt(lit(1)))
        .collect()?;

    let mut key_columns = Vec::with_capacity(names.len());
    for name in &names {
        key_columns.push(grouped.column(name)?.to_physical_repr().cast(&DataType::Utf8)?);
    }

    let mut groups = Vec::with_capacity(grouped.height());
    for (g, members) in grouped.column(ROW_NR)?.list()?.into_iter().enumerate() {
        let rows: Vec<usize> = match members {
            Some(series) => series.idx()?.into_no_null_iter().map(|i| i as usize).collect(),
            None => continue,
        };
        let mut key = Vec::with_capacity(key_columns.len());
        for column in &key_columns {
            key.push(column.utf8()?.get(g).map(str::to_string));
        }
        groups.push(DuplicateGroup { key, rows });
    }
    groups.sort_by_key(|group| group.rows.first().copied());

    if duplicate_rows > 0 {
        warn!(
            "Number of duplicate rows: {} in {} groups",
            duplicate_rows,
            groups.len()
        );
    } else {
        info!("No duplicate rows found");
    }

    Ok(DuplicateSummary {
        subset: names,
        duplicate_rows,
        groups,
    })
}

/// Drop repeated rows, keeping the first occurrence; returns the number removed.
pub fn remove_duplicates(df: &DataFrame, subset: Option<&[String]>) -> Result<(DataFrame, usize)> {
    let names = resolve_subset(df, subset)?;
    let cleaned = df.unique_stable(Some(names.as_slice()), UniqueKeepStrategy::First, None)?;
    let removed = df.height() - cleaned.height();
    info!("Removed {} duplicate rows", removed);
    Ok((cleaned, removed))
}
