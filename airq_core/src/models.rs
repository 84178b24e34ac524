use crate::config::{Aggregation, DATETIME, DEVICE_NAME, SITE_ID};
use crate::error::{PipelineError, Result};
use crate::timestamps::{from_millis, parse_timestamp, to_millis};
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One raw sensor observation, extracted from the long table.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub site_key: Option<String>,
    pub device_name: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    /// One slot per configured measurement, in configuration order.
    pub values: Vec<Option<f64>>,
}

/// The merged long-format table: one row per reading, sorted by
/// `(site_name, datetime)` with nulls last.
#[derive(Debug, Clone)]
pub struct LongTable {
    frame: DataFrame,
}

impl LongTable {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    /// Extract typed readings; requires `site_id` to have been derived.
    pub fn readings(&self, measurements: &[String]) -> Result<Vec<Reading>> {
        let height = self.frame.height();

        let site_keys: Vec<Option<String>> = self
            .frame
            .column(SITE_ID)
            .map_err(|_| PipelineError::MissingColumn(SITE_ID.to_string()))?
            .utf8()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect();

        let devices: Vec<Option<String>> = match self.frame.column(DEVICE_NAME) {
            Ok(series) => series
                .cast(&DataType::Utf8)?
                .utf8()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect(),
            Err(_) => vec![None; height],
        };

        let datetimes = datetime_values(
            self.frame
                .column(DATETIME)
                .map_err(|_| PipelineError::MissingColumn(DATETIME.to_string()))?,
        )?;

        let mut value_columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(measurements.len());
        for measurement in measurements {
            let values = match self.frame.column(measurement) {
                Ok(series) => series
                    .cast(&DataType::Float64)?
                    .f64()?
                    .into_iter()
                    .map(|v| v.filter(|x| !x.is_nan()))
                    .collect(),
                Err(_) => vec![None; height],
            };
            value_columns.push(values);
        }

        let readings = (0..height)
            .map(|row| Reading {
                site_key: site_keys[row].clone(),
                device_name: devices[row].clone(),
                datetime: datetimes[row],
                values: value_columns.iter().map(|column| column[row]).collect(),
            })
            .collect();

        Ok(readings)
    }
}

/// Read a datetime column as naive timestamps, whatever its time unit.
pub fn datetime_values(series: &Series) -> Result<Vec<Option<NaiveDateTime>>> {
    let datetimes = series.datetime()?;
    let divisor = match datetimes.time_unit() {
        TimeUnit::Milliseconds => 1,
        TimeUnit::Microseconds => 1_000,
        TimeUnit::Nanoseconds => 1_000_000,
    };
    Ok(datetimes
        .into_iter()
        .map(|v| v.and_then(|raw| from_millis(raw.div_euclid(divisor))))
        .collect())
}

pub fn datetime_series(name: &str, values: &[Option<NaiveDateTime>]) -> Result<Series> {
    let millis: Vec<Option<i64>> = values.iter().map(|v| v.as_ref().map(to_millis)).collect();
    Ok(Series::new(name, millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Scalar(f64),
    List(Vec<f64>),
}

impl CellValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            CellValue::Scalar(v) => Some(*v),
            CellValue::List(_) => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            CellValue::Scalar(v) => v.to_string(),
            CellValue::List(values) => {
                let parts: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideColumn {
    pub name: String,
    pub measurement: String,
    pub site_key: String,
    pub cells: Vec<Option<CellValue>>,
}

/// Wide table: one row per timestamp, one column per (measurement, site).
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub index: Vec<NaiveDateTime>,
    pub columns: Vec<WideColumn>,
    pub aggregation: Aggregation,
}

impl WideTable {
    pub fn empty(aggregation: Aggregation) -> Self {
        Self {
            index: Vec::new(),
            columns: Vec::new(),
            aggregation,
        }
    }

    pub fn height(&self) -> usize {
        self.index.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&WideColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_missing(&self, row: usize, column: usize) -> bool {
        self.columns[column].cells[row].is_none()
    }

    /// Share of columns missing in `row`, as a percentage.
    pub fn row_missing_percent(&self, row: usize) -> Option<f64> {
        if self.columns.is_empty() {
            return None;
        }
        let missing = (0..self.width()).filter(|&c| self.is_missing(row, c)).count();
        Some(missing as f64 / self.width() as f64 * 100.0)
    }

    /// Rows `start..end` as a new table.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.height());
        let start = start.min(end);
        Self {
            index: self.index[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| WideColumn {
                    name: c.name.clone(),
                    measurement: c.measurement.clone(),
                    site_key: c.site_key.clone(),
                    cells: c.cells[start..end].to_vec(),
                })
                .collect(),
            aggregation: self.aggregation,
        }
    }

    /// Polars view with the timestamp as the first column.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let index: Vec<Option<NaiveDateTime>> = self.index.iter().copied().map(Some).collect();
        let mut series = vec![datetime_series(DATETIME, &index)?];

        for column in &self.columns {
            let s = match self.aggregation {
                Aggregation::Mean => {
                    let values: Vec<Option<f64>> = column
                        .cells
                        .iter()
                        .map(|cell| cell.as_ref().and_then(CellValue::as_scalar))
                        .collect();
                    Series::new(&column.name, values)
                }
                Aggregation::Collect => {
                    let values: Vec<Option<String>> = column
                        .cells
                        .iter()
                        .map(|cell| cell.as_ref().map(CellValue::render))
                        .collect();
                    Series::new(&column.name, values)
                }
            };
            series.push(s);
        }

        Ok(DataFrame::new(series)?)
    }

    /// Read a persisted mean-aggregated wide table back.
    pub fn read_csv(path: &Path, measurements: &[String]) -> Result<Self> {
        let df = CsvReader::from_path(path)?
            .has_header(true)
            .infer_schema(Some(0))
            .finish()?;

        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        match names.first() {
            Some(first) if first == DATETIME => {}
            _ => return Err(PipelineError::MissingColumn(DATETIME.to_string())),
        }

        let mut index = Vec::with_capacity(df.height());
        for raw in df.column(DATETIME)?.utf8()?.into_iter() {
            match raw.and_then(parse_timestamp) {
                Some(ts) => index.push(ts),
                None => {
                    return Err(PipelineError::Parse {
                        path: path.to_path_buf(),
                        reason: format!("unparseable index value {:?}", raw),
                    })
                }
            }
        }

        let mut columns = Vec::with_capacity(names.len().saturating_sub(1));
        for name in &names[1..] {
            let cells = df
                .column(name)?
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.map(CellValue::Scalar))
                .collect();
            let (measurement, site_key) = split_column_name(name, measurements);
            columns.push(WideColumn {
                name: name.clone(),
                measurement,
                site_key,
                cells,
            });
        }

        Ok(Self {
            index,
            columns,
            aggregation: Aggregation::Mean,
        })
    }
}

pub fn wide_column_name(measurement: &str, site_key: &str) -> String {
    format!("{}_{}", measurement, site_key)
}

/// Inverse of [`wide_column_name`], matching the longest known measurement prefix.
pub fn split_column_name(name: &str, measurements: &[String]) -> (String, String) {
    measurements
        .iter()
        .filter(|m| name.len() > m.len() + 1 && name.starts_with(m.as_str()))
        .filter(|m| name.as_bytes()[m.len()] == b'_')
        .max_by_key(|m| m.len())
        .map(|m| (m.clone(), name[m.len() + 1..].to_string()))
        .unwrap_or_else(|| (name.to_string(), String::new()))
}
