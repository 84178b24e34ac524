use crate::config::{Aggregation, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::models::{wide_column_name, CellValue, LongTable, Reading, WideColumn, WideTable};
use crate::timestamps::floor_hour;
use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};

pub struct Reshaper {
    measurements: Vec<String>,
    aggregation: Aggregation,
}

impl Reshaper {
    pub fn new(measurements: Vec<String>, aggregation: Aggregation) -> Self {
        Self {
            measurements,
            aggregation,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.measurements.clone(), config.aggregation)
    }

    /// Pivot then reindex onto the full hourly grid.
    pub fn reshape(&self, long: &LongTable) -> Result<WideTable> {
        let readings = long.readings(&self.measurements)?;
        let pivoted = self.pivot(&readings)?;
        let wide = reindex_hourly(&pivoted);
        info!(
            "Pivoted DataFrame shape: ({}, {}); after hourly reindex: ({}, {})",
            pivoted.height(),
            pivoted.width(),
            wide.height(),
            wide.width()
        );
        Ok(wide)
    }

    /// Group readings by (hour, site) and aggregate each measurement.
    ///
    /// Columns are ordered by measurement block, then by site key. Readings
    /// without a timestamp or site key have no place in the grid and are dropped.
    pub fn pivot(&self, readings: &[Reading]) -> Result<WideTable> {
        let n_measurements = self.measurements.len();
        let mut hours: BTreeSet<NaiveDateTime> = BTreeSet::new();
        let mut sites: BTreeSet<&str> = BTreeSet::new();
        let mut samples: HashMap<(NaiveDateTime, &str), Vec<Vec<f64>>> = HashMap::new();
        let mut unplaced = 0usize;

        for reading in readings {
            let (Some(ts), Some(site)) = (reading.datetime.as_ref(), reading.site_key.as_deref())
            else {
                unplaced += 1;
                continue;
            };

            let hour = floor_hour(ts);
            hours.insert(hour);
            sites.insert(site);

            let group = samples
                .entry((hour, site))
                .or_insert_with(|| vec![Vec::new(); n_measurements]);
            for (slot, value) in group.iter_mut().zip(&reading.values) {
                if let Some(v) = value.filter(|v| !v.is_nan()) {
                    slot.push(v);
                }
            }
        }

        if unplaced > 0 {
            warn!(
                "{} readings without a timestamp or site id were left out of the pivot",
                unplaced
            );
        }

        let index: Vec<NaiveDateTime> = hours.into_iter().collect();
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut columns = Vec::with_capacity(n_measurements * sites.len());

        for (m, measurement) in self.measurements.iter().enumerate() {
            for site in &sites {
                let name = wide_column_name(measurement, site);
                if !seen_names.insert(name.clone()) {
                    return Err(PipelineError::ColumnCollision(name));
                }

                let cells = index
                    .iter()
                    .map(|hour| {
                        samples
                            .get(&(*hour, *site))
                            .and_then(|group| self.aggregate(&group[m]))
                    })
                    .collect();

                columns.push(WideColumn {
                    name,
                    measurement: measurement.clone(),
                    site_key: site.to_string(),
                    cells,
                });
            }
        }

        Ok(WideTable {
            index,
            columns,
            aggregation: self.aggregation,
        })
    }

    fn aggregate(&self, values: &[f64]) -> Option<CellValue> {
        if values.is_empty() {
            return None;
        }
        match self.aggregation {
            Aggregation::Mean => Some(CellValue::Scalar(
                values.iter().sum::<f64>() / values.len() as f64,
            )),
            Aggregation::Collect => Some(CellValue::List(values.to_vec())),
        }
    }
}

/// Every hour from the first (floored) to the last timestamp, exactly once.
/// Hours with no source row get missing cells; index values off the hour
/// grid are dropped.
pub fn reindex_hourly(wide: &WideTable) -> WideTable {
    let (Some(first), Some(last)) = (wide.index.iter().min(), wide.index.iter().max()) else {
        return WideTable {
            index: Vec::new(),
            columns: wide
                .columns
                .iter()
                .map(|c| WideColumn {
                    cells: Vec::new(),
                    ..c.clone()
                })
                .collect(),
            aggregation: wide.aggregation,
        };
    };

    let mut grid = Vec::new();
    let mut current = floor_hour(first);
    while current <= *last {
        grid.push(current);
        current += Duration::hours(1);
    }

    let positions: HashMap<NaiveDateTime, usize> = wide
        .index
        .iter()
        .enumerate()
        .map(|(i, ts)| (*ts, i))
        .collect();

    let columns = wide
        .columns
        .iter()
        .map(|column| WideColumn {
            name: column.name.clone(),
            measurement: column.measurement.clone(),
            site_key: column.site_key.clone(),
            cells: grid
                .iter()
                .map(|ts| positions.get(ts).and_then(|&i| column.cells[i].clone()))
                .collect(),
        })
        .collect();

    WideTable {
        index: grid,
        columns,
        aggregation: wide.aggregation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn reading(site: &str, ts: NaiveDateTime, pm25: Option<f64>) -> Reading {
        Reading {
            site_key: Some(site.to_string()),
            device_name: Some("dev".to_string()),
            datetime: Some(ts),
            values: vec![pm25, pm25.map(|v| v * 2.0)],
        }
    }

    fn reshaper(aggregation: Aggregation) -> Reshaper {
        Reshaper::new(vec!["pm2_5".to_string(), "pm10".to_string()], aggregation)
    }

    #[test]
    fn test_duplicate_hour_is_averaged() {
        let readings = vec![
            reading("nairobi", at(1, 0, 0), Some(10.0)),
            reading("nairobi", at(1, 0, 0), Some(20.0)),
        ];
        let wide = reshaper(Aggregation::Mean).pivot(&readings).unwrap();
        let cell = &wide.column("pm2_5_nairobi").unwrap().cells[0];
        assert_eq!(cell, &Some(CellValue::Scalar(15.0)));
    }

    #[test]
    fn test_missing_values_are_ignored_and_all_missing_stays_missing() {
        let readings = vec![
            reading("a", at(1, 0, 0), Some(10.0)),
            reading("a", at(1, 0, 30), None),
            reading("b", at(1, 0, 0), None),
        ];
        let wide = reshaper(Aggregation::Mean).pivot(&readings).unwrap();
        assert_eq!(
            wide.column("pm2_5_a").unwrap().cells[0],
            Some(CellValue::Scalar(10.0))
        );
        assert_eq!(wide.column("pm2_5_b").unwrap().cells[0], None);
    }

    #[test]
    fn test_collect_policy_keeps_values() {
        let readings = vec![
            reading("a", at(1, 3, 0), Some(1.0)),
            reading("a", at(1, 3, 15), Some(2.0)),
        ];
        let wide = reshaper(Aggregation::Collect).pivot(&readings).unwrap();
        assert_eq!(
            wide.column("pm2_5_a").unwrap().cells[0],
            Some(CellValue::List(vec![1.0, 2.0]))
        );
        assert_eq!(wide.aggregation, Aggregation::Collect);
    }

    #[test]
    fn test_column_order_is_measurement_then_site() {
        let readings = vec![
            reading("zeta", at(1, 0, 0), Some(1.0)),
            reading("alpha", at(1, 0, 0), Some(1.0)),
        ];
        let wide = reshaper(Aggregation::Mean).pivot(&readings).unwrap();
        assert_eq!(
            wide.column_names(),
            vec!["pm2_5_alpha", "pm2_5_zeta", "pm10_alpha", "pm10_zeta"]
        );
    }

    #[test]
    fn test_unplaceable_readings_are_dropped() {
        let mut orphan = reading("a", at(1, 0, 0), Some(5.0));
        orphan.site_key = None;
        let mut undated = reading("a", at(1, 0, 0), Some(5.0));
        undated.datetime = None;

        let wide = reshaper(Aggregation::Mean)
            .pivot(&[orphan, undated, reading("a", at(1, 1, 0), Some(1.0))])
            .unwrap();
        assert_eq!(wide.height(), 1);
        assert_eq!(wide.index[0], at(1, 1, 0));
    }

    #[test]
    fn test_colliding_names_are_rejected() {
        let reshaper = Reshaper::new(
            vec!["pm".to_string(), "pm_x".to_string()],
            Aggregation::Mean,
        );
        let readings = vec![
            Reading {
                site_key: Some("x_y".to_string()),
                device_name: None,
                datetime: Some(at(1, 0, 0)),
                values: vec![Some(1.0), Some(1.0)],
            },
            Reading {
                site_key: Some("y".to_string()),
                device_name: None,
                datetime: Some(at(1, 0, 0)),
                values: vec![Some(1.0), Some(1.0)],
            },
        ];
        assert!(matches!(
            reshaper.pivot(&readings),
            Err(PipelineError::ColumnCollision(name)) if name == "pm_x_y"
        ));
    }

    #[test]
    fn test_reindex_fills_every_hour_once() {
        let readings = vec![
            reading("a", at(1, 22, 0), Some(1.0)),
            reading("b", at(2, 3, 40), Some(2.0)),
            reading("a", at(2, 1, 0), Some(3.0)),
        ];
        let pivoted = reshaper(Aggregation::Mean).pivot(&readings).unwrap();
        let wide = reindex_hourly(&pivoted);

        // 22:00 on day 1 through 03:00 on day 2.
        assert_eq!(wide.height(), 6);
        assert_eq!(wide.index.first(), Some(&at(1, 22, 0)));
        assert_eq!(wide.index.last(), Some(&at(2, 3, 0)));
        assert!(wide
            .index
            .windows(2)
            .all(|w| w[1] - w[0] == Duration::hours(1)));

        let a = wide.column("pm2_5_a").unwrap();
        assert_eq!(a.cells[0], Some(CellValue::Scalar(1.0)));
        assert_eq!(a.cells[1], None);
        assert_eq!(a.cells[3], Some(CellValue::Scalar(3.0)));
        assert!(wide.columns.iter().all(|c| c.cells.len() == wide.height()));
    }

    #[test]
    fn test_reindex_of_empty_table() {
        let wide = reindex_hourly(&WideTable::empty(Aggregation::Mean));
        assert!(wide.is_empty());
    }
}
