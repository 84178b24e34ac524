use crate::config::{DEVICE_NAME, SITE_ID, SITE_NAME, UNKNOWN_DEVICE};
use crate::error::{PipelineError, Result};
use crate::models::LongTable;
use log::info;
use polars::prelude::*;

/// Compact site key: text before the first comma, trimmed, lowercased,
/// spaces replaced with underscores.
pub fn site_key(site_name: &str) -> String {
    site_name
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

/// Returns a copy of `long` with a `site_id` column and no missing device names.
pub fn derive_site_ids(long: &LongTable) -> Result<LongTable> {
    let mut frame = long.frame().clone();
    let height = frame.height();

    let site_ids: Utf8Chunked = frame
        .column(SITE_NAME)
        .map_err(|_| PipelineError::MissingColumn(SITE_NAME.to_string()))?
        .utf8()?
        .into_iter()
        .map(|name| name.map(site_key))
        .collect();

    let devices: Utf8Chunked = match frame.column(DEVICE_NAME) {
        Ok(series) => series
            .cast(&DataType::Utf8)?
            .utf8()?
            .into_iter()
            .map(|device| Some(device.unwrap_or(UNKNOWN_DEVICE).to_string()))
            .collect(),
        Err(_) => (0..height).map(|_| Some(UNKNOWN_DEVICE)).collect(),
    };

    frame.with_column(site_ids.with_name(SITE_ID).into_series())?;
    frame.with_column(devices.with_name(DEVICE_NAME).into_series())?;

    let distinct = frame.column(SITE_ID)?.n_unique()?;
    info!("Derived {} distinct site ids from {} rows", distinct, height);

    Ok(LongTable::new(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> LongTable {
        let df = df!(
            "site_name" => &[Some("Nairobi, Kenya Roadside"), Some("SingleWordSite"), None, Some("  Kampala Central , Uganda")],
            "device_name" => &[Some("aq_01"), None, Some("aq_03"), None],
            "datetime" => &["2024-01-01", "2024-01-01", "2024-01-01", "2024-01-01"]
        )
        .unwrap();
        LongTable::new(df)
    }

    fn column_values(table: &LongTable, name: &str) -> Vec<Option<String>> {
        table
            .frame()
            .column(name)
            .unwrap()
            .utf8()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_site_key_normalisation() {
        assert_eq!(site_key("Nairobi, Kenya Roadside"), "nairobi");
        assert_eq!(site_key("SingleWordSite"), "singlewordsite");
        assert_eq!(site_key("  Kampala Central , Uganda"), "kampala_central");
        assert_eq!(site_key(""), "");
    }

    #[test]
    fn test_missing_site_name_propagates() {
        let identified = derive_site_ids(&sample_table()).unwrap();
        let ids = column_values(&identified, SITE_ID);
        assert_eq!(
            ids,
            vec![
                Some("nairobi".to_string()),
                Some("singlewordsite".to_string()),
                None,
                Some("kampala_central".to_string()),
            ]
        );
    }

    #[test]
    fn test_device_names_defaulted() {
        let identified = derive_site_ids(&sample_table()).unwrap();
        let devices = column_values(&identified, DEVICE_NAME);
        assert_eq!(devices[0].as_deref(), Some("aq_01"));
        assert_eq!(devices[1].as_deref(), Some(UNKNOWN_DEVICE));
        assert_eq!(devices[3].as_deref(), Some(UNKNOWN_DEVICE));
    }

    #[test]
    fn test_absent_device_column_is_created() {
        let df = df!("site_name" => &["A, b"], "datetime" => &["2024-01-01"]).unwrap();
        let identified = derive_site_ids(&LongTable::new(df)).unwrap();
        let devices = column_values(&identified, DEVICE_NAME);
        assert_eq!(devices, vec![Some(UNKNOWN_DEVICE.to_string())]);
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let once = derive_site_ids(&sample_table()).unwrap();
        let twice = derive_site_ids(&once).unwrap();
        assert_eq!(column_values(&once, SITE_ID), column_values(&twice, SITE_ID));
        assert_eq!(once.width(), twice.width());
    }
}
