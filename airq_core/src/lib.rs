pub mod config;
pub mod data_loader;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod reshaper;
pub mod site_identifier;
pub mod timestamps;

pub use config::{Aggregation, ParsePolicy, PipelineConfig};
pub use data_loader::{DataLoader, LoadReport};
pub use error::{PipelineError, Result};
pub use models::{CellValue, LongTable, Reading, WideColumn, WideTable};
pub use output::OutputLayout;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use reshaper::{reindex_hourly, Reshaper};
pub use site_identifier::{derive_site_ids, site_key};
