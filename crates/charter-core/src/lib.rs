//! Charter Core - chart types shared by the resolution and release crates
//!
//! This crate provides:
//! - `ChartMetadata`: the `Chart.yaml` definition, including declared dependencies
//! - `LoadedChart`: a chart and its subcharts loaded from a directory or archive
//! - `ChartLoader`: the loading capability consumed by the release workflow
//! - `Values`: configuration values with deep merge support

pub mod archive;
pub mod chart;
pub mod error;
pub mod loader;
pub mod mock;
pub mod values;

pub use archive::{ChartFiles, is_chart_archive, read_archive, write_archive};
pub use chart::{APPLICATION_CHART_TYPE, CHARTS_DIR, ChartMetadata, Dependency};
pub use error::{CoreError, Result};
pub use loader::{ChartFile, ChartLoader, FsChartLoader, LoadedChart, read_chart_dir};
pub use mock::MockChartLoader;
pub use values::Values;
