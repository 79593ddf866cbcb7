pub mod cache;
pub mod metrics;
pub mod series;

pub use cache::TimeSeriesCache;
pub use metrics::MetricsRecord;
pub use series::CandleSeries;
