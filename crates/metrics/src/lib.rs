//! Per-user engagement metrics and arm-level summaries.

pub mod aggregator;
pub mod summary;

pub use aggregator::UserMetricsAggregator;
pub use summary::{variant_summary, Moments, VariantSummaryRow};
