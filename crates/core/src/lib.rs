pub mod assignment;
pub mod config;
pub mod error;
pub mod metric;
pub mod types;

pub use assignment::VariantAssigner;
pub use config::AnalysisConfig;
pub use error::{ListenError, ListenResult};
pub use metric::{Direction, MetricKind, MetricRole, MetricSpec};
pub use types::{ListenEvent, Session, UserMetric, Variant, VariantAssignment};
