//! Experiment analysis: statistical comparison of arms, ship/no-ship
//! decision rules and the end-to-end batch pipeline.

pub mod decision;
pub mod engine;
pub mod pipeline;
pub mod stats;

pub use decision::{CriterionResult, Decision, DecisionConfidence, MetricResult, MetricOutcome};
pub use engine::ExperimentDecisionEngine;
pub use pipeline::{run_pipeline, AnalysisOutput};
