//! End-to-end batch run: events in, user table + summary + decision out.

use listen_core::{
    AnalysisConfig, ListenEvent, ListenResult, MetricKind, UserMetric, VariantAssigner,
};
use listen_metrics::{variant_summary, UserMetricsAggregator, VariantSummaryRow};
use listen_sessions::SessionBuilder;
use serde::Serialize;
use tracing::info;

use crate::decision::Decision;
use crate::engine::ExperimentDecisionEngine;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput {
    pub user_metrics: Vec<UserMetric>,
    pub variant_summary: Vec<VariantSummaryRow>,
    pub decision: Decision,
}

/// Run every stage over `events`. Configuration and event errors are fatal and
/// reported before any computation.
pub fn run_pipeline(
    events: &[ListenEvent],
    config: &AnalysisConfig,
) -> ListenResult<AnalysisOutput> {
    config.validate()?;
    let specs = config.metric_specs()?;
    for event in events {
        event.validate()?;
    }
    info!(
        experiment_id = %config.experiment.experiment_id,
        events = events.len(),
        "Starting analysis"
    );

    let assigner = VariantAssigner::new(&config.experiment);
    let assignments = assigner.assign_all(events.iter().map(|e| e.user_id.as_str()));

    let sessions = SessionBuilder::new(&config.sessions).build(events, &assignments);
    let user_metrics = UserMetricsAggregator::new(&config.engagement).aggregate(&sessions);

    let mut kinds: Vec<MetricKind> = Vec::with_capacity(specs.len());
    for spec in &specs {
        if !kinds.contains(&spec.kind) {
            kinds.push(spec.kind);
        }
    }
    let variant_summary = variant_summary(&user_metrics, &kinds);

    let decision = ExperimentDecisionEngine::new(&config.decision).analyze(
        &config.experiment,
        &specs,
        &user_metrics,
    )?;
    info!(
        experiment_id = %decision.experiment_id,
        analysis_id = %decision.analysis_id,
        verdict = decision.verdict(),
        "Analysis complete"
    );

    Ok(AnalysisOutput {
        user_metrics,
        variant_summary,
        decision,
    })
}
