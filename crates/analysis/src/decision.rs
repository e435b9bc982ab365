//! Decision record handed to the dashboard and export consumers.

use chrono::NaiveDate;
use listen_core::config::TTestKind;
use listen_core::{Direction, ListenResult, MetricKind, MetricRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stats::EffectSize;

/// Descriptive statistics of one arm for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub n: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub std_error: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricOutcome {
    Conclusive,
    Inconclusive { reason: String },
}

impl MetricOutcome {
    pub fn is_conclusive(&self) -> bool {
        matches!(self, MetricOutcome::Conclusive)
    }
}

/// Control-vs-variant comparison of a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Canonical column name, shared with the variant summary table.
    pub metric_name: String,
    /// Name as written in the experiment configuration, possibly an alias.
    pub configured_name: String,
    pub kind: MetricKind,
    pub role: MetricRole,
    pub direction: Direction,
    pub alpha: f64,
    pub control: ArmStats,
    pub variant: ArmStats,
    /// `variant_mean - control_mean`.
    pub absolute_lift: Option<f64>,
    /// `(variant_mean - control_mean) / control_mean`; `None` on a zero baseline.
    pub relative_lift: Option<f64>,
    pub t_test: TTestKind,
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: Option<f64>,
    pub cohens_d: Option<f64>,
    pub effect_size: Option<EffectSize>,
    pub confidence_level: f64,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub minimum_detectable_effect: Option<f64>,
    pub is_significant: bool,
    pub meets_threshold: bool,
    pub is_degraded: bool,
    pub outcome: MetricOutcome,
}

impl MetricResult {
    pub fn is_primary(&self) -> bool {
        self.role == MetricRole::Primary
    }

    /// Relative lift signed so that positive means the variant is better.
    pub fn favorable_lift(&self) -> Option<f64> {
        self.relative_lift.map(|lift| lift * self.direction.sign())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionConfidence {
    High,
    Medium,
}

/// Outcome of one decision criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion: String,
    pub metric_name: String,
    pub passed: bool,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Derived from the experiment id and the input fingerprint.
    pub analysis_id: Uuid,
    pub experiment_id: String,
    pub experiment_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub control_allocation: f64,
    /// SHA-256 over the user metric table.
    pub input_digest: String,
    pub control_users: usize,
    pub variant_users: usize,
    pub ship: bool,
    pub confidence: DecisionConfidence,
    pub primary_metric: String,
    pub primary_metric_lift: Option<f64>,
    pub primary_metric_p_value: Option<f64>,
    pub degraded_guardrails: Vec<String>,
    pub inconclusive_metrics: Vec<String>,
    pub metrics: Vec<MetricResult>,
    pub criteria: Vec<CriterionResult>,
    pub reasoning: Vec<String>,
}

impl Decision {
    pub fn verdict(&self) -> &'static str {
        if self.ship {
            "SHIP"
        } else {
            "DON'T SHIP"
        }
    }

    /// Look up a metric by canonical or configured name.
    pub fn metric(&self, name: &str) -> Option<&MetricResult> {
        self.metrics
            .iter()
            .find(|m| m.metric_name == name || m.configured_name == name)
    }

    pub fn to_json(&self) -> ListenResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
