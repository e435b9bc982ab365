//! Control-vs-variant comparison and ship/no-ship rules.
//!
//! A metric is compared with a two-sample t-test (Welch by default), Cohen's d
//! on the pooled standard deviation and a t-interval on the mean difference.
//! The primary metric must improve by more than `min_primary_lift` at
//! `primary_alpha`; any guardrail that worsens by more than
//! `max_guardrail_degradation` at the looser `guardrail_alpha` blocks the
//! ship. A metric that cannot be tested is inconclusive and also blocks it.

use listen_core::config::{DecisionConfig, ExperimentConfig};
use listen_core::{ListenResult, MetricRole, MetricSpec, UserMetric, Variant};
use listen_metrics::summary::arm_values;
use listen_metrics::Moments;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::decision::{
    ArmStats, CriterionResult, Decision, DecisionConfidence, MetricOutcome, MetricResult,
};
use crate::stats::{self, format_p_value, EffectSize};

pub struct ExperimentDecisionEngine {
    config: DecisionConfig,
}

impl ExperimentDecisionEngine {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Evaluate every metric over the user table and combine them into a decision.
    pub fn analyze(
        &self,
        experiment: &ExperimentConfig,
        specs: &[MetricSpec],
        rows: &[UserMetric],
    ) -> ListenResult<Decision> {
        let input_digest = fingerprint(rows)?;
        let results = specs
            .iter()
            .map(|spec| self.evaluate_rows(spec, rows))
            .collect::<ListenResult<Vec<_>>>()?;

        let control_users = rows.iter().filter(|r| r.variant == Variant::Control).count();
        let variant_users = rows.len() - control_users;
        info!(
            experiment_id = %experiment.experiment_id,
            control_users,
            variant_users,
            metrics = results.len(),
            "Metrics evaluated"
        );
        Ok(self.decide(experiment, results, input_digest, control_users, variant_users))
    }

    pub fn evaluate_rows(
        &self,
        spec: &MetricSpec,
        rows: &[UserMetric],
    ) -> ListenResult<MetricResult> {
        let control = Moments::from_values(&arm_values(rows, Variant::Control, spec.kind));
        let variant = Moments::from_values(&arm_values(rows, Variant::VariantB, spec.kind));
        self.evaluate_metric(spec, &control, &variant)
    }

    /// Compare one metric given the arm summaries.
    ///
    /// One flat arm is still testable: the Welch standard error comes from the
    /// other arm alone. Only when both arms are flat is there no test
    /// statistic, and the metric is then inconclusive.
    pub fn evaluate_metric(
        &self,
        spec: &MetricSpec,
        control: &Moments,
        variant: &Moments,
    ) -> ListenResult<MetricResult> {
        let c = &self.config;
        let both_present = control.n > 0 && variant.n > 0;

        let absolute_lift = both_present.then(|| variant.mean - control.mean);
        let relative_lift = (both_present && control.mean != 0.0)
            .then(|| (variant.mean - control.mean) / control.mean);

        let test = stats::t_test(control, variant, c.t_test)?;
        let interval = match &test {
            Some(t) => Some(stats::difference_interval(
                control,
                variant,
                t,
                c.confidence_level,
            )?),
            None => None,
        };
        let cohens_d = stats::cohens_d(control, variant).filter(|_| both_present);

        let outcome = if !both_present {
            MetricOutcome::Inconclusive {
                reason: format!(
                    "empty arm (control n = {}, variant n = {})",
                    control.n, variant.n
                ),
            }
        } else if control.n < c.min_arm_size || variant.n < c.min_arm_size {
            MetricOutcome::Inconclusive {
                reason: format!(
                    "insufficient sample (control n = {}, variant n = {}, minimum {})",
                    control.n, variant.n, c.min_arm_size
                ),
            }
        } else if test.is_none() {
            MetricOutcome::Inconclusive {
                reason: "zero variance in both arms, no test statistic".to_string(),
            }
        } else if relative_lift.is_none() {
            MetricOutcome::Inconclusive {
                reason: "control mean is zero, relative lift is undefined".to_string(),
            }
        } else {
            MetricOutcome::Conclusive
        };

        let conclusive = outcome.is_conclusive();
        let p_value = test.map(|t| t.p_value);
        let is_significant = conclusive && p_value.is_some_and(|p| p < spec.alpha);
        let favorable = relative_lift.map(|lift| lift * spec.direction.sign());
        let (meets_threshold, is_degraded) = match spec.role {
            MetricRole::Primary => (favorable.is_some_and(|f| f > c.min_primary_lift), false),
            MetricRole::Guardrail => {
                let beyond_tolerance =
                    favorable.is_some_and(|f| f < -c.max_guardrail_degradation);
                (!beyond_tolerance, is_significant && beyond_tolerance)
            }
        };

        if let MetricOutcome::Inconclusive { reason } = &outcome {
            metrics::counter!("decision.inconclusive_metrics").increment(1);
            warn!(metric = %spec.name, reason = %reason, "Metric inconclusive");
        } else {
            debug!(
                metric = %spec.name,
                relative_lift = relative_lift.unwrap_or_default(),
                p_value = p_value.unwrap_or(1.0),
                is_significant,
                is_degraded,
                "Metric evaluated"
            );
        }

        Ok(MetricResult {
            metric_name: spec.kind.as_str().to_string(),
            configured_name: spec.name.clone(),
            kind: spec.kind,
            role: spec.role,
            direction: spec.direction,
            alpha: spec.alpha,
            control: self.arm_stats(control)?,
            variant: self.arm_stats(variant)?,
            absolute_lift,
            relative_lift,
            t_test: c.t_test,
            t_statistic: test.map(|t| t.t_statistic),
            degrees_of_freedom: test.map(|t| t.degrees_of_freedom),
            p_value,
            cohens_d,
            effect_size: cohens_d.map(EffectSize::from_d),
            confidence_level: c.confidence_level,
            ci_lower: interval.map(|(lo, _)| lo),
            ci_upper: interval.map(|(_, hi)| hi),
            minimum_detectable_effect: stats::minimum_detectable_effect(
                control, spec.alpha, c.power,
            )?,
            is_significant,
            meets_threshold,
            is_degraded,
            outcome,
        })
    }

    fn arm_stats(&self, arm: &Moments) -> ListenResult<ArmStats> {
        let interval = stats::mean_interval(arm, self.config.confidence_level)?;
        Ok(ArmStats {
            n: arm.n,
            mean: (arm.n > 0).then_some(arm.mean),
            std_dev: (arm.n > 1).then_some(arm.std_dev),
            std_error: (arm.n > 1).then(|| arm.std_error()),
            ci_lower: interval.map(|(lo, _)| lo),
            ci_upper: interval.map(|(_, hi)| hi),
        })
    }

    /// Apply the ship rules to evaluated metrics.
    pub fn decide(
        &self,
        experiment: &ExperimentConfig,
        results: Vec<MetricResult>,
        input_digest: String,
        control_users: usize,
        variant_users: usize,
    ) -> Decision {
        let c = &self.config;
        let mut criteria = Vec::new();

        let inconclusive: Vec<&MetricResult> =
            results.iter().filter(|r| !r.outcome.is_conclusive()).collect();
        for result in &inconclusive {
            if let MetricOutcome::Inconclusive { reason } = &result.outcome {
                criteria.push(CriterionResult {
                    criterion: "metric_conclusive".to_string(),
                    metric_name: result.metric_name.clone(),
                    passed: false,
                    reasoning: format!("{} is inconclusive: {}", result.metric_name, reason),
                });
            }
        }

        let primary = results.iter().find(|r| r.is_primary());
        let primary_lift = primary.and_then(|p| p.favorable_lift());
        let mut primary_success = false;
        if let Some(p) = primary.filter(|p| p.outcome.is_conclusive()) {
            let lift = primary_lift.unwrap_or_default();
            let p_value = p.p_value.unwrap_or(1.0);
            criteria.push(CriterionResult {
                criterion: "primary_significance".to_string(),
                metric_name: p.metric_name.clone(),
                passed: p.is_significant,
                reasoning: format!(
                    "p = {} against threshold {}",
                    format_p_value(p_value),
                    p.alpha
                ),
            });
            criteria.push(CriterionResult {
                criterion: "primary_direction".to_string(),
                metric_name: p.metric_name.clone(),
                passed: lift > 0.0,
                reasoning: format!(
                    "{} moved {} ({:+.2}% relative)",
                    p.metric_name,
                    if lift > 0.0 { "favorably" } else { "unfavorably" },
                    lift * 100.0
                ),
            });
            criteria.push(CriterionResult {
                criterion: "primary_min_lift".to_string(),
                metric_name: p.metric_name.clone(),
                passed: p.meets_threshold,
                reasoning: format!(
                    "favorable lift {:+.2}% against required > {:.2}%",
                    lift * 100.0,
                    c.min_primary_lift * 100.0
                ),
            });
            primary_success = p.is_significant && lift > 0.0 && p.meets_threshold;
        }

        let mut degraded = Vec::new();
        for g in results
            .iter()
            .filter(|r| !r.is_primary() && r.outcome.is_conclusive())
        {
            if g.is_degraded {
                degraded.push(g.metric_name.clone());
            }
            criteria.push(CriterionResult {
                criterion: "guardrail_not_degraded".to_string(),
                metric_name: g.metric_name.clone(),
                passed: !g.is_degraded,
                reasoning: format!(
                    "{} changed {:+.2}% (p = {}); blocks when it worsens by more than \
                     {:.2}% with p < {}",
                    g.metric_name,
                    g.relative_lift.unwrap_or_default() * 100.0,
                    format_p_value(g.p_value.unwrap_or(1.0)),
                    c.max_guardrail_degradation * 100.0,
                    g.alpha
                ),
            });
        }

        let inconclusive_names: Vec<String> =
            inconclusive.iter().map(|r| r.metric_name.clone()).collect();
        let ship = primary_success && degraded.is_empty() && inconclusive_names.is_empty();

        let (confidence, reasoning) =
            self.summarize(primary, primary_success, &degraded, &inconclusive);

        let primary_metric = primary
            .map(|p| p.metric_name.clone())
            .unwrap_or_else(|| experiment.primary_metric.clone());
        let analysis_id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}:{}", experiment.experiment_id, input_digest).as_bytes(),
        );

        info!(
            experiment_id = %experiment.experiment_id,
            ship,
            confidence = ?confidence,
            degraded = degraded.len(),
            inconclusive = inconclusive_names.len(),
            "Decision made"
        );

        Decision {
            analysis_id,
            experiment_id: experiment.experiment_id.clone(),
            experiment_name: experiment.experiment_name.clone(),
            start_date: experiment.start_date,
            end_date: experiment.end_date,
            control_allocation: experiment.control_allocation,
            input_digest,
            control_users,
            variant_users,
            ship,
            confidence,
            primary_metric,
            primary_metric_lift: primary.and_then(|p| p.relative_lift),
            primary_metric_p_value: primary.and_then(|p| p.p_value),
            degraded_guardrails: degraded,
            inconclusive_metrics: inconclusive_names,
            criteria,
            reasoning,
            metrics: results,
        }
    }

    fn summarize(
        &self,
        primary: Option<&MetricResult>,
        primary_success: bool,
        degraded: &[String],
        inconclusive: &[&MetricResult],
    ) -> (DecisionConfidence, Vec<String>) {
        let c = &self.config;
        let Some(primary) = primary else {
            return (
                DecisionConfidence::Medium,
                vec!["No primary metric was evaluated".to_string()],
            );
        };

        if !inconclusive.is_empty() {
            let mut reasons = vec![format!(
                "Inconclusive metric(s): {}",
                inconclusive
                    .iter()
                    .map(|r| r.metric_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )];
            for r in inconclusive {
                if let MetricOutcome::Inconclusive { reason } = &r.outcome {
                    reasons.push(format!("{}: {}", r.metric_name, reason));
                }
            }
            reasons.push("Every metric must be testable before shipping".to_string());
            return (DecisionConfidence::Medium, reasons);
        }

        let lift = primary.favorable_lift().unwrap_or_default() * 100.0;
        let p_value = format_p_value(primary.p_value.unwrap_or(1.0));

        if primary_success && degraded.is_empty() {
            let d = primary.cohens_d.unwrap_or_default();
            return (
                DecisionConfidence::High,
                vec![
                    format!(
                        "Primary metric ({}) shows significant positive lift of {:.2}%",
                        primary.metric_name, lift
                    ),
                    format!("Statistical significance achieved (p = {})", p_value),
                    format!(
                        "Effect size is {} (Cohen's d = {:.3})",
                        EffectSize::from_d(d).as_str(),
                        d
                    ),
                    "No guardrail metrics degraded".to_string(),
                ],
            );
        }

        if primary_success {
            return (
                DecisionConfidence::Medium,
                vec![
                    format!("Primary metric shows positive lift of {:.2}%", lift),
                    format!("BUT guardrail metric(s) degraded: {}", degraded.join(", ")),
                    "Risk of harming user experience outweighs primary metric gains".to_string(),
                ],
            );
        }

        if primary.is_significant && lift < 0.0 {
            return (
                DecisionConfidence::High,
                vec![
                    format!(
                        "Primary metric moved in the unfavorable direction ({:.2}%)",
                        lift
                    ),
                    "Variant is worse than control".to_string(),
                ],
            );
        }

        if primary.is_significant {
            return (
                DecisionConfidence::Medium,
                vec![
                    format!(
                        "Primary metric lift ({:.2}%) is significant (p = {}) but not above \
                         the minimum of {:.2}%",
                        lift,
                        p_value,
                        c.min_primary_lift * 100.0
                    ),
                    "Improvement too small to justify shipping".to_string(),
                ],
            );
        }

        let mut reasons = vec![
            format!(
                "Primary metric lift ({:.2}%) is not statistically significant",
                lift
            ),
            format!("p-value = {} (threshold: {})", p_value, primary.alpha),
            "Insufficient evidence to conclude variant is better".to_string(),
        ];
        if !primary.meets_threshold {
            reasons.push(format!(
                "Lift does not meet minimum threshold of {:.2}%",
                c.min_primary_lift * 100.0
            ));
        }
        (DecisionConfidence::Medium, reasons)
    }
}

/// SHA-256 over the JSON encoding of the user table in `(user_id, variant)` order.
pub fn fingerprint(rows: &[UserMetric]) -> ListenResult<String> {
    let mut ordered: Vec<&UserMetric> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then_with(|| a.variant.cmp(&b.variant))
    });
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&ordered)?);
    Ok(hex::encode(hasher.finalize()))
}
