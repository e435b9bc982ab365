use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ListenError, ListenResult};
use crate::metric::{MetricKind, MetricSpec};

/// Root analysis configuration. Loaded from an optional TOML file overlaid
/// with environment variables carrying the prefix `LISTEN_LAB__`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub engagement: EngagementConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,
    #[serde(default = "default_control_allocation")]
    pub control_allocation: f64,
    #[serde(default = "default_primary_metric")]
    pub primary_metric: String,
    #[serde(default = "default_guardrail_metrics")]
    pub guardrail_metrics: Vec<String>,
}

/// Sessionization heuristics. The play-duration constants are estimates
/// tuned for scrobble data without explicit play lengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_gap_minutes")]
    pub session_gap_minutes: i64,
    #[serde(default = "default_skip_threshold_seconds")]
    pub skip_threshold_seconds: i64,
    #[serde(default = "default_max_play_minutes")]
    pub max_play_minutes: f64,
    #[serde(default = "default_final_play_minutes")]
    pub final_play_minutes: f64,
    #[serde(default = "default_min_tracks_per_session")]
    pub min_tracks_per_session: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    #[serde(default = "default_min_sessions")]
    pub min_sessions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TTestKind {
    /// Unequal variances, Welch-Satterthwaite degrees of freedom.
    Welch,
    /// Equal variances, n1 + n2 - 2 degrees of freedom.
    Pooled,
}

impl TTestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TTestKind::Welch => "welch",
            TTestKind::Pooled => "pooled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_primary_alpha")]
    pub primary_alpha: f64,
    #[serde(default = "default_guardrail_alpha")]
    pub guardrail_alpha: f64,
    #[serde(default = "default_min_primary_lift")]
    pub min_primary_lift: f64,
    #[serde(default = "default_max_guardrail_degradation")]
    pub max_guardrail_degradation: f64,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_min_arm_size")]
    pub min_arm_size: usize,
    #[serde(default = "default_power")]
    pub power: f64,
    #[serde(default = "default_t_test")]
    pub t_test: TTestKind,
}

// Default functions
fn default_experiment_id() -> String {
    "exp_001".to_string()
}
fn default_experiment_name() -> String {
    "Enhanced Discovery Algorithm".to_string()
}
fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2009, 3, 1).unwrap_or_default()
}
fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2009, 4, 30).unwrap_or_default()
}
fn default_control_allocation() -> f64 {
    0.5
}
fn default_primary_metric() -> String {
    "avg_session_duration".to_string()
}
fn default_guardrail_metrics() -> Vec<String> {
    vec![
        "skip_rate".to_string(),
        "sessions_per_user".to_string(),
        "retention_d1".to_string(),
        "artists_per_session".to_string(),
    ]
}
fn default_session_gap_minutes() -> i64 {
    30
}
fn default_skip_threshold_seconds() -> i64 {
    30
}
fn default_max_play_minutes() -> f64 {
    10.0
}
fn default_final_play_minutes() -> f64 {
    3.5
}
fn default_min_tracks_per_session() -> u32 {
    2
}
fn default_min_sessions() -> u32 {
    3
}
fn default_primary_alpha() -> f64 {
    0.05
}
fn default_guardrail_alpha() -> f64 {
    0.10
}
fn default_min_primary_lift() -> f64 {
    0.02
}
fn default_max_guardrail_degradation() -> f64 {
    0.01
}
fn default_confidence_level() -> f64 {
    0.95
}
fn default_min_arm_size() -> usize {
    2
}
fn default_power() -> f64 {
    0.80
}
fn default_t_test() -> TTestKind {
    TTestKind::Welch
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            experiment_id: default_experiment_id(),
            experiment_name: default_experiment_name(),
            start_date: default_start_date(),
            end_date: default_end_date(),
            control_allocation: default_control_allocation(),
            primary_metric: default_primary_metric(),
            guardrail_metrics: default_guardrail_metrics(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_gap_minutes: default_session_gap_minutes(),
            skip_threshold_seconds: default_skip_threshold_seconds(),
            max_play_minutes: default_max_play_minutes(),
            final_play_minutes: default_final_play_minutes(),
            min_tracks_per_session: default_min_tracks_per_session(),
        }
    }
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            min_sessions: default_min_sessions(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            primary_alpha: default_primary_alpha(),
            guardrail_alpha: default_guardrail_alpha(),
            min_primary_lift: default_min_primary_lift(),
            max_guardrail_degradation: default_max_guardrail_degradation(),
            confidence_level: default_confidence_level(),
            min_arm_size: default_min_arm_size(),
            power: default_power(),
            t_test: default_t_test(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from an optional TOML file and environment variables.
    pub fn load(path: Option<&Path>) -> ListenResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("LISTEN_LAB")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("experiment.guardrail_metrics"),
        );

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        Ok(parsed)
    }

    /// Reject configurations no analysis run can proceed with.
    pub fn validate(&self) -> ListenResult<()> {
        let exp = &self.experiment;
        if !exp.control_allocation.is_finite() || !(0.0..=1.0).contains(&exp.control_allocation) {
            return Err(ListenError::Config(format!(
                "control_allocation must be within [0, 1], got {}",
                exp.control_allocation
            )));
        }
        if exp.end_date < exp.start_date {
            return Err(ListenError::Config(format!(
                "end_date {} is before start_date {}",
                exp.end_date, exp.start_date
            )));
        }
        if exp.experiment_id.trim().is_empty() {
            return Err(ListenError::Config("experiment_id is empty".to_string()));
        }

        let primary: MetricKind = exp.primary_metric.parse()?;
        for name in &exp.guardrail_metrics {
            let kind: MetricKind = name.parse()?;
            if kind == primary {
                return Err(ListenError::Config(format!(
                    "{} is configured as both primary and guardrail metric",
                    name
                )));
            }
        }

        let s = &self.sessions;
        if s.session_gap_minutes <= 0 || s.skip_threshold_seconds <= 0 {
            return Err(ListenError::Config(
                "session gap and skip threshold must be positive".to_string(),
            ));
        }
        if chrono::Duration::try_minutes(s.session_gap_minutes).is_none()
            || chrono::Duration::try_seconds(s.skip_threshold_seconds).is_none()
        {
            return Err(ListenError::Config(format!(
                "session gap ({} min) or skip threshold ({} s) is out of range",
                s.session_gap_minutes, s.skip_threshold_seconds
            )));
        }
        if !(s.max_play_minutes > 0.0) || !(s.final_play_minutes > 0.0) {
            return Err(ListenError::Config(
                "play duration estimates must be positive".to_string(),
            ));
        }
        if self.engagement.min_sessions == 0 {
            return Err(ListenError::Config("min_sessions must be at least 1".to_string()));
        }

        let d = &self.decision;
        for (name, value) in [
            ("primary_alpha", d.primary_alpha),
            ("guardrail_alpha", d.guardrail_alpha),
            ("confidence_level", d.confidence_level),
            ("power", d.power),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ListenError::Config(format!(
                    "{} must be within (0, 1), got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("min_primary_lift", d.min_primary_lift),
            ("max_guardrail_degradation", d.max_guardrail_degradation),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ListenError::Config(format!(
                    "{} must be within [0, 1), got {}",
                    name, value
                )));
            }
        }
        if d.min_arm_size < 2 {
            return Err(ListenError::Config(
                "min_arm_size must be at least 2 to estimate a variance".to_string(),
            ));
        }
        Ok(())
    }

    /// Primary metric first, then guardrails in configured order.
    pub fn metric_specs(&self) -> ListenResult<Vec<MetricSpec>> {
        let mut specs = vec![MetricSpec::primary(
            &self.experiment.primary_metric,
            self.decision.primary_alpha,
        )?];
        for name in &self.experiment.guardrail_metrics {
            specs.push(MetricSpec::guardrail(name, self.decision.guardrail_alpha)?);
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sessions.session_gap_minutes, 30);
        assert_eq!(config.engagement.min_sessions, 3);
        assert_eq!(config.decision.t_test, TTestKind::Welch);
        assert!(config
            .experiment
            .guardrail_metrics
            .contains(&"artists_per_session".to_string()));
    }

    #[test]
    fn test_session_limits_beyond_time_range_rejected() {
        let mut config = AnalysisConfig::default();
        config.sessions.session_gap_minutes = i64::MAX / 1000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ListenError::Config(_)));
        assert!(err.to_string().contains("out of range"));

        let mut config = AnalysisConfig::default();
        config.sessions.skip_threshold_seconds = i64::MAX;
        assert!(matches!(config.validate(), Err(ListenError::Config(_))));
    }

    #[test]
    fn test_lift_thresholds_must_be_fractions() {
        for bad in [-0.5, 1.0, f64::NAN, f64::INFINITY] {
            let mut config = AnalysisConfig::default();
            config.decision.max_guardrail_degradation = bad;
            assert!(matches!(config.validate(), Err(ListenError::Config(_))));

            let mut config = AnalysisConfig::default();
            config.decision.min_primary_lift = bad;
            assert!(matches!(config.validate(), Err(ListenError::Config(_))));
        }

        let mut config = AnalysisConfig::default();
        config.decision.max_guardrail_degradation = 0.0;
        config.decision.min_primary_lift = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_control_allocation_out_of_range() {
        let mut config = AnalysisConfig::default();
        config.experiment.control_allocation = 1.2;
        assert!(matches!(config.validate(), Err(ListenError::Config(_))));
        config.experiment.control_allocation = f64::NAN;
        assert!(config.validate().is_err());
        config.experiment.control_allocation = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut config = AnalysisConfig::default();
        config.experiment.end_date = NaiveDate::from_ymd_opt(2009, 2, 1).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("before start_date"));
    }

    #[test]
    fn test_unknown_and_duplicate_metrics_rejected() {
        let mut config = AnalysisConfig::default();
        config.experiment.guardrail_metrics.push("bounce_rate".to_string());
        assert!(matches!(config.validate(), Err(ListenError::UnknownMetric(_))));

        let mut config = AnalysisConfig::default();
        config.experiment.guardrail_metrics = vec!["avg_session_duration".to_string()];
        assert!(matches!(config.validate(), Err(ListenError::Config(_))));
    }

    #[test]
    fn test_metric_specs_order_and_alpha() {
        let specs = AnalysisConfig::default().metric_specs().unwrap();
        assert_eq!(specs.len(), 5);
        assert!(specs[0].is_primary());
        assert_eq!(specs[0].alpha, 0.05);
        assert!(specs[1..].iter().all(|s| !s.is_primary() && s.alpha == 0.10));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[experiment]
experiment_id = "exp_042"
start_date = "2009-05-01"
end_date = "2009-05-31"
control_allocation = 0.3
guardrail_metrics = ["skip_rate"]

[sessions]
final_play_minutes = 4.0

[decision]
t_test = "pooled"
"#
        )
        .unwrap();

        let config = AnalysisConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.experiment.experiment_id, "exp_042");
        assert_eq!(
            config.experiment.start_date,
            NaiveDate::from_ymd_opt(2009, 5, 1).unwrap()
        );
        assert_eq!(config.experiment.control_allocation, 0.3);
        assert_eq!(config.experiment.guardrail_metrics, vec!["skip_rate"]);
        assert_eq!(config.experiment.primary_metric, "avg_session_duration");
        assert_eq!(config.sessions.final_play_minutes, 4.0);
        assert_eq!(config.sessions.max_play_minutes, 10.0);
        assert_eq!(config.decision.t_test, TTestKind::Pooled);
        assert!(config.validate().is_ok());
    }
}
