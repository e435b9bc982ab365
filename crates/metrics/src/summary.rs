//! Arm-level descriptive statistics for tabular display.

use listen_core::{MetricKind, UserMetric, Variant};
use serde::{Deserialize, Serialize};

/// Sample size, mean and sample standard deviation of one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub n: usize,
    pub mean: f64,
    /// Bessel-corrected; zero when `n < 2`.
    pub std_dev: f64,
}

impl Moments {
    /// Two-pass mean/variance, accumulated in slice order.
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                n,
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = if n < 2 {
            0.0
        } else {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        };
        Self { n, mean, std_dev }
    }

    pub fn variance(&self) -> f64 {
        self.std_dev * self.std_dev
    }

    /// Standard error of the mean.
    pub fn std_error(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.std_dev / (self.n as f64).sqrt()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummaryRow {
    pub metric_name: String,
    pub variant: Variant,
    pub n: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

/// Values of `kind` for the users of one arm, in row order.
pub fn arm_values(rows: &[UserMetric], variant: Variant, kind: MetricKind) -> Vec<f64> {
    rows.iter()
        .filter(|r| r.variant == variant)
        .map(|r| kind.value(r))
        .collect()
}

/// One row per `(metric, variant)`. Empty arms report no mean; arms with a
/// single user report no standard deviation.
pub fn variant_summary(rows: &[UserMetric], kinds: &[MetricKind]) -> Vec<VariantSummaryRow> {
    let mut out = Vec::with_capacity(kinds.len() * Variant::ALL.len());
    for kind in kinds {
        for variant in Variant::ALL {
            let m = Moments::from_values(&arm_values(rows, variant, *kind));
            out.push(VariantSummaryRow {
                metric_name: kind.as_str().to_string(),
                variant,
                n: m.n,
                mean: (m.n > 0).then_some(m.mean),
                std_dev: (m.n > 1).then_some(m.std_dev),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(user: &str, variant: Variant, duration: f64, retained: bool) -> UserMetric {
        let day = NaiveDate::from_ymd_opt(2009, 3, 2).unwrap();
        UserMetric {
            user_id: user.to_string(),
            variant,
            total_sessions: 3,
            active_days: 3,
            total_tracks: 12,
            avg_tracks_per_session: 4.0,
            total_listening_minutes: duration * 3.0,
            avg_session_duration: duration,
            avg_skip_rate: 0.1,
            avg_unique_artists_per_session: 2.0,
            retention_d1: retained,
            first_session_date: day,
            last_session_date: day,
        }
    }

    #[test]
    fn test_moments() {
        let m = Moments::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(m.n, 8);
        assert!((m.mean - 5.0).abs() < 1e-12);
        assert!((m.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert!((m.std_error() - m.std_dev / 8f64.sqrt()).abs() < 1e-12);

        let single = Moments::from_values(&[3.0]);
        assert_eq!(single.std_dev, 0.0);
        assert_eq!(Moments::from_values(&[]).n, 0);
    }

    #[test]
    fn test_summary_rows_per_metric_and_arm() {
        let rows = vec![
            row("a", Variant::Control, 10.0, true),
            row("b", Variant::Control, 20.0, false),
            row("c", Variant::VariantB, 30.0, true),
        ];
        let summary = variant_summary(
            &rows,
            &[MetricKind::AvgSessionDuration, MetricKind::RetentionD1],
        );
        assert_eq!(summary.len(), 4);

        assert_eq!(summary[0].metric_name, "avg_session_duration");
        assert_eq!(summary[0].variant, Variant::Control);
        assert_eq!(summary[0].n, 2);
        assert_eq!(summary[0].mean, Some(15.0));
        assert!(summary[0].std_dev.is_some());

        assert_eq!(summary[1].variant, Variant::VariantB);
        assert_eq!(summary[1].std_dev, None);

        assert_eq!(summary[2].metric_name, "retention_d1");
        assert_eq!(summary[2].mean, Some(0.5));

        let json = serde_json::to_value(&summary[3]).unwrap();
        assert_eq!(json["variant"], "variant_b");
    }

    #[test]
    fn test_empty_arm_has_no_mean() {
        let rows = vec![row("a", Variant::Control, 10.0, true)];
        let summary = variant_summary(&rows, &[MetricKind::AvgSessionDuration]);
        assert_eq!(summary[1].n, 0);
        assert_eq!(summary[1].mean, None);
    }
}
