//! Two-sample statistics on arm summaries.
//!
//! Everything here works from [`Moments`] (n, mean, sample sd) so callers can
//! test either raw per-user values or pre-aggregated arm summaries.

use listen_core::config::TTestKind;
use listen_core::{ListenError, ListenResult};
use listen_metrics::Moments;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub kind: TTestKind,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    /// Standard error of the mean difference.
    pub std_error: f64,
    /// Two-sided.
    pub p_value: f64,
}

/// Qualitative reading of |Cohen's d|.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    pub fn from_d(d: f64) -> Self {
        let abs_d = d.abs();
        if abs_d < 0.2 {
            EffectSize::Negligible
        } else if abs_d < 0.5 {
            EffectSize::Small
        } else if abs_d < 0.8 {
            EffectSize::Medium
        } else {
            EffectSize::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectSize::Negligible => "negligible",
            EffectSize::Small => "small",
            EffectSize::Medium => "medium",
            EffectSize::Large => "large",
        }
    }
}

fn stats_error(err: statrs::StatsError) -> ListenError {
    ListenError::Internal(anyhow::anyhow!("distribution error: {}", err))
}

fn students_t(df: f64) -> ListenResult<StudentsT> {
    StudentsT::new(0.0, 1.0, df).map_err(stats_error)
}

/// Two-sided critical value of the t-distribution.
pub fn t_critical(df: f64, confidence: f64) -> ListenResult<f64> {
    Ok(students_t(df)?.inverse_cdf(1.0 - (1.0 - confidence) / 2.0))
}

/// Compare `variant` against `control`. `None` when the difference has no
/// variance to test against or an arm has fewer than two observations.
pub fn t_test(
    control: &Moments,
    variant: &Moments,
    kind: TTestKind,
) -> ListenResult<Option<TTest>> {
    if control.n < 2 || variant.n < 2 {
        return Ok(None);
    }
    let (n1, n2) = (control.n as f64, variant.n as f64);
    let (v1, v2) = (control.variance(), variant.variance());

    let (std_error, degrees_of_freedom) = match kind {
        TTestKind::Welch => {
            let a = v1 / n1;
            let b = v2 / n2;
            let se = (a + b).sqrt();
            let df = (a + b).powi(2) / (a.powi(2) / (n1 - 1.0) + b.powi(2) / (n2 - 1.0));
            (se, df)
        }
        TTestKind::Pooled => {
            let df = n1 + n2 - 2.0;
            let pooled = ((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / df;
            ((pooled * (1.0 / n1 + 1.0 / n2)).sqrt(), df)
        }
    };
    if !(std_error > 0.0) || !degrees_of_freedom.is_finite() {
        return Ok(None);
    }

    let t_statistic = (variant.mean - control.mean) / std_error;
    let p_value = (2.0 * students_t(degrees_of_freedom)?.cdf(-t_statistic.abs())).clamp(0.0, 1.0);

    Ok(Some(TTest {
        kind,
        t_statistic,
        degrees_of_freedom,
        std_error,
        p_value,
    }))
}

/// Cohen's d of variant over control with the pooled standard deviation.
pub fn cohens_d(control: &Moments, variant: &Moments) -> Option<f64> {
    if control.n + variant.n <= 2 {
        return None;
    }
    let (n1, n2) = (control.n as f64, variant.n as f64);
    let pooled_var =
        ((n1 - 1.0) * control.variance() + (n2 - 1.0) * variant.variance()) / (n1 + n2 - 2.0);
    let pooled_sd = pooled_var.sqrt();
    (pooled_sd > 0.0).then(|| (variant.mean - control.mean) / pooled_sd)
}

/// Confidence interval of `variant.mean - control.mean`.
pub fn difference_interval(
    control: &Moments,
    variant: &Moments,
    test: &TTest,
    confidence: f64,
) -> ListenResult<(f64, f64)> {
    let diff = variant.mean - control.mean;
    let margin = t_critical(test.degrees_of_freedom, confidence)? * test.std_error;
    Ok((diff - margin, diff + margin))
}

/// t-interval for a single arm's mean.
pub fn mean_interval(arm: &Moments, confidence: f64) -> ListenResult<Option<(f64, f64)>> {
    if arm.n < 2 {
        return Ok(None);
    }
    let margin = t_critical((arm.n - 1) as f64, confidence)? * arm.std_error();
    Ok(Some((arm.mean - margin, arm.mean + margin)))
}

/// Smallest relative lift detectable against `baseline` with the given
/// two-sided `alpha` and `power`, assuming equal arm sizes.
pub fn minimum_detectable_effect(
    baseline: &Moments,
    alpha: f64,
    power: f64,
) -> ListenResult<Option<f64>> {
    if baseline.n == 0 || baseline.mean == 0.0 {
        return Ok(None);
    }
    let normal = Normal::new(0.0, 1.0).map_err(stats_error)?;
    let z_alpha = normal.inverse_cdf(1.0 - alpha / 2.0);
    let z_beta = normal.inverse_cdf(power);
    let absolute = (z_alpha + z_beta) * baseline.std_dev * (2.0 / baseline.n as f64).sqrt();
    Ok(Some(absolute / baseline.mean))
}

/// `< 0.001` for tiny values, otherwise three decimals.
pub fn format_p_value(p_value: f64) -> String {
    if p_value < 0.001 {
        "< 0.001".to_string()
    } else {
        format!("{:.3}", p_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm(n: usize, mean: f64, std_dev: f64) -> Moments {
        Moments { n, mean, std_dev }
    }

    #[test]
    fn test_welch_matches_hand_computation() {
        let control = arm(1000, 20.0, 5.0);
        let variant = arm(1000, 21.0, 5.0);
        let test = t_test(&control, &variant, TTestKind::Welch).unwrap().unwrap();
        let se = (25.0f64 / 1000.0 * 2.0).sqrt();
        assert!((test.std_error - se).abs() < 1e-12);
        assert!((test.t_statistic - 1.0 / se).abs() < 1e-9);
        // Equal variances and sizes: Welch df collapses to n1 + n2 - 2.
        assert!((test.degrees_of_freedom - 1998.0).abs() < 1e-6);
        assert!(test.p_value < 1e-4);
    }

    #[test]
    fn test_small_effect_with_hundred_users_is_not_significant() {
        let test = t_test(&arm(100, 20.0, 5.0), &arm(100, 21.0, 5.0), TTestKind::Welch)
            .unwrap()
            .unwrap();
        assert!((test.t_statistic - 2f64.sqrt()).abs() < 1e-9);
        // Two-sided p for t = 1.414 on 198 df.
        assert!(test.p_value > 0.15 && test.p_value < 0.17, "p = {}", test.p_value);
    }

    #[test]
    fn test_welch_and_pooled_differ_on_unbalanced_arms() {
        let control = arm(50, 10.0, 1.0);
        let variant = arm(500, 10.5, 4.0);
        let welch = t_test(&control, &variant, TTestKind::Welch).unwrap().unwrap();
        let pooled = t_test(&control, &variant, TTestKind::Pooled).unwrap().unwrap();
        assert!((pooled.degrees_of_freedom - 548.0).abs() < 1e-9);
        assert!(welch.degrees_of_freedom < pooled.degrees_of_freedom);
        assert!((welch.std_error - pooled.std_error).abs() > 1e-3);
        assert_eq!(welch.kind, TTestKind::Welch);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(t_test(&arm(1, 1.0, 0.0), &arm(10, 1.0, 1.0), TTestKind::Welch)
            .unwrap()
            .is_none());
        assert!(t_test(&arm(10, 1.0, 0.0), &arm(10, 2.0, 0.0), TTestKind::Welch)
            .unwrap()
            .is_none());
        assert_eq!(cohens_d(&arm(10, 1.0, 0.0), &arm(10, 2.0, 0.0)), None);
    }

    #[test]
    fn test_cohens_d_and_interpretation() {
        let d = cohens_d(&arm(100, 20.0, 5.0), &arm(100, 21.0, 5.0)).unwrap();
        assert!((d - 0.2).abs() < 1e-12);
        assert_eq!(EffectSize::from_d(d), EffectSize::Small);
        assert_eq!(EffectSize::from_d(-0.1), EffectSize::Negligible);
        assert_eq!(EffectSize::from_d(0.6), EffectSize::Medium);
        assert_eq!(EffectSize::from_d(-1.3), EffectSize::Large);
    }

    #[test]
    fn test_difference_interval_brackets_difference() {
        let control = arm(1000, 20.0, 5.0);
        let variant = arm(1000, 21.0, 5.0);
        let test = t_test(&control, &variant, TTestKind::Welch).unwrap().unwrap();
        let (lo, hi) = difference_interval(&control, &variant, &test, 0.95).unwrap();
        assert!(lo > 0.0 && hi > lo);
        assert!(((lo + hi) / 2.0 - 1.0).abs() < 1e-9);
        // t critical on ~2000 df is close to 1.96.
        assert!(((hi - lo) / 2.0 / test.std_error - 1.961).abs() < 0.01);
    }

    #[test]
    fn test_mean_interval_and_mde() {
        let (lo, hi) = mean_interval(&arm(25, 10.0, 2.0), 0.95).unwrap().unwrap();
        // t_{0.975, 24} = 2.064
        assert!(((hi - lo) / 2.0 - 2.064 * 0.4).abs() < 0.01);
        assert!(mean_interval(&arm(1, 10.0, 0.0), 0.95).unwrap().is_none());

        let mde = minimum_detectable_effect(&arm(100, 20.0, 5.0), 0.05, 0.8)
            .unwrap()
            .unwrap();
        // (1.96 + 0.8416) * 5 * sqrt(0.02) / 20
        assert!((mde - 0.0990).abs() < 1e-3, "mde = {}", mde);
        assert!(minimum_detectable_effect(&arm(100, 0.0, 5.0), 0.05, 0.8)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_format_p_value() {
        assert_eq!(format_p_value(0.0004), "< 0.001");
        assert_eq!(format_p_value(0.0432), "0.043");
        assert_eq!(format_p_value(0.5), "0.500");
    }
}
