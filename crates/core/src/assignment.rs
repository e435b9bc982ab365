//! Deterministic hash bucketing of users into experiment arms.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::ExperimentConfig;
use crate::types::{Variant, VariantAssignment};

/// Stable bucket in `0..100` for a user id.
///
/// The first eight bytes of SHA-256 are read as a big-endian signed integer;
/// its absolute value modulo 100 is the bucket.
pub fn bucket(user_id: &str) -> u64 {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head).unsigned_abs() % 100
}

/// Pure arm assignment: buckets below `floor(control_allocation * 100)` are control.
pub fn assign(user_id: &str, control_allocation: f64) -> Variant {
    // Nudge before flooring so 0.29 * 100 = 28.999.. still yields 29.
    let threshold = (control_allocation * 100.0 + 1e-9).floor().clamp(0.0, 100.0) as u64;
    if bucket(user_id) < threshold {
        Variant::Control
    } else {
        Variant::VariantB
    }
}

/// Assigns users for one experiment, stamping each row with its window.
#[derive(Debug, Clone)]
pub struct VariantAssigner {
    experiment: ExperimentConfig,
}

impl VariantAssigner {
    pub fn new(experiment: &ExperimentConfig) -> Self {
        Self {
            experiment: experiment.clone(),
        }
    }

    pub fn assignment(&self, user_id: &str) -> VariantAssignment {
        VariantAssignment {
            user_id: user_id.to_string(),
            experiment_variant: assign(user_id, self.experiment.control_allocation),
            start_date: self.experiment.start_date,
            end_date: self.experiment.end_date,
            control_allocation: self.experiment.control_allocation,
        }
    }

    /// One row per distinct user id.
    pub fn assign_all<'a, I>(&self, user_ids: I) -> BTreeMap<String, VariantAssignment>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = BTreeMap::new();
        for user_id in user_ids {
            if !out.contains_key(user_id) {
                out.insert(user_id.to_string(), self.assignment(user_id));
            }
        }
        tracing::debug!(
            experiment_id = %self.experiment.experiment_id,
            users = out.len(),
            "Assigned users to experiment arms"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_is_deterministic() {
        for i in 0..200 {
            let user = format!("user_{:06}", i);
            let first = assign(&user, 0.5);
            for _ in 0..3 {
                assert_eq!(assign(&user, 0.5), first);
            }
            assert_eq!(bucket(&user), bucket(&user));
            assert!(bucket(&user) < 100);
        }
    }

    #[test]
    fn test_control_fraction_converges() {
        let n = 10_000;
        let control = (0..n)
            .filter(|i| assign(&format!("user_{}", i), 0.5) == Variant::Control)
            .count();
        let fraction = control as f64 / n as f64;
        assert!(
            (0.47..=0.53).contains(&fraction),
            "control fraction {} outside tolerance",
            fraction
        );
    }

    #[test]
    fn test_uneven_allocation_converges() {
        let n = 10_000;
        let control = (0..n)
            .filter(|i| assign(&format!("listener-{}", i), 0.2) == Variant::Control)
            .count();
        let fraction = control as f64 / n as f64;
        assert!((0.17..=0.23).contains(&fraction), "got {}", fraction);
    }

    #[test]
    fn test_extreme_allocations() {
        for i in 0..1_000 {
            let user = format!("u{}", i);
            assert_eq!(assign(&user, 0.0), Variant::VariantB);
            assert_eq!(assign(&user, 1.0), Variant::Control);
        }
    }

    #[test]
    fn test_assign_all_dedupes_and_copies_window() {
        let experiment = ExperimentConfig::default();
        let assigner = VariantAssigner::new(&experiment);
        let rows = assigner.assign_all(["alice", "bob", "alice"]);
        assert_eq!(rows.len(), 2);
        let alice = &rows["alice"];
        assert_eq!(alice.start_date, experiment.start_date);
        assert_eq!(alice.end_date, experiment.end_date);
        assert_eq!(alice.control_allocation, 0.5);
        assert_eq!(alice.experiment_variant, assign("alice", 0.5));
    }
}
