//! Rolls in-period sessions up to one engagement row per user.

use chrono::{Days, NaiveDate};
use listen_core::config::EngagementConfig;
use listen_core::{Session, UserMetric, Variant};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub struct UserMetricsAggregator {
    min_sessions: u32,
}

impl UserMetricsAggregator {
    pub fn new(config: &EngagementConfig) -> Self {
        Self {
            min_sessions: config.min_sessions,
        }
    }

    /// Aggregate sessions into user rows, sorted by user id.
    ///
    /// Sessions outside the experiment period or without an arm are ignored.
    /// Users with fewer than `min_sessions` qualifying sessions are left out,
    /// with the same threshold for both arms.
    pub fn aggregate(&self, sessions: &[Session]) -> Vec<UserMetric> {
        let mut by_user: BTreeMap<(&str, Variant), Vec<&Session>> = BTreeMap::new();
        for session in sessions.iter().filter(|s| s.in_experiment_period) {
            if let Some(variant) = session.variant {
                by_user
                    .entry((session.user_id.as_str(), variant))
                    .or_default()
                    .push(session);
            }
        }

        let mut rows = Vec::with_capacity(by_user.len());
        let mut excluded: BTreeMap<Variant, u64> = BTreeMap::new();
        for ((user_id, variant), mut user_sessions) in by_user {
            if (user_sessions.len() as u32) < self.min_sessions {
                *excluded.entry(variant).or_default() += 1;
                debug!(
                    user_id,
                    variant = %variant,
                    sessions = user_sessions.len(),
                    "User below engagement threshold"
                );
                continue;
            }
            user_sessions.sort_by(|a, b| {
                a.session_start
                    .cmp(&b.session_start)
                    .then_with(|| a.session_id.cmp(&b.session_id))
            });
            rows.push(summarize(user_id, variant, &user_sessions));
        }

        for variant in Variant::ALL {
            let count = excluded.get(&variant).copied().unwrap_or(0);
            metrics::counter!("users.excluded_low_engagement", "variant" => variant.as_str())
                .increment(count);
        }
        info!(
            included = rows.len(),
            excluded_control = excluded.get(&Variant::Control).copied().unwrap_or(0),
            excluded_variant_b = excluded.get(&Variant::VariantB).copied().unwrap_or(0),
            min_sessions = self.min_sessions,
            "User metrics aggregated"
        );
        rows
    }
}

fn summarize(user_id: &str, variant: Variant, sessions: &[&Session]) -> UserMetric {
    let n = sessions.len() as f64;
    let dates: BTreeSet<NaiveDate> = sessions.iter().map(|s| s.start_date()).collect();
    // Callers never pass an empty slice, so the set has a first and last date.
    let first_session_date = dates.first().copied().unwrap_or_default();
    let last_session_date = dates.last().copied().unwrap_or(first_session_date);
    let retention_d1 = first_session_date
        .checked_add_days(Days::new(1))
        .is_some_and(|next_day| dates.contains(&next_day));

    let total_tracks: u32 = sessions.iter().map(|s| s.tracks_played).sum();
    let total_listening_minutes: f64 = sessions.iter().map(|s| s.session_duration_minutes).sum();

    UserMetric {
        user_id: user_id.to_string(),
        variant,
        total_sessions: sessions.len() as u32,
        active_days: dates.len() as u32,
        total_tracks,
        avg_tracks_per_session: total_tracks as f64 / n,
        total_listening_minutes,
        avg_session_duration: total_listening_minutes / n,
        avg_skip_rate: sessions.iter().map(|s| s.session_skip_rate).sum::<f64>() / n,
        avg_unique_artists_per_session: sessions
            .iter()
            .map(|s| s.unique_artists as f64)
            .sum::<f64>()
            / n,
        retention_d1,
        first_session_date,
        last_session_date,
    }
}
