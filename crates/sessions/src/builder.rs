//! Gap-based sessionization.
//!
//! Each user's events are scanned in `played_at` order. The scan marks session
//! boundaries (first event, or a gap above the inactivity limit), estimates a
//! play duration for every event from the gap to the next one, and flags
//! skips. The marked plays are then reduced into one [`Session`] per group.

use chrono::Duration;
use listen_core::config::SessionConfig;
use listen_core::{ListenEvent, Session, VariantAssignment};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// One event after the boundary scan.
#[derive(Debug, Clone)]
struct MarkedPlay<'e> {
    event: &'e ListenEvent,
    play_minutes: f64,
    is_skip: bool,
    session_seq: u32,
}

pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Build sessions for every user in `events`.
    ///
    /// Output is grouped by user id (ascending) and chronological within a
    /// user. Users missing from `assignments` still get sessions, flagged as
    /// outside the experiment period.
    pub fn build(
        &self,
        events: &[ListenEvent],
        assignments: &BTreeMap<String, VariantAssignment>,
    ) -> Vec<Session> {
        let mut by_user: BTreeMap<&str, Vec<&ListenEvent>> = BTreeMap::new();
        for event in events {
            by_user.entry(event.user_id.as_str()).or_default().push(event);
        }

        let mut sessions = Vec::new();
        for (user_id, mut user_events) in by_user.into_iter() {
            // Stable sort: equal timestamps keep their input order.
            user_events.sort_by_key(|e| e.played_at);
            sessions.extend(self.build_user(user_id, &user_events, assignments.get(user_id)));
        }

        info!(
            events = events.len(),
            sessions = sessions.len(),
            in_period = sessions.iter().filter(|s| s.in_experiment_period).count(),
            "Sessions built"
        );
        sessions
    }

    /// Sessions for a single user whose events are already in time order.
    pub fn build_user(
        &self,
        user_id: &str,
        events: &[&ListenEvent],
        assignment: Option<&VariantAssignment>,
    ) -> Vec<Session> {
        let plays = self.mark(events);

        let mut sessions = Vec::new();
        let mut dropped = 0u64;
        let mut start = 0;
        while start < plays.len() {
            let seq = plays[start].session_seq;
            let end = plays[start..]
                .iter()
                .position(|p| p.session_seq != seq)
                .map_or(plays.len(), |offset| start + offset);
            let group = &plays[start..end];
            start = end;

            if (group.len() as u32) < self.config.min_tracks_per_session {
                dropped += 1;
                continue;
            }
            sessions.push(reduce(user_id, seq, group, assignment));
        }

        metrics::counter!("sessions.built").increment(sessions.len() as u64);
        metrics::counter!("sessions.dropped_noise").increment(dropped);
        debug!(
            user_id,
            events = events.len(),
            sessions = sessions.len(),
            dropped,
            "User sessionized"
        );
        sessions
    }

    fn mark<'e>(&self, events: &[&'e ListenEvent]) -> Vec<MarkedPlay<'e>> {
        // Out-of-range limits are rejected by `AnalysisConfig::validate`.
        let gap_limit =
            Duration::try_minutes(self.config.session_gap_minutes).unwrap_or(Duration::MAX);
        let skip_limit =
            Duration::try_seconds(self.config.skip_threshold_seconds).unwrap_or(Duration::MAX);

        let mut seq = 0u32;
        let mut plays = Vec::with_capacity(events.len());
        for (i, event) in events.iter().copied().enumerate() {
            let starts_session = match i.checked_sub(1) {
                None => true,
                Some(prev) => event.played_at - events[prev].played_at > gap_limit,
            };
            if starts_session {
                seq += 1;
            }

            let gap_to_next = events.get(i + 1).map(|next| next.played_at - event.played_at);
            let play_minutes = match gap_to_next {
                Some(gap) => {
                    (gap.num_milliseconds() as f64 / 60_000.0).min(self.config.max_play_minutes)
                }
                None => self.config.final_play_minutes,
            };
            let is_skip = gap_to_next.is_some_and(|gap| gap < skip_limit);

            plays.push(MarkedPlay {
                event,
                play_minutes,
                is_skip,
                session_seq: seq,
            });
        }
        plays
    }
}

fn reduce(
    user_id: &str,
    seq: u32,
    group: &[MarkedPlay<'_>],
    assignment: Option<&VariantAssignment>,
) -> Session {
    // Groups come from the boundary scan and always hold at least one play.
    let session_start = group[0].event.played_at;
    let session_end = group[group.len() - 1].event.played_at;

    let tracks_played = group.len() as u32;
    let unique_artists = group
        .iter()
        .map(|p| p.event.artist_name.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u32;
    let session_duration_minutes = group.iter().map(|p| p.play_minutes).sum();
    let tracks_skipped = group.iter().filter(|p| p.is_skip).count() as u32;

    Session {
        session_id: format!("{}_{}", user_id, seq),
        user_id: user_id.to_string(),
        variant: assignment.map(|a| a.experiment_variant),
        session_start,
        session_end,
        tracks_played,
        unique_artists,
        session_duration_minutes,
        tracks_skipped,
        session_skip_rate: tracks_skipped as f64 / tracks_played as f64,
        in_experiment_period: assignment.is_some_and(|a| a.covers(session_start.date_naive())),
    }
}
