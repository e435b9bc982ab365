use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ListenError, ListenResult};

// ─── Listening Events ───────────────────────────────────────────────────────
/// A single scrobble: one track played by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEvent {
    pub user_id: String,
    pub played_at: DateTime<Utc>,
    pub artist_name: String,
    pub track_name: String,
}

impl ListenEvent {
    pub fn new(
        user_id: impl Into<String>,
        played_at: DateTime<Utc>,
        artist_name: impl Into<String>,
        track_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            played_at,
            artist_name: artist_name.into(),
            track_name: track_name.into(),
        }
    }

    /// Rejects events the ingestion layer should already have dropped.
    pub fn validate(&self) -> ListenResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(ListenError::InvalidEvent("empty user_id".to_string()));
        }
        if self.artist_name.trim().is_empty() || self.track_name.trim().is_empty() {
            return Err(ListenError::InvalidEvent(format!(
                "user {} has an event at {} without artist or track name",
                self.user_id, self.played_at
            )));
        }
        Ok(())
    }
}

// ─── Experiment Arms ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Control,
    VariantB,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Control, Variant::VariantB];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Control => "control",
            Variant::VariantB => "variant_b",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arm assignment for one user, carrying the experiment window it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAssignment {
    pub user_id: String,
    pub experiment_variant: Variant,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub control_allocation: f64,
}

impl VariantAssignment {
    /// Inclusive on both ends.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

// ─── Sessions ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    /// `None` when the user has no assignment.
    pub variant: Option<Variant>,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub tracks_played: u32,
    pub unique_artists: u32,
    pub session_duration_minutes: f64,
    pub tracks_skipped: u32,
    pub session_skip_rate: f64,
    pub in_experiment_period: bool,
}

impl Session {
    pub fn start_date(&self) -> NaiveDate {
        self.session_start.date_naive()
    }
}

// ─── Per-User Metrics ───────────────────────────────────────────────────────
/// One row per user that passed the engagement filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetric {
    pub user_id: String,
    pub variant: Variant,
    pub total_sessions: u32,
    pub active_days: u32,
    pub total_tracks: u32,
    pub avg_tracks_per_session: f64,
    pub total_listening_minutes: f64,
    pub avg_session_duration: f64,
    pub avg_skip_rate: f64,
    pub avg_unique_artists_per_session: f64,
    pub retention_d1: bool,
    pub first_session_date: NaiveDate,
    pub last_session_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_validation() {
        let at = Utc.with_ymd_and_hms(2009, 3, 2, 12, 0, 0).unwrap();
        assert!(ListenEvent::new("u1", at, "Radiohead", "Airbag").validate().is_ok());
        assert!(ListenEvent::new("u1", at, "  ", "Airbag").validate().is_err());
        assert!(ListenEvent::new("u1", at, "Radiohead", "").validate().is_err());
        assert!(ListenEvent::new("", at, "Radiohead", "Airbag").validate().is_err());
    }

    #[test]
    fn test_variant_serde_names() {
        assert_eq!(serde_json::to_string(&Variant::VariantB).unwrap(), "\"variant_b\"");
        assert_eq!(Variant::Control.to_string(), "control");
        let parsed: Variant = serde_json::from_str("\"control\"").unwrap();
        assert_eq!(parsed, Variant::Control);
    }

    #[test]
    fn test_assignment_window_is_inclusive() {
        let a = VariantAssignment {
            user_id: "u1".to_string(),
            experiment_variant: Variant::Control,
            start_date: NaiveDate::from_ymd_opt(2009, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2009, 4, 30).unwrap(),
            control_allocation: 0.5,
        };
        assert!(a.covers(NaiveDate::from_ymd_opt(2009, 3, 1).unwrap()));
        assert!(a.covers(NaiveDate::from_ymd_opt(2009, 4, 30).unwrap()));
        assert!(!a.covers(NaiveDate::from_ymd_opt(2009, 2, 28).unwrap()));
        assert!(!a.covers(NaiveDate::from_ymd_opt(2009, 5, 1).unwrap()));
    }
}
