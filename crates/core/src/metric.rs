//! Catalogue of per-user metrics that can be compared across arms.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ListenError;
use crate::types::UserMetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    AvgSessionDuration,
    AvgSkipRate,
    AvgUniqueArtistsPerSession,
    #[serde(rename = "retention_d1")]
    RetentionD1,
    SessionsPerUser,
    AvgTracksPerSession,
    TotalListeningMinutes,
    TotalTracks,
    ActiveDays,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::AvgSessionDuration,
        MetricKind::AvgSkipRate,
        MetricKind::AvgUniqueArtistsPerSession,
        MetricKind::RetentionD1,
        MetricKind::SessionsPerUser,
        MetricKind::AvgTracksPerSession,
        MetricKind::TotalListeningMinutes,
        MetricKind::TotalTracks,
        MetricKind::ActiveDays,
    ];

    /// Canonical column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::AvgSessionDuration => "avg_session_duration",
            MetricKind::AvgSkipRate => "avg_skip_rate",
            MetricKind::AvgUniqueArtistsPerSession => "avg_unique_artists_per_session",
            MetricKind::RetentionD1 => "retention_d1",
            MetricKind::SessionsPerUser => "sessions_per_user",
            MetricKind::AvgTracksPerSession => "avg_tracks_per_session",
            MetricKind::TotalListeningMinutes => "total_listening_minutes",
            MetricKind::TotalTracks => "total_tracks",
            MetricKind::ActiveDays => "active_days",
        }
    }

    pub fn default_direction(&self) -> Direction {
        match self {
            MetricKind::AvgSkipRate => Direction::LowerIsBetter,
            _ => Direction::HigherIsBetter,
        }
    }

    /// Extract this metric from a user row. Booleans map to 0/1.
    pub fn value(&self, row: &UserMetric) -> f64 {
        match self {
            MetricKind::AvgSessionDuration => row.avg_session_duration,
            MetricKind::AvgSkipRate => row.avg_skip_rate,
            MetricKind::AvgUniqueArtistsPerSession => row.avg_unique_artists_per_session,
            MetricKind::RetentionD1 => {
                if row.retention_d1 {
                    1.0
                } else {
                    0.0
                }
            }
            MetricKind::SessionsPerUser => row.total_sessions as f64,
            MetricKind::AvgTracksPerSession => row.avg_tracks_per_session,
            MetricKind::TotalListeningMinutes => row.total_listening_minutes,
            MetricKind::TotalTracks => row.total_tracks as f64,
            MetricKind::ActiveDays => row.active_days as f64,
        }
    }
}

impl FromStr for MetricKind {
    type Err = ListenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "avg_session_duration" => Ok(MetricKind::AvgSessionDuration),
            "avg_skip_rate" | "skip_rate" => Ok(MetricKind::AvgSkipRate),
            "avg_unique_artists_per_session" | "artists_per_session" => {
                Ok(MetricKind::AvgUniqueArtistsPerSession)
            }
            "retention_d1" => Ok(MetricKind::RetentionD1),
            "sessions_per_user" | "total_sessions" => Ok(MetricKind::SessionsPerUser),
            "avg_tracks_per_session" => Ok(MetricKind::AvgTracksPerSession),
            "total_listening_minutes" => Ok(MetricKind::TotalListeningMinutes),
            "total_tracks" => Ok(MetricKind::TotalTracks),
            "active_days" => Ok(MetricKind::ActiveDays),
            other => Err(ListenError::UnknownMetric(other.to_string())),
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a metric has to move for the variant to count as better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl Direction {
    /// Multiplier that turns a raw relative lift into a favorable one.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::HigherIsBetter => 1.0,
            Direction::LowerIsBetter => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRole {
    Primary,
    Guardrail,
}

/// A metric as it enters the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Name as written in the experiment configuration.
    pub name: String,
    pub kind: MetricKind,
    pub direction: Direction,
    pub role: MetricRole,
    pub alpha: f64,
}

impl MetricSpec {
    pub fn primary(name: &str, alpha: f64) -> Result<Self, ListenError> {
        Self::with_role(name, MetricRole::Primary, alpha)
    }

    pub fn guardrail(name: &str, alpha: f64) -> Result<Self, ListenError> {
        Self::with_role(name, MetricRole::Guardrail, alpha)
    }

    fn with_role(name: &str, role: MetricRole, alpha: f64) -> Result<Self, ListenError> {
        let kind: MetricKind = name.parse()?;
        Ok(Self {
            name: name.trim().to_string(),
            kind,
            direction: kind.default_direction(),
            role,
            alpha,
        })
    }

    pub fn is_primary(&self) -> bool {
        self.role == MetricRole::Primary
    }
}
