// src/models/session.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one student's attempt at one exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    #[serde(alias = "ExamId")]
    pub exam_id: i64,
    #[serde(alias = "StudentId")]
    pub student_id: i64,
}

impl SessionKey {
    pub fn new(exam_id: i64, student_id: i64) -> Self {
        Self {
            exam_id,
            student_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exam {} / student {}", self.exam_id, self.student_id)
    }
}

/// Lifecycle of an exam attempt.
///
/// `Create -> InProgress -> {Completed | Expired | ForceSubmitted}`.
/// The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(alias = "create")]
    Create,
    #[serde(alias = "inProgress")]
    InProgress,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "expired")]
    Expired,
    #[serde(alias = "forceSubmitted")]
    ForceSubmitted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Expired | SessionStatus::ForceSubmitted
        )
    }

    /// Column value stored in `exam_assignments.status`.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Create => "create",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::ForceSubmitted => "force_submitted",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SessionStatus::Create),
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "expired" => Ok(SessionStatus::Expired),
            "force_submitted" => Ok(SessionStatus::ForceSubmitted),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seconds left on the exam clock as the server sees it.
///
/// An attempt that has not started yet has the full duration left.
pub fn remaining_seconds(
    duration_minutes: i64,
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    let total = duration_minutes.max(0) * 60;
    match started_at {
        Some(started) => {
            let elapsed = (now - started).num_seconds().max(0);
            (total - elapsed).max(0)
        }
        None => total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trips_through_column_value() {
        for status in [
            SessionStatus::Create,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Expired,
            SessionStatus::ForceSubmitted,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>(), Ok(status));
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_only_closing_states_are_terminal() {
        assert!(!SessionStatus::Create.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
        assert!(SessionStatus::ForceSubmitted.is_terminal());
    }

    #[test]
    fn test_remaining_seconds() {
        let now = Utc::now();
        assert_eq!(remaining_seconds(60, None, now), 3600);
        assert_eq!(
            remaining_seconds(60, Some(now - Duration::seconds(10)), now),
            3590
        );
        // Never negative once the clock has run out.
        assert_eq!(
            remaining_seconds(1, Some(now - Duration::minutes(5)), now),
            0
        );
    }

    #[test]
    fn test_status_accepts_camel_case_alias() {
        let status: SessionStatus = serde_json::from_str("\"inProgress\"").unwrap();
        assert_eq!(status, SessionStatus::InProgress);
        assert_eq!(
            serde_json::to_string(&SessionStatus::ForceSubmitted).unwrap(),
            "\"ForceSubmitted\""
        );
    }
}
