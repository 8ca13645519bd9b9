// src/models/assignment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::{
    models::session::{SessionKey, SessionStatus},
    protocol::SnapshotEntry,
};

/// Represents the 'exam_assignments' table joined with the exam duration.
#[derive(Debug, Clone, FromRow)]
pub struct Assignment {
    pub exam_id: i64,
    pub student_id: i64,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub violation_count: i64,
    pub force_reason: Option<String>,
    pub duration_minutes: i64,
}

impl Assignment {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.exam_id, self.student_id)
    }

    /// Parsed status. Unknown column values are treated as closed.
    pub fn status(&self) -> SessionStatus {
        self.status.parse().unwrap_or_else(|e: String| {
            tracing::warn!("{} for {}", e, self.key());
            SessionStatus::ForceSubmitted
        })
    }
}

/// DTO for a proctor forcing a session closed.
#[derive(Debug, Deserialize, Validate)]
pub struct ForceSubmitRequest {
    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters."))]
    pub reason: String,
}

/// A session currently bound to a live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSessionInfo {
    pub exam_id: i64,
    pub student_id: i64,
    pub connected_at: DateTime<Utc>,
}

/// What grading and audit receive once a session is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub exam_id: i64,
    pub student_id: i64,
    pub status: SessionStatus,
    pub violation_count: i64,
    pub force_reason: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub answers: Vec<SnapshotEntry>,
}
