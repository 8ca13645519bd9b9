// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

use crate::models::session::SessionStatus;

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    pub duration_minutes: i64,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Question {
    pub id: i64,

    pub exam_id: i64,

    /// Question type: 'single', 'multiple' or 'text'.
    /// Mapped from the database column 'type' since `type` is a reserved keyword in Rust.
    #[sqlx(rename = "type")]
    pub question_type: String,

    /// The text content of the question.
    pub content: String,

    /// Display position within the exam.
    pub ord: i64,

    /// List of options (e.g., ["Option A", "Option B"]).
    /// Stored as a JSON array in the database.
    pub options: Json<Vec<String>>,
}

/// Question as handed to the exam client (no answer key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestion {
    #[serde(alias = "Id")]
    pub id: i64,
    #[serde(alias = "Content")]
    pub content: String,
    #[serde(rename = "type", alias = "Type")]
    pub question_type: String,
    #[serde(alias = "Order")]
    pub order: i64,
    #[serde(default, alias = "Options")]
    pub options: Vec<String>,
}

impl From<Question> for ExamQuestion {
    fn from(q: Question) -> Self {
        Self {
            id: q.id,
            content: q.content,
            question_type: q.question_type,
            order: q.ord,
            options: q.options.0,
        }
    }
}

/// Everything the client needs to render an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamPayload {
    #[serde(alias = "DurationMinutes")]
    pub duration_minutes: i64,
    #[serde(alias = "Questions")]
    pub questions: Vec<ExamQuestion>,
}

/// Response of the exam entry call.
///
/// `payload` is only present while the attempt is still in `Create`;
/// a resuming client fetches the questions separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterExamResponse {
    #[serde(alias = "Status")]
    pub status: SessionStatus,
    #[serde(alias = "TransportAddress")]
    pub transport_address: String,
    #[serde(alias = "RemainingSeconds")]
    pub remaining_seconds: i64,
    #[serde(default, alias = "Payload", skip_serializing_if = "Option::is_none")]
    pub payload: Option<ExamPayload>,
}
