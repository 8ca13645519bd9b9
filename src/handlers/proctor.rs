// src/handlers/proctor.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    hub::{HubSignal, SessionHub, store},
    models::{
        assignment::{ForceSubmitRequest, SessionResult},
        session::{SessionKey, SessionStatus},
    },
};

/// Sessions currently bound to a live connection.
pub async fn list_sessions(State(hub): State<SessionHub>) -> impl IntoResponse {
    Json(hub.live_sessions())
}

/// Closes a student's attempt as `ForceSubmitted`.
///
/// The database row is closed first; the live connection (if any) is then
/// told to forward `ForceSubmit` and hang up.
pub async fn force_submit(
    State(pool): State<SqlitePool>,
    State(hub): State<SessionHub>,
    Path((exam_id, student_id)): Path<(i64, i64)>,
    Json(payload): Json<ForceSubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let key = SessionKey::new(exam_id, student_id);
    store::load_assignment(&pool, key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No attempt for {}", key)))?;

    let closed = store::finalize(
        &pool,
        key,
        SessionStatus::ForceSubmitted,
        Some(&payload.reason),
        None,
        Utc::now(),
    )
    .await?;

    if !closed {
        return Err(AppError::Conflict("Exam session is already closed".to_string()));
    }

    let delivered = hub
        .signal(
            key,
            HubSignal::ForceSubmit {
                reason: payload.reason.clone(),
            },
        )
        .await;

    tracing::info!("Force submitted {} (live: {})", key, delivered);

    Ok(Json(json!({
        "status": SessionStatus::ForceSubmitted,
        "delivered": delivered,
    })))
}

/// Final answers and integrity metadata for grading and audit.
pub async fn session_result(
    State(pool): State<SqlitePool>,
    Path((exam_id, student_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let key = SessionKey::new(exam_id, student_id);
    let assignment = store::load_assignment(&pool, key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No attempt for {}", key)))?;

    let answers = store::load_snapshot(&pool, key).await?;

    Ok(Json(SessionResult {
        exam_id,
        student_id,
        status: assignment.status(),
        violation_count: assignment.violation_count,
        force_reason: assignment.force_reason.clone(),
        finished_at: assignment.finished_at,
        answers,
    }))
}
