// src/handlers/exam.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    config::Config,
    error::AppError,
    hub::store,
    models::{
        exam::{EnterExamResponse, Exam, ExamPayload, ExamQuestion, Question},
        session::{SessionKey, SessionStatus, remaining_seconds},
    },
    utils::jwt::{Claims, ROLE_STUDENT},
};

fn student_id(claims: &Claims) -> Result<i64, AppError> {
    if claims.role != ROLE_STUDENT {
        return Err(AppError::Forbidden("Only students can sit exams".to_string()));
    }
    claims.user_id()
}

async fn load_exam(pool: &SqlitePool, exam_id: i64) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>("SELECT id, title, duration_minutes FROM exams WHERE id = ?")
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Exam {} not found", exam_id)))
}

/// Question set of an exam in display order, without answer keys.
async fn load_questions(pool: &SqlitePool, exam_id: i64) -> Result<Vec<ExamQuestion>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, exam_id, type, content, ord, options
        FROM questions
        WHERE exam_id = ?
        ORDER BY ord, id
        "#,
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to fetch questions for exam {}: {:?}", exam_id, e);
        AppError::from(e)
    })?;

    Ok(questions.into_iter().map(ExamQuestion::from).collect())
}

/// Registers the student's entry into an exam.
///
/// The first call creates the attempt in `Create` and carries the question
/// payload. Later calls report the current status and remaining time only.
pub async fn enter_exam(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = student_id(&claims)?;
    let exam = load_exam(&pool, exam_id).await?;
    let key = SessionKey::new(exam_id, student_id);

    let assignment = store::ensure_assignment(&pool, key)
        .await?
        .ok_or_else(|| AppError::InternalServerError(format!("Assignment for {} vanished", key)))?;
    let status = assignment.status();

    let remaining = if status.is_terminal() {
        0
    } else {
        remaining_seconds(exam.duration_minutes, assignment.started_at, Utc::now())
    };

    let payload = if status == SessionStatus::Create {
        Some(ExamPayload {
            duration_minutes: exam.duration_minutes,
            questions: load_questions(&pool, exam_id).await?,
        })
    } else {
        None
    };

    tracing::info!("Student {} entered exam {} ({})", student_id, exam_id, status);

    Ok(Json(EnterExamResponse {
        status,
        transport_address: config.hub_public_address.clone(),
        remaining_seconds: remaining,
        payload,
    }))
}

/// Question payload fallback for a resuming client.
pub async fn fetch_questions(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = student_id(&claims)?;
    let key = SessionKey::new(exam_id, student_id);

    let assignment = store::load_assignment(&pool, key)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam has not been entered".to_string()))?;

    if assignment.status().is_terminal() {
        return Err(AppError::Conflict("Exam session is already closed".to_string()));
    }

    Ok(Json(ExamPayload {
        duration_minutes: assignment.duration_minutes,
        questions: load_questions(&pool, exam_id).await?,
    }))
}
