// src/hub/store.rs

//! Queries behind the live session. Shared with the REST handlers that
//! touch the same assignment rows.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    models::{
        assignment::Assignment,
        session::{SessionKey, SessionStatus},
    },
    protocol::SnapshotEntry,
};

pub async fn load_assignment(
    pool: &SqlitePool,
    key: SessionKey,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query_as::<_, Assignment>(
        r#"
        SELECT
            a.exam_id,
            a.student_id,
            a.status,
            a.started_at,
            a.finished_at,
            a.violation_count,
            a.force_reason,
            e.duration_minutes
        FROM exam_assignments a
        JOIN exams e ON e.id = a.exam_id
        WHERE a.exam_id = ? AND a.student_id = ?
        "#,
    )
    .bind(key.exam_id)
    .bind(key.student_id)
    .fetch_optional(pool)
    .await
}

/// Creates the assignment in `create` if the student has never entered.
pub async fn ensure_assignment(
    pool: &SqlitePool,
    key: SessionKey,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO exam_assignments (exam_id, student_id) VALUES (?, ?)")
        .bind(key.exam_id)
        .bind(key.student_id)
        .execute(pool)
        .await?;
    load_assignment(pool, key).await
}

/// Moves `create -> in_progress`, stamping `started_at` the first time only.
pub async fn mark_in_progress(
    pool: &SqlitePool,
    key: SessionKey,
    now: DateTime<Utc>,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE exam_assignments
        SET status = 'in_progress', started_at = COALESCE(started_at, ?)
        WHERE exam_id = ? AND student_id = ? AND status IN ('create', 'in_progress')
        "#,
    )
    .bind(now)
    .bind(key.exam_id)
    .bind(key.student_id)
    .execute(pool)
    .await?;
    load_assignment(pool, key).await
}

pub async fn load_snapshot(
    pool: &SqlitePool,
    key: SessionKey,
) -> Result<Vec<SnapshotEntry>, sqlx::Error> {
    sqlx::query_as::<_, SnapshotEntry>(
        r#"
        SELECT question_id, ord AS "order", answer
        FROM session_answers
        WHERE exam_id = ? AND student_id = ?
        ORDER BY ord, question_id
        "#,
    )
    .bind(key.exam_id)
    .bind(key.student_id)
    .fetch_all(pool)
    .await
}

pub async fn question_in_exam(
    pool: &SqlitePool,
    exam_id: i64,
    question_id: i64,
) -> Result<bool, sqlx::Error> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM questions WHERE id = ? AND exam_id = ?")
            .bind(question_id)
            .bind(exam_id)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Stores one answer while the attempt is open. Keyed by question, so a
/// repeated delivery overwrites with the same value instead of adding a row.
///
/// Returns false when the attempt is already closed; nothing is written.
pub async fn upsert_answer(
    pool: &SqlitePool,
    key: SessionKey,
    entry: &SnapshotEntry,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO session_answers (exam_id, student_id, question_id, ord, answer, updated_at)
        SELECT ?, ?, ?, ?, ?, ?
        WHERE EXISTS (
            SELECT 1 FROM exam_assignments
            WHERE exam_id = ? AND student_id = ? AND status IN ('create', 'in_progress')
        )
        ON CONFLICT(exam_id, student_id, question_id) DO UPDATE SET
            ord = excluded.ord,
            answer = excluded.answer,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key.exam_id)
    .bind(key.student_id)
    .bind(entry.question_id)
    .bind(entry.order)
    .bind(&entry.answer)
    .bind(now)
    .bind(key.exam_id)
    .bind(key.student_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Raises the stored violation count of an open attempt; never lowers it.
pub async fn record_violations(
    pool: &SqlitePool,
    key: SessionKey,
    count: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE exam_assignments
        SET violation_count = MAX(violation_count, ?)
        WHERE exam_id = ? AND student_id = ? AND status IN ('create', 'in_progress')
        "#,
    )
    .bind(count)
    .bind(key.exam_id)
    .bind(key.student_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Closes the attempt with a terminal status.
///
/// Only an open attempt can be closed, so when several finalizers race
/// exactly one gets `true`.
pub async fn finalize(
    pool: &SqlitePool,
    key: SessionKey,
    status: SessionStatus,
    force_reason: Option<&str>,
    violation_count: Option<i64>,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    debug_assert!(status.is_terminal());
    let result = sqlx::query(
        r#"
        UPDATE exam_assignments
        SET status = ?,
            finished_at = ?,
            force_reason = COALESCE(?, force_reason),
            violation_count = MAX(violation_count, COALESCE(?, 0))
        WHERE exam_id = ? AND student_id = ? AND status IN ('create', 'in_progress')
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(force_reason)
    .bind(violation_count)
    .bind(key.exam_id)
    .bind(key.student_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

    /// Fresh in-memory database with the schema applied.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    /// Inserts a student, an exam with `questions` single-choice items, and returns
    /// (exam_id, student_id, question_ids).
    pub async fn seed_exam(pool: &SqlitePool, duration_minutes: i64, questions: usize) -> (i64, i64, Vec<i64>) {
        let student_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, password) VALUES ('student', 'x') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        let exam_id: i64 = sqlx::query_scalar(
            "INSERT INTO exams (title, duration_minutes) VALUES ('Mock', ?) RETURNING id",
        )
        .bind(duration_minutes)
        .fetch_one(pool)
        .await
        .unwrap();
        let mut ids = Vec::new();
        for i in 0..questions {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO questions (exam_id, type, content, ord, options) VALUES (?, 'single', ?, ?, '[\"A\",\"B\",\"C\"]') RETURNING id",
            )
            .bind(exam_id)
            .bind(format!("Question {}", i))
            .bind(i as i64 + 1)
            .fetch_one(pool)
            .await
            .unwrap();
            ids.push(id);
        }
        (exam_id, student_id, ids)
    }
}
