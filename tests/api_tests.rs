// tests/api_tests.rs

mod common;

use common::{spawn_app, unique_name};
use exam_session::models::{exam::EnterExamResponse, session::SessionStatus};

#[tokio::test]
async fn health_check_404() {
    // Arrange
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .get(format!("{}/random_path_that_does_not_exist", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_works() {
    let app = spawn_app().await;
    let name = unique_name("u");

    let response = app.register(&name, "password123").await;
    assert_eq!(response.status().as_u16(), 201);

    // Same name again is a conflict
    let response = app.register(&name, "password123").await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn register_fails_validation() {
    let app = spawn_app().await;

    // Username too short
    let response = app.register("yo", "password123").await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn login_issues_student_token() {
    let app = spawn_app().await;
    let name = unique_name("u");
    app.register(&name, "password123").await;

    let login = app.login(&name, "password123").await;
    assert_eq!(login.role, "student");
    assert!(!login.token.is_empty());

    let response = reqwest::Client::new()
        .post(format!("{}/api/auth/login", app.address))
        .json(&serde_json::json!({ "username": name, "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn exam_routes_require_token() {
    let app = spawn_app().await;
    let (exam_id, _) = app.seed_exam(60, 2).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/exams/{}/enter", app.address, exam_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn enter_exam_creates_attempt_with_payload() {
    let app = spawn_app().await;
    let (exam_id, questions) = app.seed_exam(60, 3).await;
    let student = app.student().await;
    let client = reqwest::Client::new();

    // Nothing to recover before the first entry
    let response = client
        .get(format!("{}/api/exams/{}/questions", app.address, exam_id))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let entry: EnterExamResponse = client
        .post(format!("{}/api/exams/{}/enter", app.address, exam_id))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(entry.status, SessionStatus::Create);
    assert_eq!(entry.transport_address, app.hub_address);
    assert_eq!(entry.remaining_seconds, 3600);
    let payload = entry.payload.expect("first entry carries the payload");
    assert_eq!(payload.duration_minutes, 60);
    let ids: Vec<i64> = payload.questions.iter().map(|q| q.id).collect();
    assert_eq!(ids, questions);
    assert_eq!(payload.questions[0].options, vec!["A", "B", "C"]);

    // The fallback serves the same question set
    let fallback: serde_json::Value = client
        .get(format!("{}/api/exams/{}/questions", app.address, exam_id))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fallback["questions"].as_array().unwrap().len(), 3);
    assert_eq!(fallback["questions"][0]["type"], "single");
}

#[tokio::test]
async fn enter_unknown_exam_is_404() {
    let app = spawn_app().await;
    let student = app.student().await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/exams/{}/enter", app.address, 999))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn proctor_routes_reject_students() {
    let app = spawn_app().await;
    let student = app.student().await;

    let response = reqwest::Client::new()
        .get(format!("{}/api/proctor/sessions", app.address))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn force_submit_closes_offline_attempt() {
    let app = spawn_app().await;
    let (exam_id, _) = app.seed_exam(30, 1).await;
    let student = app.student().await;
    let proctor = app.proctor().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/exams/{}/enter", app.address, exam_id))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap();

    // Empty reason is refused
    let response = app
        .force_submit(&proctor.token, exam_id, student.user_id, "")
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .force_submit(&proctor.token, exam_id, student.user_id, "left the room")
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ForceSubmitted");
    assert_eq!(body["delivered"], false);

    // Terminal: a second attempt conflicts
    let response = app
        .force_submit(&proctor.token, exam_id, student.user_id, "again")
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let result = app.result(&proctor.token, exam_id, student.user_id).await;
    assert_eq!(result["status"], "ForceSubmitted");
    assert_eq!(result["forceReason"], "left the room");
    assert!(result["finishedAt"].is_string());

    // Re-entry reports the closed status without a payload
    let entry: EnterExamResponse = client
        .post(format!("{}/api/exams/{}/enter", app.address, exam_id))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entry.status, SessionStatus::ForceSubmitted);
    assert!(entry.payload.is_none());
    assert_eq!(entry.remaining_seconds, 0);
}

#[tokio::test]
async fn force_submit_unknown_attempt_is_404() {
    let app = spawn_app().await;
    let proctor = app.proctor().await;

    let response = app.force_submit(&proctor.token, 1, 1, "no such attempt").await;
    assert_eq!(response.status().as_u16(), 404);
}
