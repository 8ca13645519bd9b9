// tests/session_tests.rs

mod common;

use std::time::Duration;

use common::{Proxy, TestApp, spawn_app, wait_for};
use exam_session::{
    client::{
        BlockReason, ConnectionState, ExamSession, HttpExamApi, ReadySession, RecoveryController,
        SessionOutcome, UiCommand, UiUpdate,
        store::{AnswerEntry, AnswerStatus},
        sync::RawSelection,
    },
    config::{ClientConfig, TransportConfig},
    models::{
        session::{SessionKey, SessionStatus},
        user::LoginResponse,
    },
};

fn fast_config() -> ClientConfig {
    ClientConfig {
        transport: TransportConfig {
            connect_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_millis(200),
            max_attempts: 50,
            heartbeat_interval: Duration::from_millis(300),
            idle_timeout: Duration::from_millis(2500),
        },
        ..ClientConfig::default()
    }
}

async fn recover(
    app: &TestApp,
    student: &LoginResponse,
    exam_id: i64,
    config: &ClientConfig,
) -> Result<ReadySession, BlockReason> {
    let api = HttpExamApi::new(&app.address, &student.token);
    let key = SessionKey::new(exam_id, student.user_id);
    RecoveryController::new(&api, key, student.token.clone(), config)
        .run(None)
        .await
}

fn answer(question_id: i64, order: i64, choice: &str) -> UiCommand {
    UiCommand::Answer {
        question_id,
        order,
        selection: RawSelection::Single(choice.to_string()),
    }
}

fn is_synced(question_id: i64, answer: &str) -> impl Fn(&UiUpdate) -> bool + '_ {
    move |update| {
        matches!(update, UiUpdate::Answer { question_id: id, entry }
            if *id == question_id && entry.answer == answer && entry.status == AnswerStatus::Synced)
    }
}

fn is_connected(update: &UiUpdate) -> bool {
    matches!(update, UiUpdate::Connection(ConnectionState::Connected))
}

#[tokio::test]
async fn answer_and_submit_round_trip() {
    let app = spawn_app().await;
    let (exam_id, questions) = app.seed_exam(60, 3).await;
    let student = app.student().await;
    let proctor = app.proctor().await;
    let config = fast_config();

    let ready = recover(&app, &student, exam_id, &config).await.unwrap();
    let (session, mut updates) = ExamSession::start(ready, config);
    wait_for(&mut updates, is_connected).await;

    session.send(UiCommand::FullscreenEntered);
    session.send(answer(questions[1], 2, "C"));
    wait_for(&mut updates, is_synced(questions[1], "C")).await;

    // The hub pushes the clock; the student is inside the first minute.
    let clock = wait_for(&mut updates, |u| matches!(u, UiUpdate::Clock { .. })).await;
    let UiUpdate::Clock { seconds_left, .. } = clock else {
        unreachable!()
    };
    assert!(seconds_left > 3500 && seconds_left <= 3600);

    session.send(UiCommand::OpenSubmitConfirmation);
    session.send(UiCommand::ConfirmSubmit);
    let terminal = wait_for(&mut updates, |u| matches!(u, UiUpdate::Terminal(_))).await;
    let UiUpdate::Terminal(screen) = terminal else {
        unreachable!()
    };
    assert_eq!(screen.status, SessionStatus::Completed);
    assert!(!screen.forced);
    assert_eq!(
        screen.report.answers.get(&questions[1]).map(String::as_str),
        Some("C")
    );
    assert!(matches!(session.finished().await, SessionOutcome::Closed(_)));

    let result = app.result(&proctor.token, exam_id, student.user_id).await;
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["answers"][0]["questionId"], questions[1]);
    assert_eq!(result["answers"][0]["answer"], "C");
}

#[tokio::test]
async fn second_device_is_blocked() {
    let app = spawn_app().await;
    let (exam_id, _) = app.seed_exam(60, 2).await;
    let student = app.student().await;
    let config = fast_config();

    let ready = recover(&app, &student, exam_id, &config).await.unwrap();
    let (session, mut updates) = ExamSession::start(ready, config.clone());
    wait_for(&mut updates, is_connected).await;

    // Same student, same exam, from a reload on another device.
    let blocked = recover(&app, &student, exam_id, &config).await.err();
    assert_eq!(blocked, Some(BlockReason::SessionActiveElsewhere));

    // The first device is unaffected.
    session.send(UiCommand::Leave);
    assert_eq!(session.finished().await, SessionOutcome::Abandoned);
}

#[tokio::test]
async fn proctor_force_submit_reaches_live_client() {
    let app = spawn_app().await;
    let (exam_id, questions) = app.seed_exam(60, 2).await;
    let student = app.student().await;
    let proctor = app.proctor().await;
    let config = fast_config();

    let ready = recover(&app, &student, exam_id, &config).await.unwrap();
    let (session, mut updates) = ExamSession::start(ready, config);
    wait_for(&mut updates, is_connected).await;
    session.send(UiCommand::FullscreenEntered);
    session.send(answer(questions[0], 1, "A"));
    wait_for(&mut updates, is_synced(questions[0], "A")).await;

    let live = app.live_sessions(&proctor.token).await;
    assert_eq!(live[0]["studentId"], student.user_id);

    let response = app
        .force_submit(&proctor.token, exam_id, student.user_id, "phone on desk")
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], true);

    let terminal = wait_for(&mut updates, |u| matches!(u, UiUpdate::Terminal(_))).await;
    let UiUpdate::Terminal(screen) = terminal else {
        unreachable!()
    };
    assert!(screen.forced);
    assert_eq!(screen.reason.as_deref(), Some("phone on desk"));

    // Nothing the student does now has any effect.
    session.send(answer(questions[0], 1, "B"));
    assert!(matches!(session.finished().await, SessionOutcome::Closed(_)));
    let result = app.result(&proctor.token, exam_id, student.user_id).await;
    assert_eq!(result["answers"][0]["answer"], "A");
}

#[tokio::test]
async fn offline_edit_survives_reconnect() {
    let app = spawn_app().await;
    let (exam_id, questions) = app.seed_exam(60, 5).await;
    let student = app.student().await;
    let proctor = app.proctor().await;
    let config = fast_config();
    let proxy = Proxy::start(app.hub_address.clone()).await;

    let mut ready = recover(&app, &student, exam_id, &config).await.unwrap();
    ready.transport_address = proxy.address.clone();
    let (session, mut updates) = ExamSession::start(ready, config);
    wait_for(&mut updates, is_connected).await;
    session.send(UiCommand::FullscreenEntered);

    proxy.go_offline();
    wait_for(&mut updates, |u| {
        matches!(u, UiUpdate::Connection(ConnectionState::Reconnecting))
    })
    .await;

    let q5 = questions[4];
    session.send(answer(q5, 5, "B"));
    let pending = wait_for(&mut updates, |u| matches!(u, UiUpdate::Answer { .. })).await;
    assert_eq!(
        pending,
        UiUpdate::Answer {
            question_id: q5,
            entry: AnswerEntry::pending("B", 5)
        }
    );

    proxy.go_online();
    wait_for(&mut updates, is_connected).await;
    wait_for(&mut updates, is_synced(q5, "B")).await;

    // The clock keeps counting from the original start.
    let clock = wait_for(&mut updates, |u| matches!(u, UiUpdate::Clock { .. })).await;
    let UiUpdate::Clock { seconds_left, .. } = clock else {
        unreachable!()
    };
    assert!(seconds_left > 3500 && seconds_left <= 3600);

    let result = app.result(&proctor.token, exam_id, student.user_id).await;
    assert_eq!(result["status"], "InProgress");
    assert_eq!(result["answers"][0]["questionId"], q5);
    assert_eq!(result["answers"][0]["answer"], "B");

    session.send(UiCommand::Leave);
    assert_eq!(session.finished().await, SessionOutcome::Abandoned);
}

#[tokio::test]
async fn silent_network_loss_frees_the_session_for_reconnect() {
    let app = spawn_app().await;
    let (exam_id, questions) = app.seed_exam(60, 3).await;
    let student = app.student().await;
    let proctor = app.proctor().await;
    let config = fast_config();
    let proxy = Proxy::start(app.hub_address.clone()).await;

    let mut ready = recover(&app, &student, exam_id, &config).await.unwrap();
    ready.transport_address = proxy.address.clone();
    let (session, mut updates) = ExamSession::start(ready, config);
    wait_for(&mut updates, is_connected).await;
    session.send(UiCommand::FullscreenEntered);
    session.send(answer(questions[0], 1, "A"));
    wait_for(&mut updates, is_synced(questions[0], "A")).await;

    // Traffic stops in both directions but no socket is closed.
    proxy.stall();
    wait_for(&mut updates, |u| {
        matches!(u, UiUpdate::Connection(ConnectionState::Reconnecting))
    })
    .await;
    session.send(answer(questions[1], 2, "C"));
    wait_for(&mut updates, |u| {
        matches!(u, UiUpdate::Answer { question_id, .. } if *question_id == questions[1])
    })
    .await;

    // The hub gives up on the silent connection and frees the pair.
    tokio::time::timeout(Duration::from_secs(10), async {
        while app.live_sessions(&proctor.token).await != serde_json::json!([]) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("stale binding was never released");

    proxy.go_online();
    wait_for(&mut updates, is_connected).await;
    wait_for(&mut updates, is_synced(questions[1], "C")).await;

    let result = app.result(&proctor.token, exam_id, student.user_id).await;
    assert_eq!(result["status"], "InProgress");
    assert_eq!(result["answers"][0]["answer"], "A");
    assert_eq!(result["answers"][1]["answer"], "C");

    session.send(UiCommand::Leave);
    assert_eq!(session.finished().await, SessionOutcome::Abandoned);
}
