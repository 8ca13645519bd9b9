// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use exam_session::{
    client::UiUpdate,
    config::Config,
    hub::{self, SessionHub},
    models::user::LoginResponse,
    routes,
    state::AppState,
    utils::{hash::hash_password, jwt::ROLE_PROCTOR},
};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

pub struct TestApp {
    pub address: String,
    pub hub_address: String,
    pub pool: SqlitePool,
}

/// Spawns the REST API and the session hub on random ports, backed by a
/// fresh in-memory database.
pub async fn spawn_app() -> TestApp {
    // One connection that never expires, so the in-memory database lives as long as the pool.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let hub_listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind hub port");
    let hub_address = hub_listener.local_addr().unwrap().to_string();

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        proctor_username: None,
        proctor_password: None,
        http_addr: "127.0.0.1:0".to_string(),
        hub_addr: hub_address.clone(),
        hub_public_address: hub_address.clone(),
        hub_idle_timeout_secs: 2,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
        hub: SessionHub::new(),
    };

    let hub_state = state.clone();
    tokio::spawn(async move {
        hub::serve(hub_listener, hub_state).await.unwrap();
    });

    let app = routes::create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        hub_address,
        pool,
    }
}

pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().to_string()[..8])
}

impl TestApp {
    /// Inserts an exam with `questions` single-choice questions. Returns (exam_id, question_ids).
    pub async fn seed_exam(&self, duration_minutes: i64, questions: usize) -> (i64, Vec<i64>) {
        let exam_id: i64 = sqlx::query_scalar(
            "INSERT INTO exams (title, duration_minutes) VALUES (?, ?) RETURNING id",
        )
        .bind(unique_name("exam"))
        .bind(duration_minutes)
        .fetch_one(&self.pool)
        .await
        .unwrap();

        let mut ids = Vec::new();
        for i in 0..questions {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO questions (exam_id, type, content, ord, options) VALUES (?, 'single', ?, ?, '[\"A\",\"B\",\"C\"]') RETURNING id",
            )
            .bind(exam_id)
            .bind(format!("Question {}", i + 1))
            .bind(i as i64 + 1)
            .fetch_one(&self.pool)
            .await
            .unwrap();
            ids.push(id);
        }
        (exam_id, ids)
    }

    pub async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/api/auth/register", self.address))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn login(&self, username: &str, password: &str) -> LoginResponse {
        reqwest::Client::new()
            .post(format!("{}/api/auth/login", self.address))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .expect("Login response")
    }

    /// Registers and logs in a fresh student.
    pub async fn student(&self) -> LoginResponse {
        let name = unique_name("s");
        assert_eq!(self.register(&name, "password123").await.status().as_u16(), 201);
        self.login(&name, "password123").await
    }

    pub async fn proctor(&self) -> LoginResponse {
        let name = unique_name("p");
        let hashed = hash_password("password123").unwrap();
        sqlx::query("INSERT INTO users (username, password, role) VALUES (?, ?, ?)")
            .bind(&name)
            .bind(hashed)
            .bind(ROLE_PROCTOR)
            .execute(&self.pool)
            .await
            .unwrap();
        self.login(&name, "password123").await
    }

    pub async fn force_submit(
        &self,
        token: &str,
        exam_id: i64,
        student_id: i64,
        reason: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!(
                "{}/api/proctor/exams/{}/students/{}/force-submit",
                self.address, exam_id, student_id
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn live_sessions(&self, token: &str) -> serde_json::Value {
        reqwest::Client::new()
            .get(format!("{}/api/proctor/sessions", self.address))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .unwrap()
    }

    pub async fn result(&self, token: &str, exam_id: i64, student_id: i64) -> serde_json::Value {
        reqwest::Client::new()
            .get(format!(
                "{}/api/proctor/exams/{}/students/{}/result",
                self.address, exam_id, student_id
            ))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .unwrap()
    }
}

/// Waits for the first update matching `pred`, skipping the rest.
pub async fn wait_for<F>(updates: &mut mpsc::UnboundedReceiver<UiUpdate>, pred: F) -> UiUpdate
where
    F: Fn(&UiUpdate) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let update = updates.recv().await.expect("session ended early");
            if pred(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for update")
}

/// How the proxy cuts its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cut {
    /// Close both sides.
    Kill,
    /// Stop relaying but keep both sockets open, like a dead Wi-Fi link.
    Stall,
}

const ONLINE: u8 = 0;
const OFFLINE: u8 = 1;
const STALLED: u8 = 2;

/// TCP relay in front of the hub that can be switched offline.
/// Going offline cuts live links and refuses new ones until back online.
/// Stalling swallows live links and new ones without closing anything.
pub struct Proxy {
    pub address: String,
    mode: Arc<AtomicU8>,
    cut: broadcast::Sender<Cut>,
}

impl Proxy {
    pub async fn start(upstream: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let mode = Arc::new(AtomicU8::new(ONLINE));
        let (cut, _) = broadcast::channel(4);

        let accept_mode = mode.clone();
        let accept_cut = cut.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut inbound, _)) = listener.accept().await else {
                    return;
                };
                match accept_mode.load(Ordering::SeqCst) {
                    OFFLINE => {
                        drop(inbound);
                        continue;
                    }
                    STALLED => {
                        tokio::spawn(async move {
                            let _held = inbound;
                            std::future::pending::<()>().await;
                        });
                        continue;
                    }
                    _ => {}
                }
                let upstream = upstream.clone();
                let mut cut_rx = accept_cut.subscribe();
                tokio::spawn(async move {
                    let Ok(mut outbound) = TcpStream::connect(&upstream).await else {
                        return;
                    };
                    let cut = tokio::select! {
                        _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => return,
                        cut = cut_rx.recv() => cut,
                    };
                    if matches!(cut, Ok(Cut::Stall)) {
                        let _held = (inbound, outbound);
                        std::future::pending::<()>().await;
                    }
                });
            }
        });

        Self { address, mode, cut }
    }

    pub fn go_offline(&self) {
        self.mode.store(OFFLINE, Ordering::SeqCst);
        let _ = self.cut.send(Cut::Kill);
    }

    pub fn stall(&self) {
        self.mode.store(STALLED, Ordering::SeqCst);
        let _ = self.cut.send(Cut::Stall);
    }

    pub fn go_online(&self) {
        self.mode.store(ONLINE, Ordering::SeqCst);
    }
}
