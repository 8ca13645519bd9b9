// src/main.rs

use dotenvy::dotenv;
use exam_session::config::Config;
use exam_session::hub::{self, SessionHub};
use exam_session::routes;
use exam_session::state::AppState;
use exam_session::utils::{hash::hash_password, jwt::ROLE_PROCTOR};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "exam-session.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .expect("DATABASE_URL is not a valid SQLite URL")
        .create_if_missing(true);

    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(connect_options.clone())
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to open database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied successfully.");

    // Seed Proctor Account
    if let Err(e) = seed_proctor_user(&pool, &config).await {
        tracing::error!("Failed to seed proctor user: {:?}", e);
    }

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        hub: SessionHub::new(),
    };

    // Live session hub
    let hub_listener = tokio::net::TcpListener::bind(&config.hub_addr)
        .await
        .expect("Failed to bind session hub address");
    tracing::info!("Session hub listening on {}", config.hub_addr);
    let hub_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = hub::serve(hub_listener, hub_state).await {
            tracing::error!("Session hub stopped: {}", e);
        }
    });

    // Create the Axum application router
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .expect("Failed to bind HTTP address");
    tracing::info!("REST API listening on {}", config.http_addr);

    // Start the server
    axum::serve(listener, app).await.unwrap();
}

async fn seed_proctor_user(
    pool: &SqlitePool,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    if let (Some(username), Some(password)) = (&config.proctor_username, &config.proctor_password)
    {
        let user_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

        if user_exists.is_none() {
            tracing::info!("Seeding proctor user: {}", username);
            let hashed_password = hash_password(password)?;

            sqlx::query("INSERT INTO users (username, password, role) VALUES (?, ?, ?)")
                .bind(username)
                .bind(hashed_password)
                .bind(ROLE_PROCTOR)
                .execute(pool)
                .await?;
            tracing::info!("Proctor user created successfully.");
        }
    }
    Ok(())
}
