// src/config.rs

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

/// Interval between `TimeSync` pushes from the hub.
pub const TIME_SYNC_INTERVAL_SECS: u64 = 1;

/// How long the hub waits for a client-driven submit after the clock hits zero.
pub const EXPIRY_GRACE_SECONDS: i64 = 10;

/// Longest answer text the hub will store.
pub const MAX_ANSWER_BYTES: usize = 4000;

/// A connection must say hello within this window.
pub const HELLO_TIMEOUT_SECS: u64 = 5;

/// Default silence after which the hub gives up on a connection.
pub const DEFAULT_HUB_IDLE_TIMEOUT_SECS: u64 = 15;

/// Focus losses shorter than this are treated as UI flicker.
pub const FOCUS_LOSS_THRESHOLD_MS: u64 = 7_000;

/// Remaining-time checkpoints (seconds) that raise a one-shot warning.
pub const TIME_WARNING_CHECKPOINTS: [i64; 3] = [300, 180, 60];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub proctor_username: Option<String>,
    pub proctor_password: Option<String>,
    /// Bind address of the REST API.
    pub http_addr: String,
    /// Bind address of the live session hub.
    pub hub_addr: String,
    /// Hub address handed to clients in the exam entry response.
    pub hub_public_address: String,
    /// A bound connection that sends nothing for this long is dropped and its
    /// session released.
    pub hub_idle_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4 * 60 * 60);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let http_addr = env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let hub_addr = env::var("HUB_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
        let hub_public_address =
            env::var("HUB_PUBLIC_ADDRESS").unwrap_or_else(|_| "127.0.0.1:3001".to_string());

        let hub_idle_timeout_secs = env::var("HUB_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HUB_IDLE_TIMEOUT_SECS);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            proctor_username: env::var("PROCTOR_USERNAME").ok(),
            proctor_password: env::var("PROCTOR_PASSWORD").ok(),
            http_addr,
            hub_addr,
            hub_public_address,
            hub_idle_timeout_secs,
        }
    }
}

/// Reconnect and handshake tuning for the session transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed attempts before giving up and reporting `Disconnected`.
    pub max_attempts: u32,
    /// How often a connected client tells the hub it is still there.
    pub heartbeat_interval: Duration,
    /// A link with no inbound frame for this long is treated as dropped.
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            max_attempts: 8,
            heartbeat_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Tunables of the exam client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub focus_loss_threshold: Duration,
    pub warning_checkpoints: Vec<i64>,
    /// Directory for the per-session answer blob. `None` keeps answers in memory only.
    pub store_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            focus_loss_threshold: Duration::from_millis(FOCUS_LOSS_THRESHOLD_MS),
            warning_checkpoints: TIME_WARNING_CHECKPOINTS.to_vec(),
            store_dir: None,
        }
    }
}
