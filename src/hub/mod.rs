// src/hub/mod.rs

//! Authoritative side of the live exam session.
//!
//! Clients connect over TCP and speak newline-delimited JSON
//! (see [`crate::protocol`]). The hub owns the clock, stores answers, and
//! guarantees at most one live connection per (exam, student) pair.

pub mod connection;
pub mod registry;
pub mod store;

pub use registry::{Binding, HubSignal, SessionHub};

use tokio::net::TcpListener;

use crate::state::AppState;

/// Accepts session connections until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(?peer, ?err, "set_nodelay failed");
        }
        tokio::spawn(connection::handle_connection(stream, peer, state.clone()));
    }
}
