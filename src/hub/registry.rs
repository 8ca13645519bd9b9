// src/hub/registry.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::models::{assignment::LiveSessionInfo, session::SessionKey};

/// Out-of-band instruction delivered to a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubSignal {
    ForceSubmit { reason: String },
}

/// The pair is already bound to another connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyBound;

struct LiveConnection {
    conn_id: u64,
    tx: mpsc::Sender<HubSignal>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct HubState {
    next_conn_id: u64,
    live: HashMap<SessionKey, LiveConnection>,
}

/// Registry of live connections, at most one per (exam, student) pair.
#[derive(Clone, Default)]
pub struct SessionHub {
    inner: Arc<Mutex<HubState>>,
}

/// Holds a pair for one connection. Dropping it frees the pair, including
/// when the connection task unwinds.
pub struct Binding {
    hub: SessionHub,
    key: SessionKey,
    conn_id: u64,
}

impl Binding {
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.hub.release(self.key, self.conn_id);
    }
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_live(&self, key: SessionKey) -> bool {
        self.state().live.contains_key(&key)
    }

    /// Claims the pair for a new connection.
    ///
    /// Returns the binding guard and the receiver for signals aimed at it.
    pub fn bind(
        &self,
        key: SessionKey,
    ) -> Result<(Binding, mpsc::Receiver<HubSignal>), AlreadyBound> {
        let mut hub = self.state();
        if hub.live.contains_key(&key) {
            return Err(AlreadyBound);
        }
        let conn_id = hub.next_conn_id;
        hub.next_conn_id += 1;
        let (tx, rx) = mpsc::channel(8);
        hub.live.insert(
            key,
            LiveConnection {
                conn_id,
                tx,
                connected_at: Utc::now(),
            },
        );
        let binding = Binding {
            hub: self.clone(),
            key,
            conn_id,
        };
        Ok((binding, rx))
    }

    /// Frees the pair, but only if it is still held by `conn_id`.
    fn release(&self, key: SessionKey, conn_id: u64) {
        let mut hub = self.state();
        if hub.live.get(&key).is_some_and(|c| c.conn_id == conn_id) {
            hub.live.remove(&key);
        }
    }

    /// Delivers a signal to the live connection. Returns false if none is bound.
    pub async fn signal(&self, key: SessionKey, signal: HubSignal) -> bool {
        let tx = match self.state().live.get(&key) {
            Some(conn) => conn.tx.clone(),
            None => return false,
        };
        tx.send(signal).await.is_ok()
    }

    pub fn live_sessions(&self) -> Vec<LiveSessionInfo> {
        let hub = self.state();
        let mut sessions: Vec<LiveSessionInfo> = hub
            .live
            .iter()
            .map(|(key, conn)| LiveSessionInfo {
                exam_id: key.exam_id,
                student_id: key.student_id,
                connected_at: conn.connected_at,
            })
            .collect();
        sessions.sort_by_key(|s| (s.exam_id, s.student_id));
        sessions
    }
}
