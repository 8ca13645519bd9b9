// src/client/clock.rs

//! Local exam countdown, corrected by the server.
//!
//! The clock ticks once per second on its own. Every `TimeSync` from the
//! server overwrites the local value, whichever direction it moved. Only the
//! start time is persisted, so a reload resumes from elapsed wall time and
//! the next `TimeSync` fixes any drift.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Remaining time crossed a checkpoint (seconds).
    Warning { checkpoint_seconds: i64 },
    /// Time is up. Emitted at most once per session.
    Expired,
}

#[derive(Debug, Clone)]
pub struct SessionClock {
    remaining_seconds: i64,
    last_server_sync_at: Option<DateTime<Utc>>,
    checkpoints: Vec<i64>,
    fired: BTreeSet<i64>,
    expired_fired: bool,
    stopped: bool,
}

impl SessionClock {
    /// Starts (or resumes) a countdown of `initial_minutes` that began at `started_at`.
    ///
    /// Checkpoints already behind us at start are marked as fired without a
    /// warning, so a reload does not replay old alerts.
    pub fn start(
        initial_minutes: i64,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        checkpoints: &[i64],
    ) -> Self {
        let total = initial_minutes.max(0) * 60;
        let elapsed = (now - started_at).num_seconds().max(0);
        let remaining_seconds = (total - elapsed).max(0);
        let fired = checkpoints
            .iter()
            .copied()
            .filter(|cp| remaining_seconds <= *cp)
            .collect();
        Self {
            remaining_seconds,
            last_server_sync_at: None,
            checkpoints: checkpoints.to_vec(),
            fired,
            expired_fired: false,
            stopped: false,
        }
    }

    /// One local second passed.
    pub fn tick(&mut self) -> Vec<ClockEvent> {
        if self.stopped {
            return Vec::new();
        }
        if self.remaining_seconds > 0 {
            self.remaining_seconds -= 1;
        }
        self.evaluate()
    }

    /// Server correction. Applied as-is, never interpolated.
    pub fn set_remaining_seconds(&mut self, seconds: i64, at: DateTime<Utc>) -> Vec<ClockEvent> {
        if self.stopped {
            return Vec::new();
        }
        self.remaining_seconds = seconds.max(0);
        self.last_server_sync_at = Some(at);
        self.evaluate()
    }

    fn evaluate(&mut self) -> Vec<ClockEvent> {
        let mut events = Vec::new();

        // Re-arm checkpoints the server moved us back above.
        let remaining = self.remaining_seconds;
        self.fired.retain(|cp| remaining <= *cp);

        if remaining > 0 {
            let crossed: Vec<i64> = self
                .checkpoints
                .iter()
                .copied()
                .filter(|cp| remaining <= *cp && !self.fired.contains(cp))
                .collect();
            // Jumping past several checkpoints at once only warns about the tightest.
            if let Some(tightest) = crossed.iter().min().copied() {
                events.push(ClockEvent::Warning {
                    checkpoint_seconds: tightest,
                });
            }
            self.fired.extend(crossed);
        }

        if remaining == 0 && !self.expired_fired {
            self.expired_fired = true;
            events.push(ClockEvent::Expired);
        }
        events
    }

    pub fn seconds_left(&self) -> i64 {
        self.remaining_seconds
    }

    /// `MM:SS`, minutes not wrapped at the hour.
    pub fn formatted_time(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.remaining_seconds / 60,
            self.remaining_seconds % 60
        )
    }

    pub fn last_server_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_server_sync_at
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn has_expired(&self) -> bool {
        self.expired_fired
    }
}
