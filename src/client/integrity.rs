// src/client/integrity.rs

//! Focus, visibility and full-screen tracking for a running exam.
//!
//! Violations are counted and reported; they never end the session on their
//! own. Escalation is a proctor decision.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::protocol::ViolationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntegrityAlert {
    FocusLoss { duration_ms: u64 },
    LeftPage,
}

impl IntegrityAlert {
    pub fn kind(self) -> ViolationKind {
        match self {
            IntegrityAlert::FocusLoss { .. } => ViolationKind::FocusLoss,
            IntegrityAlert::LeftPage => ViolationKind::LeftPage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FullscreenGate {
    RequiredEntry,
    RequiredReentry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityState {
    pub violation_count: u32,
    pub active_alert: Option<IntegrityAlert>,
    pub fullscreen_gate: Option<FullscreenGate>,
}

/// What the UI should show right now. The gate wins over alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityView {
    Clear,
    FocusLossAlert(u64),
    LeftPageAlert,
    FullscreenGate(FullscreenGate),
}

pub struct IntegrityMonitor {
    state: IntegrityState,
    threshold: Duration,
    focus_lost_at: Option<Instant>,
    /// Whether the current focus loss has already been counted.
    focus_loss_reported: bool,
    page_hidden: bool,
}

impl IntegrityMonitor {
    /// A new monitor requires full-screen before the exam is usable.
    pub fn new(threshold: Duration) -> Self {
        Self {
            state: IntegrityState {
                fullscreen_gate: Some(FullscreenGate::RequiredEntry),
                ..IntegrityState::default()
            },
            threshold,
            focus_lost_at: None,
            focus_loss_reported: false,
            page_hidden: false,
        }
    }

    pub fn state(&self) -> &IntegrityState {
        &self.state
    }

    pub fn violation_count(&self) -> u32 {
        self.state.violation_count
    }

    pub fn view(&self) -> IntegrityView {
        if let Some(gate) = self.state.fullscreen_gate {
            return IntegrityView::FullscreenGate(gate);
        }
        match self.state.active_alert {
            Some(IntegrityAlert::FocusLoss { duration_ms }) => {
                IntegrityView::FocusLossAlert(duration_ms)
            }
            Some(IntegrityAlert::LeftPage) => IntegrityView::LeftPageAlert,
            None => IntegrityView::Clear,
        }
    }

    /// True while the student may not interact with questions.
    pub fn is_blocking(&self) -> bool {
        self.view() != IntegrityView::Clear
    }

    pub fn fullscreen_entered(&mut self) {
        self.state.fullscreen_gate = None;
    }

    pub fn fullscreen_exited(&mut self) {
        self.state.fullscreen_gate = Some(FullscreenGate::RequiredReentry);
    }

    pub fn focus_lost(&mut self, now: Instant) {
        if self.focus_lost_at.is_none() {
            self.focus_lost_at = Some(now);
            self.focus_loss_reported = false;
        }
    }

    /// Focus came back. Raises an alert if the loss outlasted the threshold
    /// and was not already reported while it was ongoing.
    pub fn focus_regained(&mut self, now: Instant) -> Option<IntegrityAlert> {
        let alert = self.check_focus(now);
        self.focus_lost_at = None;
        self.focus_loss_reported = false;
        alert
    }

    /// Periodic check so a long loss is reported while it is still ongoing.
    pub fn poll(&mut self, now: Instant) -> Option<IntegrityAlert> {
        self.check_focus(now)
    }

    fn check_focus(&mut self, now: Instant) -> Option<IntegrityAlert> {
        let lost_at = self.focus_lost_at?;
        if self.focus_loss_reported {
            return None;
        }
        let away = now.saturating_duration_since(lost_at);
        if away < self.threshold {
            return None;
        }
        self.focus_loss_reported = true;
        Some(self.raise(IntegrityAlert::FocusLoss {
            duration_ms: away.as_millis() as u64,
        }))
    }

    /// The page went to the background (tab switch, minimise, navigation).
    pub fn page_hidden(&mut self) -> Option<IntegrityAlert> {
        if self.page_hidden {
            return None;
        }
        self.page_hidden = true;
        Some(self.raise(IntegrityAlert::LeftPage))
    }

    pub fn page_visible(&mut self) {
        self.page_hidden = false;
    }

    /// Student dismissed the alert. Returns false if there was none.
    pub fn acknowledge(&mut self) -> bool {
        self.state.active_alert.take().is_some()
    }

    fn raise(&mut self, alert: IntegrityAlert) -> IntegrityAlert {
        self.state.violation_count += 1;
        self.state.active_alert = Some(alert);
        tracing::info!(?alert, count = self.state.violation_count, "integrity violation");
        alert
    }
}
