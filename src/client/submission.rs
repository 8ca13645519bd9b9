// src/client/submission.rs

//! Owns the terminal state of the session.
//!
//! Manual submit needs a two-step confirmation, timer expiry submits on its
//! own, and a proctor force submit closes the session without asking.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    error::ClientError,
    models::session::SessionStatus,
    protocol::{ClientMessage, SubmitReason, SubmitRequest},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPhase {
    Answering,
    Confirming,
    /// `RequestSubmit` sent, waiting for `SubmitAck`.
    Submitting(SubmitReason),
    Closed(SessionStatus),
}

/// Data handed to grading and audit when the session closes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub answers: BTreeMap<i64, String>,
    pub violation_count: u32,
}

/// What the terminal screen renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalScreen {
    pub status: SessionStatus,
    /// Forced terminations are styled differently from a normal finish.
    pub forced: bool,
    pub reason: Option<String>,
    pub report: FinalReport,
}

pub struct SubmissionController {
    status: SessionStatus,
    phase: SubmissionPhase,
    force_reason: Option<String>,
}

impl SubmissionController {
    pub fn new(status: SessionStatus) -> Self {
        let phase = if status.is_terminal() {
            SubmissionPhase::Closed(status)
        } else {
            SubmissionPhase::Answering
        };
        Self {
            status,
            phase,
            force_reason: None,
        }
    }

    /// The student is now looking at answerable questions.
    pub fn enter(&mut self) {
        if self.status == SessionStatus::Create {
            self.status = SessionStatus::InProgress;
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn phase(&self) -> &SubmissionPhase {
        &self.phase
    }

    pub fn force_reason(&self) -> Option<&str> {
        self.force_reason.as_deref()
    }

    pub fn accepts_edits(&self) -> bool {
        matches!(
            self.phase,
            SubmissionPhase::Answering | SubmissionPhase::Confirming
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, SubmissionPhase::Closed(_))
    }

    /// Step one of a manual submit.
    pub fn open_confirmation(&mut self) -> Result<(), ClientError> {
        match self.phase {
            SubmissionPhase::Answering => {
                self.phase = SubmissionPhase::Confirming;
                Ok(())
            }
            SubmissionPhase::Confirming => Ok(()),
            _ => Err(ClientError::InvalidSubmission),
        }
    }

    pub fn cancel_confirmation(&mut self) {
        if self.phase == SubmissionPhase::Confirming {
            self.phase = SubmissionPhase::Answering;
        }
    }

    /// Step two of a manual submit.
    pub fn confirm(&mut self, violation_count: u32) -> Result<ClientMessage, ClientError> {
        if self.phase != SubmissionPhase::Confirming {
            return Err(ClientError::InvalidSubmission);
        }
        Ok(self.begin(SubmitReason::Manual, violation_count))
    }

    /// The clock ran out. Submits without asking.
    pub fn on_expired(&mut self, violation_count: u32) -> Option<ClientMessage> {
        match self.phase {
            SubmissionPhase::Answering | SubmissionPhase::Confirming => {
                Some(self.begin(SubmitReason::Expired, violation_count))
            }
            _ => None,
        }
    }

    fn begin(&mut self, reason: SubmitReason, violation_count: u32) -> ClientMessage {
        self.phase = SubmissionPhase::Submitting(reason);
        Self::request(reason, violation_count)
    }

    fn request(reason: SubmitReason, violation_count: u32) -> ClientMessage {
        ClientMessage::RequestSubmit(SubmitRequest {
            reason,
            violation_count,
        })
    }

    /// The request again, for a fresh connection.
    pub fn resend(&self, violation_count: u32) -> Option<ClientMessage> {
        match self.phase {
            SubmissionPhase::Submitting(reason) => Some(Self::request(reason, violation_count)),
            _ => None,
        }
    }

    /// The server closed the session. Returns the terminal status if this
    /// transitioned it.
    pub fn on_submit_ack(&mut self, status: SessionStatus) -> Option<SessionStatus> {
        if self.is_closed() || !status.is_terminal() {
            return None;
        }
        Some(self.close(status))
    }

    /// Proctor-initiated and final; cannot be contested from here.
    pub fn on_force_submit(&mut self, reason: &str) -> Option<SessionStatus> {
        if self.is_closed() {
            return None;
        }
        self.force_reason = Some(reason.to_string());
        Some(self.close(SessionStatus::ForceSubmitted))
    }

    fn close(&mut self, status: SessionStatus) -> SessionStatus {
        tracing::info!(%status, "session closed");
        self.status = status;
        self.phase = SubmissionPhase::Closed(status);
        status
    }

    pub fn terminal_screen(&self, report: FinalReport) -> Option<TerminalScreen> {
        match self.phase {
            SubmissionPhase::Closed(status) => Some(TerminalScreen {
                status,
                forced: status == SessionStatus::ForceSubmitted,
                reason: self.force_reason.clone(),
                report,
            }),
            _ => None,
        }
    }
}
