// src/client/recovery.rs

//! Decides how a session (re)starts: from data handed over by the exam start
//! call, or rebuilt from the server after a reload.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    client::{
        api::ExamApi,
        store::LocalAnswerStore,
        transport::{self, ProbeOutcome},
    },
    config::ClientConfig,
    models::{
        exam::{EnterExamResponse, ExamPayload, ExamQuestion},
        session::{SessionKey, SessionStatus},
    },
    protocol::{self, Hello, RejectReason},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    /// Another device or tab holds the live connection for this session.
    SessionActiveElsewhere,
    /// The question set could not be rebuilt.
    RecoveryFailed,
    AlreadyClosed(SessionStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Fresh,
    Recovering,
    Ready,
    /// Terminal. The only way out is leaving the exam.
    Blocked(BlockReason),
}

/// Start data passed straight from the exam start call.
#[derive(Debug, Clone)]
pub struct Handoff {
    pub status: SessionStatus,
    pub transport_address: String,
    pub payload: ExamPayload,
}

impl Handoff {
    /// `None` unless the entry response carried the question payload.
    pub fn from_entry(resp: EnterExamResponse) -> Option<Self> {
        Some(Self {
            status: resp.status,
            transport_address: resp.transport_address,
            payload: resp.payload?,
        })
    }
}

/// Everything the session loop needs, hydrated and ready to render.
pub struct ReadySession {
    pub key: SessionKey,
    pub token: String,
    pub status: SessionStatus,
    pub duration_minutes: i64,
    pub transport_address: String,
    pub questions: Vec<ExamQuestion>,
    pub store: LocalAnswerStore,
}

/// Shown in place of the exam when recovery fails.
pub fn placeholder_question() -> ExamQuestion {
    ExamQuestion {
        id: 0,
        content: "This exam could not be restored. Return to the exam list and enter it again."
            .to_string(),
        question_type: "notice".to_string(),
        order: 0,
        options: Vec::new(),
    }
}

pub struct RecoveryController<'a> {
    api: &'a dyn ExamApi,
    key: SessionKey,
    token: String,
    config: &'a ClientConfig,
    phase: RecoveryPhase,
}

impl<'a> RecoveryController<'a> {
    pub fn new(
        api: &'a dyn ExamApi,
        key: SessionKey,
        token: impl Into<String>,
        config: &'a ClientConfig,
    ) -> Self {
        Self {
            api,
            key,
            token: token.into(),
            config,
            phase: RecoveryPhase::Recovering,
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub async fn run(&mut self, handoff: Option<Handoff>) -> Result<ReadySession, BlockReason> {
        let result = match handoff {
            Some(handoff) => {
                self.phase = RecoveryPhase::Fresh;
                self.hydrate(handoff.status, handoff.transport_address, handoff.payload)
            }
            None => {
                self.phase = RecoveryPhase::Recovering;
                self.recover().await
            }
        };
        self.phase = match &result {
            Ok(_) => RecoveryPhase::Ready,
            Err(reason) => {
                warn!(key = %self.key, ?reason, "session blocked");
                RecoveryPhase::Blocked(*reason)
            }
        };
        result
    }

    async fn recover(&self) -> Result<ReadySession, BlockReason> {
        let entry = self.api.enter_exam(self.key.exam_id).await.map_err(|err| {
            warn!(%err, "exam entry failed during recovery");
            BlockReason::RecoveryFailed
        })?;

        if entry.status.is_terminal() {
            return Err(BlockReason::AlreadyClosed(entry.status));
        }

        // Never started: same as a fresh start.
        if entry.status == SessionStatus::Create {
            if let Some(handoff) = Handoff::from_entry(entry.clone()) {
                info!(key = %self.key, "exam not started yet; starting fresh");
                return self.hydrate(handoff.status, handoff.transport_address, handoff.payload);
            }
        }

        if entry.status == SessionStatus::InProgress {
            self.guard(&entry.transport_address).await?;
        }

        let payload = match entry.payload {
            Some(payload) => payload,
            None => self
                .api
                .fetch_questions(self.key.exam_id)
                .await
                .map_err(|err| {
                    warn!(%err, "question payload fallback failed");
                    BlockReason::RecoveryFailed
                })?,
        };
        self.hydrate(entry.status, entry.transport_address, payload)
    }

    /// Duplicate-session guard.
    async fn guard(&self, address: &str) -> Result<(), BlockReason> {
        let hello = Hello {
            protocol_version: protocol::PROTOCOL_VERSION,
            exam_id: self.key.exam_id,
            student_id: self.key.student_id,
            token: self.token.clone(),
            probe: true,
        };
        match transport::probe(address, &hello, self.config.transport.connect_timeout).await {
            Ok(ProbeOutcome::Available { .. }) => Ok(()),
            Ok(ProbeOutcome::Rejected(RejectReason::AlreadyConnected)) => {
                Err(BlockReason::SessionActiveElsewhere)
            }
            Ok(ProbeOutcome::Rejected(RejectReason::SessionClosed)) => {
                Err(BlockReason::AlreadyClosed(SessionStatus::Completed))
            }
            Ok(ProbeOutcome::Rejected(reason)) => {
                warn!(?reason, "probe rejected");
                Err(BlockReason::RecoveryFailed)
            }
            // The hub still refuses a second binding, so an unreachable hub is not fatal here.
            Err(err) => {
                warn!(%err, "session probe failed; continuing");
                Ok(())
            }
        }
    }

    fn hydrate(
        &self,
        status: SessionStatus,
        transport_address: String,
        payload: ExamPayload,
    ) -> Result<ReadySession, BlockReason> {
        if payload.questions.is_empty() {
            warn!(key = %self.key, "exam has no questions");
            return Err(BlockReason::RecoveryFailed);
        }
        let mut questions = payload.questions;
        questions.sort_by_key(|q| q.order);

        let mut store = match &self.config.store_dir {
            Some(dir) => LocalAnswerStore::open(dir, self.key),
            None => LocalAnswerStore::in_memory(self.key),
        };
        let ids: HashSet<i64> = questions.iter().map(|q| q.id).collect();
        let dropped = store.retain_questions(&ids);
        if dropped > 0 {
            warn!(dropped, "discarded stored answers for unknown questions");
        }

        Ok(ReadySession {
            key: self.key,
            token: self.token.clone(),
            status,
            duration_minutes: payload.duration_minutes,
            transport_address,
            questions,
            store,
        })
    }
}
