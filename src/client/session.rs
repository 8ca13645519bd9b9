// src/client/session.rs

//! The running exam.
//!
//! [`SessionCore`] is the synchronous state machine: every input (UI
//! command, transport event, one-second tick) produces an [`Output`] of
//! frames to send and updates to render. [`ExamSession`] owns a core and a
//! transport in one task and feeds it with `tokio::select!`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    client::{
        clock::{ClockEvent, SessionClock},
        integrity::{IntegrityAlert, IntegrityMonitor, IntegrityState},
        recovery::{BlockReason, ReadySession},
        store::AnswerEntry,
        submission::{FinalReport, SubmissionController, SubmissionPhase, TerminalScreen},
        sync::{AnswerSyncEngine, RawSelection},
        transport::{ConnectionState, SessionTransport, TransportEvent},
    },
    config::ClientConfig,
    error::ClientError,
    models::session::{SessionKey, SessionStatus},
    protocol::{
        self, ClientMessage, ErrorMessage, Hello, IntegrityReport, RejectReason, ServerMessage,
        SubmitReason, codes,
    },
};

/// Something the student did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Answer {
        question_id: i64,
        order: i64,
        selection: RawSelection,
    },
    OpenSubmitConfirmation,
    CancelSubmitConfirmation,
    ConfirmSubmit,
    FocusLost,
    FocusRegained,
    FullscreenEntered,
    FullscreenExited,
    PageHidden,
    PageVisible,
    AcknowledgeAlert,
    /// Retry after the transport gave up.
    Reconnect,
    /// Navigating away. Reported, not submitted.
    Leave,
}

/// Something the UI should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UiUpdate {
    Connection(ConnectionState),
    Clock { formatted: String, seconds_left: i64 },
    TimeWarning { checkpoint_seconds: i64 },
    Answer { question_id: i64, entry: AnswerEntry },
    Integrity(IntegrityState),
    ConfirmationOpen(bool),
    Blocked(BlockReason),
    Terminal(TerminalScreen),
    Notice(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Closed(TerminalScreen),
    Blocked(BlockReason),
    /// Left without submitting; the session can be resumed.
    Abandoned,
}

#[derive(Debug, Default)]
pub struct Output {
    pub outbound: Vec<ClientMessage>,
    pub updates: Vec<UiUpdate>,
    pub reconnect: bool,
    pub finished: Option<SessionOutcome>,
}

impl Output {
    fn notice(mut self, err: ClientError) -> Self {
        self.updates.push(UiUpdate::Notice(err.to_string()));
        self
    }
}

pub struct SessionCore {
    key: SessionKey,
    engine: AnswerSyncEngine,
    clock: SessionClock,
    integrity: IntegrityMonitor,
    submission: SubmissionController,
    connection: ConnectionState,
    finished: bool,
}

impl SessionCore {
    pub fn new(ready: ReadySession, config: &ClientConfig, now: DateTime<Utc>) -> Self {
        let ReadySession {
            key,
            status,
            duration_minutes,
            questions,
            mut store,
            ..
        } = ready;

        let started_at = match store.started_at() {
            Some(at) => at,
            None => {
                store.set_started_at(now);
                now
            }
        };
        let clock = SessionClock::start(
            duration_minutes,
            started_at,
            now,
            &config.warning_checkpoints,
        );

        let mut submission = SubmissionController::new(status);
        submission.enter();

        let ids: HashSet<i64> = questions.iter().map(|q| q.id).collect();
        Self {
            key,
            engine: AnswerSyncEngine::new(store, ids),
            clock,
            integrity: IntegrityMonitor::new(config.focus_loss_threshold),
            submission,
            connection: ConnectionState::Disconnected,
            finished: false,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn status(&self) -> SessionStatus {
        self.submission.status()
    }

    pub fn entry(&self, question_id: i64) -> Option<&AnswerEntry> {
        self.engine.entry(question_id)
    }

    pub fn seconds_left(&self) -> i64 {
        self.clock.seconds_left()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Everything the UI needs to draw the first frame.
    pub fn initial_updates(&self) -> Vec<UiUpdate> {
        let mut updates = vec![UiUpdate::Connection(self.connection), self.clock_update()];
        updates.extend(
            self.engine
                .store()
                .answers()
                .iter()
                .map(|(question_id, entry)| UiUpdate::Answer {
                    question_id: *question_id,
                    entry: entry.clone(),
                }),
        );
        updates.push(UiUpdate::Integrity(self.integrity.state().clone()));
        updates
    }

    pub fn on_command(&mut self, command: UiCommand, now: Instant) -> Output {
        let mut out = Output::default();
        if self.finished {
            return out;
        }
        match command {
            UiCommand::Answer {
                question_id,
                order,
                selection,
            } => {
                if !self.submission.accepts_edits() {
                    return out.notice(ClientError::SessionClosed);
                }
                if self.integrity.is_blocking() {
                    return out.notice(ClientError::InteractionBlocked);
                }
                match self.engine.handle_user_answer(question_id, order, &selection) {
                    Ok((entry, msg)) => {
                        out.outbound.push(msg);
                        out.updates.push(UiUpdate::Answer { question_id, entry });
                    }
                    Err(err) => return out.notice(err),
                }
            }
            UiCommand::OpenSubmitConfirmation => {
                if self.integrity.is_blocking() {
                    return out.notice(ClientError::InteractionBlocked);
                }
                match self.submission.open_confirmation() {
                    Ok(()) => out.updates.push(UiUpdate::ConfirmationOpen(true)),
                    Err(err) => return out.notice(err),
                }
            }
            UiCommand::CancelSubmitConfirmation => {
                self.submission.cancel_confirmation();
                out.updates.push(UiUpdate::ConfirmationOpen(false));
            }
            UiCommand::ConfirmSubmit => {
                match self.submission.confirm(self.integrity.violation_count()) {
                    Ok(msg) => {
                        out.outbound.push(msg);
                        out.updates.push(UiUpdate::ConfirmationOpen(false));
                    }
                    Err(err) => return out.notice(err),
                }
            }
            UiCommand::FocusLost => {
                self.integrity.focus_lost(now);
            }
            UiCommand::FocusRegained => {
                let alert = self.integrity.focus_regained(now);
                self.report(alert, &mut out);
            }
            UiCommand::FullscreenEntered => {
                self.integrity.fullscreen_entered();
                self.push_integrity(&mut out);
            }
            UiCommand::FullscreenExited => {
                self.integrity.fullscreen_exited();
                self.push_integrity(&mut out);
            }
            UiCommand::PageHidden => {
                let alert = self.integrity.page_hidden();
                self.report(alert, &mut out);
            }
            UiCommand::PageVisible => {
                self.integrity.page_visible();
            }
            UiCommand::AcknowledgeAlert => {
                if self.integrity.acknowledge() {
                    self.push_integrity(&mut out);
                }
            }
            UiCommand::Reconnect => {
                out.reconnect = true;
            }
            UiCommand::Leave => {
                let alert = self.integrity.page_hidden();
                self.report(alert, &mut out);
                info!(key = %self.key, "left the exam without submitting");
                self.finished = true;
                out.finished = Some(SessionOutcome::Abandoned);
            }
        }
        out
    }

    pub fn on_transport(&mut self, event: TransportEvent, now: DateTime<Utc>) -> Output {
        let mut out = Output::default();
        if self.finished {
            return out;
        }
        match event {
            TransportEvent::State(state) => {
                self.connection = state;
                out.updates.push(UiUpdate::Connection(state));
            }
            TransportEvent::Rejected(reason) => self.on_rejected(reason, &mut out),
            TransportEvent::Inbound(msg) => self.on_message(msg, now, &mut out),
        }
        out
    }

    /// One second of wall time passed.
    pub fn on_tick(&mut self, now: Instant) -> Output {
        let mut out = Output::default();
        if self.finished {
            return out;
        }
        let events = self.clock.tick();
        out.updates.push(self.clock_update());
        self.apply_clock(events, &mut out);
        let alert = self.integrity.poll(now);
        self.report(alert, &mut out);
        out
    }

    fn on_message(&mut self, msg: ServerMessage, now: DateTime<Utc>, out: &mut Output) {
        match msg {
            ServerMessage::Welcome(welcome) => {
                let events = self.clock.set_remaining_seconds(welcome.remaining_seconds, now);
                out.updates.push(self.clock_update());
                // Fresh connection: everything unconfirmed goes out again.
                out.outbound.extend(self.engine.pending_messages());
                out.outbound
                    .extend(self.submission.resend(self.integrity.violation_count()));
                self.apply_clock(events, out);
            }
            ServerMessage::TimeSync(sync) => {
                let events = self.clock.set_remaining_seconds(sync.remaining_seconds, now);
                out.updates.push(self.clock_update());
                self.apply_clock(events, out);
            }
            ServerMessage::AnswerAck(ack) => {
                if let Some(entry) = self.engine.on_ack(&ack) {
                    out.updates.push(UiUpdate::Answer {
                        question_id: ack.question_id,
                        entry,
                    });
                }
            }
            ServerMessage::Snapshot(snapshot) => {
                for (question_id, entry) in self.engine.on_snapshot(&snapshot) {
                    out.updates.push(UiUpdate::Answer { question_id, entry });
                }
            }
            ServerMessage::ForceSubmit(force) => {
                if self.submission.on_force_submit(&force.reason).is_some() {
                    self.finish(out);
                }
            }
            ServerMessage::SubmitAck(ack) => {
                if self.submission.on_submit_ack(ack.status).is_some() {
                    self.finish(out);
                }
            }
            ServerMessage::Error(err) => log_server_error(&err),
            ServerMessage::Rejected(rejection) => self.on_rejected(rejection.reason, out),
        }
    }

    fn on_rejected(&mut self, reason: RejectReason, out: &mut Output) {
        match reason {
            RejectReason::AlreadyConnected => self.block(BlockReason::SessionActiveElsewhere, out),
            RejectReason::SessionClosed => {
                // Closed while we were away; infer how from what we know locally.
                let status = match self.submission.phase() {
                    SubmissionPhase::Submitting(SubmitReason::Manual) => SessionStatus::Completed,
                    SubmissionPhase::Submitting(SubmitReason::Expired) => SessionStatus::Expired,
                    _ if self.clock.has_expired() => SessionStatus::Expired,
                    _ => SessionStatus::ForceSubmitted,
                };
                if self.submission.on_submit_ack(status).is_some() {
                    self.finish(out);
                }
            }
            other => {
                warn!(reason = ?other, key = %self.key, "session rejected");
                self.block(BlockReason::RecoveryFailed, out);
            }
        }
    }

    fn apply_clock(&mut self, events: Vec<ClockEvent>, out: &mut Output) {
        for event in events {
            match event {
                ClockEvent::Warning { checkpoint_seconds } => {
                    out.updates.push(UiUpdate::TimeWarning { checkpoint_seconds });
                }
                ClockEvent::Expired => {
                    info!(key = %self.key, "time is up; submitting");
                    if let Some(msg) = self.submission.on_expired(self.integrity.violation_count())
                    {
                        out.outbound.push(msg);
                        out.updates.push(UiUpdate::ConfirmationOpen(false));
                    }
                }
            }
        }
    }

    fn report(&self, alert: Option<IntegrityAlert>, out: &mut Output) {
        if let Some(alert) = alert {
            out.outbound.push(ClientMessage::IntegrityReport(IntegrityReport {
                violation_count: self.integrity.violation_count(),
                kind: alert.kind(),
            }));
            self.push_integrity(out);
        }
    }

    fn push_integrity(&self, out: &mut Output) {
        out.updates
            .push(UiUpdate::Integrity(self.integrity.state().clone()));
    }

    fn clock_update(&self) -> UiUpdate {
        UiUpdate::Clock {
            formatted: self.clock.formatted_time(),
            seconds_left: self.clock.seconds_left(),
        }
    }

    fn finish(&mut self, out: &mut Output) {
        self.clock.stop();
        self.engine.lock();
        let report = FinalReport {
            answers: self.engine.final_answers(),
            violation_count: self.integrity.violation_count(),
        };
        self.engine.discard_persisted();
        self.finished = true;
        if let Some(screen) = self.submission.terminal_screen(report) {
            out.updates.push(UiUpdate::Terminal(screen.clone()));
            out.finished = Some(SessionOutcome::Closed(screen));
        }
    }

    fn block(&mut self, reason: BlockReason, out: &mut Output) {
        self.clock.stop();
        self.engine.lock();
        self.finished = true;
        out.updates.push(UiUpdate::Blocked(reason));
        out.finished = Some(SessionOutcome::Blocked(reason));
    }
}

fn log_server_error(err: &ErrorMessage) {
    match err.code.as_str() {
        codes::VALIDATION | codes::UNKNOWN_QUESTION | codes::TIME_EXPIRED => {
            debug!(code = %err.code, question_id = ?err.question_id, "{}", err.message);
        }
        _ => warn!(code = %err.code, "server error: {}", err.message),
    }
}

/// Handle to a running exam.
pub struct ExamSession {
    commands: mpsc::UnboundedSender<UiCommand>,
    task: JoinHandle<SessionOutcome>,
}

impl ExamSession {
    /// Connects to the hub and starts the event loop.
    pub fn start(
        ready: ReadySession,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<UiUpdate>) {
        let hello = Hello {
            protocol_version: protocol::PROTOCOL_VERSION,
            exam_id: ready.key.exam_id,
            student_id: ready.key.student_id,
            token: ready.token.clone(),
            probe: false,
        };
        let address = ready.transport_address.clone();
        let core = SessionCore::new(ready, &config, Utc::now());
        let (transport, events) = SessionTransport::spawn(address, hello, config.transport);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (update_tx, updates) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(core, transport, events, command_rx, update_tx));
        (Self { commands, task }, updates)
    }

    /// False once the session has ended.
    pub fn send(&self, command: UiCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub async fn finished(self) -> SessionOutcome {
        drop(self.commands);
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(?err, "session task failed");
                SessionOutcome::Abandoned
            }
        }
    }
}

async fn run(
    mut core: SessionCore,
    transport: SessionTransport,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<UiCommand>,
    updates: mpsc::UnboundedSender<UiUpdate>,
) -> SessionOutcome {
    for update in core.initial_updates() {
        let _ = updates.send(update);
    }

    let period = Duration::from_secs(1);
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let out = tokio::select! {
            _ = ticker.tick() => core.on_tick(Instant::now()),
            Some(event) = events.recv() => core.on_transport(event, Utc::now()),
            command = commands.recv() => {
                let command = command.unwrap_or(UiCommand::Leave);
                core.on_command(command, Instant::now())
            }
        };

        for msg in out.outbound {
            match msg {
                ClientMessage::SubmitAnswer(answer) => {
                    transport.send_answer(answer.question_id, answer.order, answer.answer)
                }
                ClientMessage::RequestSubmit(request) => transport.request_submit(request),
                other => transport.send(other),
            }
        }
        if out.reconnect {
            transport.reconnect();
        }
        for update in out.updates {
            let _ = updates.send(update);
        }
        if let Some(outcome) = out.finished {
            transport.close().await;
            return outcome;
        }
    }
}
