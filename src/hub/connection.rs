// src/hub/connection.rs

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::{
    config::{EXPIRY_GRACE_SECONDS, HELLO_TIMEOUT_SECS, MAX_ANSWER_BYTES, TIME_SYNC_INTERVAL_SECS},
    error::HubError,
    hub::{registry::HubSignal, store},
    models::session::{SessionKey, SessionStatus, remaining_seconds},
    protocol::{
        self, AnswerPayload, ClientMessage, ErrorMessage, ForceSubmit, Hello, PROTOCOL_VERSION,
        RejectReason, Rejection, ServerMessage, Snapshot, SnapshotEntry, SubmitAck, SubmitReason,
        SubmitRequest, TimeSync, Welcome, codes,
    },
    state::AppState,
    utils::jwt::{ROLE_STUDENT, verify_jwt},
};

type Wire = Framed<TcpStream, LinesCodec>;

async fn send(wire: &mut Wire, msg: &ServerMessage) -> Result<(), HubError> {
    wire.send(protocol::encode(msg)?).await?;
    Ok(())
}

async fn reject(wire: &mut Wire, peer: SocketAddr, reason: RejectReason) {
    debug!(?peer, ?reason, "rejecting connection");
    let _ = send(wire, &ServerMessage::Rejected(Rejection { reason })).await;
}

/// Drives one client connection from hello to close.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: AppState) {
    let mut wire = Framed::new(stream, protocol::codec());

    let hello = match time::timeout(Duration::from_secs(HELLO_TIMEOUT_SECS), wire.next()).await {
        Ok(Some(Ok(line))) => match protocol::decode::<ClientMessage>(&line) {
            Ok(ClientMessage::Hello(hello)) => hello,
            Ok(_) | Err(_) => {
                reject(&mut wire, peer, RejectReason::Malformed).await;
                return;
            }
        },
        Ok(Some(Err(err))) => {
            warn!(?peer, ?err, "bad frame before hello");
            return;
        }
        Ok(None) => return,
        Err(_) => {
            debug!(?peer, "hello timed out");
            return;
        }
    };

    let key = match authorize(&state, &hello) {
        Ok(key) => key,
        Err(reason) => {
            reject(&mut wire, peer, reason).await;
            return;
        }
    };

    let assignment = match store::load_assignment(&state.pool, key).await {
        Ok(Some(a)) if !a.status().is_terminal() => a,
        Ok(Some(_)) => {
            reject(&mut wire, peer, RejectReason::SessionClosed).await;
            return;
        }
        Ok(None) => {
            reject(&mut wire, peer, RejectReason::NotFound).await;
            return;
        }
        Err(err) => {
            tracing::error!(%key, ?err, "failed to load assignment");
            return;
        }
    };

    if hello.probe {
        let reply = if state.hub.is_live(key) {
            ServerMessage::Rejected(Rejection {
                reason: RejectReason::AlreadyConnected,
            })
        } else {
            ServerMessage::Welcome(Welcome {
                remaining_seconds: remaining_seconds(
                    assignment.duration_minutes,
                    assignment.started_at,
                    Utc::now(),
                ),
            })
        };
        let _ = send(&mut wire, &reply).await;
        return;
    }

    let (binding, signals) = match state.hub.bind(key) {
        Ok(bound) => bound,
        Err(_) => {
            warn!(%key, ?peer, "second connection for a live session");
            reject(&mut wire, peer, RejectReason::AlreadyConnected).await;
            return;
        }
    };

    let conn_id = binding.conn_id();
    info!(%key, ?peer, conn_id, "session connected");
    match run_session(&mut wire, &state, key, signals).await {
        Ok(()) => info!(%key, conn_id, "session connection closed"),
        Err(err) => warn!(%key, conn_id, %err, "session connection dropped"),
    }
    drop(binding);
}

fn authorize(state: &AppState, hello: &Hello) -> Result<SessionKey, RejectReason> {
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(RejectReason::UnsupportedVersion);
    }
    let claims = verify_jwt(&hello.token, &state.config.jwt_secret)
        .map_err(|_| RejectReason::Unauthorized)?;
    if claims.role != ROLE_STUDENT || claims.sub != hello.student_id.to_string() {
        return Err(RejectReason::Unauthorized);
    }
    Ok(SessionKey::new(hello.exam_id, hello.student_id))
}

async fn run_session(
    wire: &mut Wire,
    state: &AppState,
    key: SessionKey,
    mut signals: mpsc::Receiver<HubSignal>,
) -> Result<(), HubError> {
    let Some(assignment) = store::mark_in_progress(&state.pool, key, Utc::now()).await? else {
        return Ok(());
    };
    if assignment.status() != SessionStatus::InProgress {
        // Closed between the lookup and the bind.
        send(
            wire,
            &ServerMessage::Rejected(Rejection {
                reason: RejectReason::SessionClosed,
            }),
        )
        .await?;
        return Ok(());
    }
    let duration = assignment.duration_minutes;
    let started_at = assignment.started_at;
    let remaining = || remaining_seconds(duration, started_at, Utc::now());

    send(
        wire,
        &ServerMessage::Welcome(Welcome {
            remaining_seconds: remaining(),
        }),
    )
    .await?;
    let entries = store::load_snapshot(&state.pool, key).await?;
    send(wire, &ServerMessage::Snapshot(Snapshot { entries })).await?;

    let mut ticker = time::interval(Duration::from_secs(TIME_SYNC_INTERVAL_SECS));
    let mut zero_ticks: i64 = 0;
    let idle_timeout = Duration::from_secs(state.config.hub_idle_timeout_secs);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    warn!(%key, ?idle_timeout, "client went silent; releasing session");
                    return Ok(());
                }
                let remaining_seconds = remaining();
                send(wire, &ServerMessage::TimeSync(TimeSync { remaining_seconds })).await?;
                if remaining_seconds == 0 {
                    zero_ticks += 1;
                    if zero_ticks * TIME_SYNC_INTERVAL_SECS as i64 >= EXPIRY_GRACE_SECONDS {
                        info!(%key, "time ran out without a submit; closing as expired");
                        let reply = close(state, key, SessionStatus::Expired, None).await?;
                        send(wire, &reply).await?;
                        return Ok(());
                    }
                }
            }
            signal = signals.recv() => match signal {
                Some(HubSignal::ForceSubmit { reason }) => {
                    info!(%key, %reason, "forwarding force submit");
                    send(wire, &ServerMessage::ForceSubmit(ForceSubmit { reason })).await?;
                    return Ok(());
                }
                None => return Ok(()),
            },
            frame = wire.next() => {
                let line = match frame {
                    Some(line) => line?,
                    None => return Ok(()),
                };
                last_seen = Instant::now();
                let msg = match protocol::decode::<ClientMessage>(&line) {
                    Ok(msg) => msg,
                    Err(err) => {
                        debug!(%key, %err, "undecodable client frame");
                        send(wire, &error_message(codes::MALFORMED, err.to_string(), None)).await?;
                        continue;
                    }
                };
                match msg {
                    ClientMessage::SubmitAnswer(answer) => {
                        let reply = accept_answer(state, key, answer, remaining()).await?;
                        let closed = matches!(
                            reply,
                            ServerMessage::ForceSubmit(_) | ServerMessage::SubmitAck(_)
                        );
                        send(wire, &reply).await?;
                        if closed {
                            return Ok(());
                        }
                    }
                    ClientMessage::RequestSubmit(request) => {
                        let reply = submit(state, key, &request, remaining()).await?;
                        send(wire, &reply).await?;
                        return Ok(());
                    }
                    ClientMessage::IntegrityReport(report) => {
                        debug!(%key, kind = ?report.kind, count = report.violation_count, "integrity report");
                        store::record_violations(&state.pool, key, i64::from(report.violation_count)).await?;
                    }
                    ClientMessage::Heartbeat => {}
                    ClientMessage::Hello(_) => {
                        send(wire, &error_message(codes::MALFORMED, "already greeted".into(), None)).await?;
                    }
                }
            }
        }
    }
}

fn error_message(code: &str, message: String, question_id: Option<i64>) -> ServerMessage {
    ServerMessage::Error(ErrorMessage {
        code: code.to_string(),
        message,
        question_id,
    })
}

async fn accept_answer(
    state: &AppState,
    key: SessionKey,
    answer: AnswerPayload,
    remaining: i64,
) -> Result<ServerMessage, HubError> {
    let question_id = Some(answer.question_id);
    if remaining == 0 {
        return Ok(error_message(
            codes::TIME_EXPIRED,
            "time is up".into(),
            question_id,
        ));
    }
    if answer.answer.len() > MAX_ANSWER_BYTES {
        return Ok(error_message(
            codes::VALIDATION,
            format!("answer longer than {} bytes", MAX_ANSWER_BYTES),
            question_id,
        ));
    }
    if !store::question_in_exam(&state.pool, key.exam_id, answer.question_id).await? {
        return Ok(error_message(
            codes::UNKNOWN_QUESTION,
            format!("question {} is not part of exam {}", answer.question_id, key.exam_id),
            question_id,
        ));
    }

    let entry = SnapshotEntry {
        question_id: answer.question_id,
        order: answer.order,
        answer: answer.answer,
    };
    if !store::upsert_answer(&state.pool, key, &entry, Utc::now()).await? {
        info!(%key, question_id = entry.question_id, "answer arrived after close; refused");
        return outcome(state, key, SessionStatus::ForceSubmitted).await;
    }
    Ok(ServerMessage::AnswerAck(protocol::AnswerAck {
        question_id: entry.question_id,
        answer: entry.answer,
    }))
}

async fn submit(
    state: &AppState,
    key: SessionKey,
    request: &SubmitRequest,
    remaining: i64,
) -> Result<ServerMessage, HubError> {
    let status = match request.reason {
        SubmitReason::Expired => SessionStatus::Expired,
        SubmitReason::Manual if remaining == 0 => SessionStatus::Expired,
        SubmitReason::Manual => SessionStatus::Completed,
    };
    close(state, key, status, Some(i64::from(request.violation_count))).await
}

/// Finalizes the attempt and builds the reply for the client. If another
/// finalizer got there first, the reply reflects the stored outcome.
async fn close(
    state: &AppState,
    key: SessionKey,
    status: SessionStatus,
    violation_count: Option<i64>,
) -> Result<ServerMessage, HubError> {
    store::finalize(&state.pool, key, status, None, violation_count, Utc::now()).await?;
    outcome(state, key, status).await
}

/// How a closed attempt ended, as the client should hear it. `fallback` is
/// used only if the row has vanished.
async fn outcome(
    state: &AppState,
    key: SessionKey,
    fallback: SessionStatus,
) -> Result<ServerMessage, HubError> {
    let stored = store::load_assignment(&state.pool, key).await?;
    Ok(match stored {
        Some(a) if a.status() == SessionStatus::ForceSubmitted => {
            ServerMessage::ForceSubmit(ForceSubmit {
                reason: a.force_reason.unwrap_or_default(),
            })
        }
        Some(a) => ServerMessage::SubmitAck(SubmitAck { status: a.status() }),
        None => ServerMessage::SubmitAck(SubmitAck { status: fallback }),
    })
}
