// src/protocol.rs

//! Wire vocabulary of the live exam session.
//!
//! Every frame is one JSON object on its own line, tagged by `type`.
//! Tags are PascalCase with camelCase aliases; fields are camelCase with
//! PascalCase aliases, so either casing decodes.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio_util::codec::LinesCodec;

use crate::models::session::SessionStatus;

/// Bumped whenever a message or field changes meaning.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for a single frame.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Line codec shared by the hub and the client transport.
pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_BYTES)
}

pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line)
}

/// Messages sent by the exam client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(alias = "hello")]
    Hello(Hello),
    #[serde(alias = "submitAnswer")]
    SubmitAnswer(AnswerPayload),
    #[serde(alias = "requestSubmit")]
    RequestSubmit(SubmitRequest),
    #[serde(alias = "integrityReport")]
    IntegrityReport(IntegrityReport),
    /// Keeps the binding alive when the student is idle.
    #[serde(alias = "heartbeat")]
    Heartbeat,
}

/// Messages pushed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(alias = "welcome")]
    Welcome(Welcome),
    #[serde(alias = "rejected")]
    Rejected(Rejection),
    #[serde(alias = "timeSync")]
    TimeSync(TimeSync),
    #[serde(alias = "answerAck")]
    AnswerAck(AnswerAck),
    #[serde(alias = "snapshot")]
    Snapshot(Snapshot),
    #[serde(alias = "forceSubmit")]
    ForceSubmit(ForceSubmit),
    #[serde(alias = "submitAck")]
    SubmitAck(SubmitAck),
    #[serde(alias = "error")]
    Error(ErrorMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(alias = "ProtocolVersion")]
    pub protocol_version: u32,
    #[serde(alias = "ExamId")]
    pub exam_id: i64,
    #[serde(alias = "StudentId")]
    pub student_id: i64,
    #[serde(alias = "Token")]
    pub token: String,
    /// A probe only asks whether the session is free; it never binds.
    #[serde(default, alias = "Probe")]
    pub probe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    #[serde(alias = "QuestionId")]
    pub question_id: i64,
    #[serde(alias = "Order")]
    pub order: i64,
    #[serde(alias = "Answer")]
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitReason {
    #[serde(alias = "manual")]
    Manual,
    #[serde(alias = "expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(alias = "Reason")]
    pub reason: SubmitReason,
    #[serde(default, alias = "ViolationCount")]
    pub violation_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    #[serde(alias = "focusLoss")]
    FocusLoss,
    #[serde(alias = "leftPage")]
    LeftPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    #[serde(alias = "ViolationCount")]
    pub violation_count: u32,
    #[serde(alias = "Kind")]
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    #[serde(alias = "RemainingSeconds")]
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Another connection is already bound to this (exam, student) pair.
    #[serde(alias = "alreadyConnected")]
    AlreadyConnected,
    #[serde(alias = "unauthorized")]
    Unauthorized,
    #[serde(alias = "sessionClosed")]
    SessionClosed,
    #[serde(alias = "notFound")]
    NotFound,
    #[serde(alias = "unsupportedVersion")]
    UnsupportedVersion,
    #[serde(alias = "malformed")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    #[serde(alias = "Reason")]
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSync {
    #[serde(alias = "RemainingSeconds")]
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerAck {
    #[serde(alias = "QuestionId")]
    pub question_id: i64,
    /// The exact answer text that was stored.
    #[serde(alias = "Answer")]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    #[serde(alias = "QuestionId")]
    pub question_id: i64,
    #[serde(alias = "Order")]
    pub order: i64,
    #[serde(alias = "Answer")]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, alias = "Entries")]
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSubmit {
    #[serde(alias = "Reason")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    #[serde(alias = "Status")]
    pub status: SessionStatus,
}

/// Error codes the hub reports for a single frame.
pub mod codes {
    pub const VALIDATION: &str = "validation";
    pub const UNKNOWN_QUESTION: &str = "unknown_question";
    pub const TIME_EXPIRED: &str = "time_expired";
    pub const MALFORMED: &str = "malformed";
    pub const INTERNAL: &str = "internal";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(alias = "Code")]
    pub code: String,
    #[serde(alias = "Message")]
    pub message: String,
    #[serde(default, alias = "QuestionId", skip_serializing_if = "Option::is_none")]
    pub question_id: Option<i64>,
}
