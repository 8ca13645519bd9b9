// src/client/sync.rs

//! Turns answer edits into wire messages and reconciles what the server
//! confirms back into the local store.
//!
//! Reconciliation rules:
//! - a local edit always wins and is stored as `Pending`;
//! - an ack only settles an entry whose pending text matches the acked text;
//! - a snapshot never overwrites a `Pending` entry, and is authoritative for
//!   entries that are already `Synced`.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::{
    client::store::{AnswerEntry, AnswerStatus, LocalAnswerStore},
    error::ClientError,
    protocol::{AnswerAck, AnswerPayload, ClientMessage, Snapshot},
};

/// Separator between selected option texts of a multi-select answer.
pub const ANSWER_DELIMITER: &str = "|";

/// What the student did to a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSelection {
    Single(String),
    Multiple(Vec<String>),
    Text(String),
}

/// Canonical answer string used on the wire and for comparison.
///
/// Multi-select answers are order independent: duplicates are dropped and
/// the option texts sorted before joining.
pub fn normalize(selection: &RawSelection) -> String {
    match selection {
        RawSelection::Single(choice) => choice.trim().to_string(),
        RawSelection::Multiple(choices) => {
            let mut picked: Vec<&str> = choices
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect();
            picked.sort_unstable();
            picked.dedup();
            picked.join(ANSWER_DELIMITER)
        }
        RawSelection::Text(text) => text.clone(),
    }
}

pub struct AnswerSyncEngine {
    store: LocalAnswerStore,
    questions: HashSet<i64>,
    locked: bool,
}

impl AnswerSyncEngine {
    pub fn new(store: LocalAnswerStore, questions: impl IntoIterator<Item = i64>) -> Self {
        Self {
            store,
            questions: questions.into_iter().collect(),
            locked: false,
        }
    }

    /// Records an edit optimistically and returns the message to send.
    pub fn handle_user_answer(
        &mut self,
        question_id: i64,
        order: i64,
        selection: &RawSelection,
    ) -> Result<(AnswerEntry, ClientMessage), ClientError> {
        if self.locked {
            return Err(ClientError::SessionClosed);
        }
        if !self.questions.contains(&question_id) {
            return Err(ClientError::UnknownQuestion(question_id));
        }
        let answer = normalize(selection);
        let entry = AnswerEntry::pending(answer.clone(), order);
        self.store.put(question_id, entry.clone());
        let msg = ClientMessage::SubmitAnswer(AnswerPayload {
            question_id,
            order,
            answer,
        });
        Ok((entry, msg))
    }

    /// Settles the entry if the ack is for its current text.
    /// Returns the updated entry when something changed.
    pub fn on_ack(&mut self, ack: &AnswerAck) -> Option<AnswerEntry> {
        if self.locked {
            return None;
        }
        let current = self.store.get(ack.question_id)?;
        if !current.is_pending() {
            return None;
        }
        if current.answer != ack.answer {
            debug!(
                question_id = ack.question_id,
                "ack for a superseded answer; entry stays pending"
            );
            return None;
        }
        let settled = AnswerEntry {
            status: AnswerStatus::Synced,
            ..current.clone()
        };
        self.store.put(ack.question_id, settled.clone());
        Some(settled)
    }

    /// Merges the server's view. Returns the entries that changed.
    pub fn on_snapshot(&mut self, snapshot: &Snapshot) -> Vec<(i64, AnswerEntry)> {
        if self.locked {
            return Vec::new();
        }
        let mut changed = Vec::new();
        for entry in &snapshot.entries {
            if !self.questions.contains(&entry.question_id) {
                warn!(question_id = entry.question_id, "snapshot names an unknown question");
                continue;
            }
            let incoming = AnswerEntry::synced(entry.answer.clone(), entry.order);
            match self.store.get(entry.question_id) {
                Some(local) if local.is_pending() => continue,
                Some(local) if *local == incoming => continue,
                _ => {}
            }
            self.store.put(entry.question_id, incoming.clone());
            changed.push((entry.question_id, incoming));
        }
        changed
    }

    /// Every edit the server has not confirmed yet, ready to resend.
    pub fn pending_messages(&self) -> Vec<ClientMessage> {
        self.store
            .answers()
            .iter()
            .filter(|(_, entry)| entry.is_pending())
            .map(|(question_id, entry)| {
                ClientMessage::SubmitAnswer(AnswerPayload {
                    question_id: *question_id,
                    order: entry.order,
                    answer: entry.answer.clone(),
                })
            })
            .collect()
    }

    pub fn entry(&self, question_id: i64) -> Option<&AnswerEntry> {
        self.store.get(question_id)
    }

    pub fn store(&self) -> &LocalAnswerStore {
        &self.store
    }

    /// Stops accepting edits, acks and snapshots.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Answer strings handed to grading.
    pub fn final_answers(&self) -> BTreeMap<i64, String> {
        self.store
            .answers()
            .iter()
            .map(|(id, entry)| (*id, entry.answer.clone()))
            .collect()
    }

    pub fn discard_persisted(&mut self) {
        self.store.clear();
    }
}
