// src/client/mod.rs

//! Student-side session runtime.

pub mod api;
pub mod clock;
pub mod integrity;
pub mod recovery;
pub mod session;
pub mod store;
pub mod submission;
pub mod sync;
pub mod transport;

pub use api::{ExamApi, HttpExamApi};
pub use recovery::{BlockReason, Handoff, ReadySession, RecoveryController, RecoveryPhase};
pub use session::{ExamSession, SessionCore, SessionOutcome, UiCommand, UiUpdate};
pub use transport::{ConnectionState, SessionTransport, TransportEvent};
