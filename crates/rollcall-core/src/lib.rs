//! rollcall-core — Attendance reconciliation engine.
//!
//! Reconciles face-recognition outcomes and manual check-ins against a
//! roster, keeping one session's checked-in and unresolved sets consistent.

pub mod ledger;
pub mod recognizer;
pub mod roster;
pub mod types;

pub use ledger::{CheckIn, Ledger, LedgerError, ManualPolicy, ManualTarget, Presenter};
pub use recognizer::{HttpRecognizer, RecognitionClient, SimulatedRecognizer};
pub use roster::{Roster, RosterError, RosterStore};
pub use types::{
    AttendanceRecord, AttendeeId, CapturedImage, CheckInSource, Person, PersonId,
    RecognitionOutcome, SessionSnapshot, SightingId, StatusKind, StatusMessage,
    UnresolvedSighting,
};
