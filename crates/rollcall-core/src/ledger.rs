//! Attendance ledger — reconciles recognition outcomes and manual check-ins
//! into one session's checked-in and unresolved collections.
//!
//! The ledger is single-owner state: every mutation goes through
//! [`Ledger::reconcile_recognition`], [`Ledger::manual_check_in`] or
//! [`Ledger::reset`], and each one runs to completion before the next.
//! Attached [`Presenter`]s see the new snapshot before the call returns.

use crate::roster::RosterStore;
use crate::types::{
    AttendanceRecord, AttendeeId, CheckInSource, PersonId, RecognitionOutcome, SessionSnapshot,
    SightingId, StatusKind, StatusMessage, UnresolvedSighting,
};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("please enter a name to check in")]
    EmptyInput,
    #[error("'{0}' is neither an unresolved sighting nor on the roster")]
    UnknownManualTarget(String),
    #[error("no person with id {0} on the roster")]
    UnknownPerson(PersonId),
    #[error("no unresolved sighting '{}'", .0.label())]
    UnknownSighting(SightingId),
    #[error("'{0}' is reserved for stranger labels")]
    ReservedName(String),
}

#[derive(Error, Debug)]
#[error("unknown manual check-in policy '{0}' (expected 'open' or 'roster')")]
pub struct PolicyParseError(String);

/// What a manual check-in may name when it matches neither a sighting nor the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManualPolicy {
    /// Accept any non-empty name as an ad-hoc attendee.
    #[default]
    OpenWorld,
    /// Only roster members (or existing sightings) can be checked in.
    RosterOnly,
}

impl ManualPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualPolicy::OpenWorld => "open",
            ManualPolicy::RosterOnly => "roster",
        }
    }
}

impl fmt::Display for ManualPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManualPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "open-world" => Ok(ManualPolicy::OpenWorld),
            "roster" | "roster-only" => Ok(ManualPolicy::RosterOnly),
            other => Err(PolicyParseError(other.to_string())),
        }
    }
}

/// Who a manual check-in refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualTarget {
    /// Free text typed by the operator: a sighting label, a roster id or name,
    /// or (open world only) any other name.
    Text(String),
    /// A specific roster member.
    Person(PersonId),
    /// An unresolved sighting, optionally naming who it turned out to be.
    /// Without a name the sighting's label becomes the attendee name.
    Sighting {
        id: SightingId,
        name: Option<String>,
    },
}

/// Result of a successful manual check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    pub record: AttendanceRecord,
    /// False when the attendee was already checked in.
    pub created: bool,
    /// Sighting removed from the unresolved collection, if any.
    pub resolved: Option<SightingId>,
}

/// Receives the session state after every ledger operation.
pub trait Presenter: Send {
    fn render(&mut self, snapshot: &SessionSnapshot);
}

/// The reconciliation engine for one attendance session.
pub struct Ledger {
    roster: Arc<dyn RosterStore>,
    policy: ManualPolicy,
    records: Vec<AttendanceRecord>,
    index: HashMap<AttendeeId, usize>,
    unresolved: Vec<UnresolvedSighting>,
    /// Logical clock shared by records and sightings.
    next_order: u64,
    /// Sightings created so far this session, resolved ones included.
    strangers_seen: u64,
    status: StatusMessage,
    presenters: Vec<Box<dyn Presenter>>,
}

impl Ledger {
    pub fn new(roster: Arc<dyn RosterStore>, policy: ManualPolicy) -> Self {
        Self {
            roster,
            policy,
            records: Vec::new(),
            index: HashMap::new(),
            unresolved: Vec::new(),
            next_order: 0,
            strangers_seen: 0,
            status: StatusMessage::idle(),
            presenters: Vec::new(),
        }
    }

    /// Attach a presenter. It is rendered once immediately with the current state.
    pub fn attach(&mut self, mut presenter: Box<dyn Presenter>) {
        presenter.render(&self.snapshot());
        self.presenters.push(presenter);
    }

    pub fn roster(&self) -> &Arc<dyn RosterStore> {
        &self.roster
    }

    pub fn policy(&self) -> ManualPolicy {
        self.policy
    }

    pub fn checked_in(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn unresolved(&self) -> &[UnresolvedSighting] {
        &self.unresolved
    }

    pub fn status(&self) -> &StatusMessage {
        &self.status
    }

    pub fn record_for(&self, attendee: &AttendeeId) -> Option<&AttendanceRecord> {
        self.index.get(attendee).map(|&i| &self.records[i])
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            checked_in: self.records.clone(),
            unresolved: self.unresolved.clone(),
            status: self.status.clone(),
        }
    }

    /// Apply one recognition outcome.
    ///
    /// A match checks the person in unless they already are (first write wins,
    /// the existing record keeps its order and source). An unmatched outcome
    /// records a new stranger, and so does a match against an id the roster
    /// does not know. A failure only changes the status.
    pub fn reconcile_recognition(&mut self, outcome: RecognitionOutcome) -> &StatusMessage {
        self.status = match outcome {
            RecognitionOutcome::Matched {
                person_id,
                display_name,
            } => match self.roster.get(person_id) {
                None => {
                    tracing::warn!(
                        person = %person_id,
                        name = %display_name,
                        "recognized person is not on the roster; treating as unmatched"
                    );
                    self.record_stranger()
                }
                Some(person) => {
                    let attendee = AttendeeId::Roster(person_id);
                    if let Some(existing) = self.record_for(&attendee) {
                        tracing::debug!(person = %person_id, "recognized again; already checked in");
                        StatusMessage::new(
                            StatusKind::AlreadyCheckedIn,
                            format!("Already checked in: {}", existing.display_name),
                        )
                    } else {
                        let name = person.display_name;
                        let record = self.insert(attendee, name.clone(), CheckInSource::Recognized);
                        tracing::info!(person = %person_id, name = %name, order = record.checked_in_at, "checked in by recognition");
                        StatusMessage::new(StatusKind::Recognized, format!("Recognized: {name}"))
                    }
                }
            },
            RecognitionOutcome::Unmatched => self.record_stranger(),
            RecognitionOutcome::Failed { reason } => {
                tracing::warn!(reason = %reason, "recognition failed");
                StatusMessage::new(StatusKind::Error, format!("Recognition failed: {reason}"))
            }
        };
        self.publish();
        &self.status
    }

    /// Check someone in by hand.
    ///
    /// Rejected requests leave both collections untouched and put the reason
    /// in the status message.
    pub fn manual_check_in(&mut self, target: ManualTarget) -> Result<CheckIn, LedgerError> {
        let result = self.apply_manual(target);
        self.status = match &result {
            Ok(check_in) if check_in.created => StatusMessage::new(
                StatusKind::CheckedIn,
                format!("Manually checked in: {}", check_in.record.display_name),
            ),
            Ok(check_in) => StatusMessage::new(
                StatusKind::AlreadyCheckedIn,
                format!("Already checked in: {}", check_in.record.display_name),
            ),
            Err(err) => {
                tracing::info!(error = %err, "manual check-in rejected");
                StatusMessage::new(StatusKind::Rejected, err.to_string())
            }
        };
        self.publish();
        result
    }

    /// Report that no image could be captured. Status only; nothing else changes.
    pub fn report_capture_unavailable(&mut self, reason: &str) -> &StatusMessage {
        tracing::warn!(reason, "capture unavailable");
        self.status = StatusMessage::new(
            StatusKind::Error,
            format!("Could not capture image: {reason}"),
        );
        self.publish();
        &self.status
    }

    /// End the session and start a fresh one. Stranger numbering restarts at 1.
    pub fn reset(&mut self) {
        tracing::info!(
            checked_in = self.records.len(),
            unresolved = self.unresolved.len(),
            "session reset"
        );
        self.records.clear();
        self.index.clear();
        self.unresolved.clear();
        self.next_order = 0;
        self.strangers_seen = 0;
        self.status = StatusMessage::new(StatusKind::Idle, "Session reset");
        self.publish();
    }

    fn record_stranger(&mut self) -> StatusMessage {
        self.strangers_seen += 1;
        let sighting = UnresolvedSighting::new(SightingId(self.strangers_seen), self.tick());
        tracing::info!(label = %sighting.label, "unresolved sighting recorded");
        let text = format!("Unrecognized person detected ({})", sighting.label);
        self.unresolved.push(sighting);
        StatusMessage::new(StatusKind::Unresolved, text)
    }

    fn apply_manual(&mut self, target: ManualTarget) -> Result<CheckIn, LedgerError> {
        match target {
            ManualTarget::Text(raw) => {
                let text = raw.trim();
                if text.is_empty() {
                    return Err(LedgerError::EmptyInput);
                }
                // Label-shaped text only ever refers to a live sighting.
                if let Some(id) = SightingId::from_label(text) {
                    return self.resolve_sighting(id, None);
                }
                let (attendee, name) = self.resolve_name(text)?;
                Ok(self.check_in(attendee, name, None))
            }
            ManualTarget::Person(id) => {
                let person = self.roster.get(id).ok_or(LedgerError::UnknownPerson(id))?;
                Ok(self.check_in(AttendeeId::Roster(id), person.display_name, None))
            }
            ManualTarget::Sighting { id, name } => {
                let name = match name {
                    Some(n) if n.trim().is_empty() => return Err(LedgerError::EmptyInput),
                    Some(n) => Some(n.trim().to_string()),
                    None => None,
                };
                self.resolve_sighting(id, name.as_deref())
            }
        }
    }

    /// Remove a sighting and check in whoever it was, in one step.
    fn resolve_sighting(
        &mut self,
        id: SightingId,
        name: Option<&str>,
    ) -> Result<CheckIn, LedgerError> {
        let pos = self
            .unresolved
            .iter()
            .position(|s| s.id == id)
            .ok_or(LedgerError::UnknownSighting(id))?;

        // Resolve the name before touching the collections so a rejection mutates nothing.
        let (attendee, display_name) = match name {
            Some(n) => self.resolve_name(n)?,
            None => (AttendeeId::Sighting(id), self.unresolved[pos].label.clone()),
        };

        let sighting = self.unresolved.remove(pos);
        tracing::info!(label = %sighting.label, attendee = %attendee, "sighting resolved");
        Ok(self.check_in(attendee, display_name, Some(sighting.id)))
    }

    /// Map operator text to an attendee: roster id, then roster name, then ad hoc.
    /// Ad hoc names may not take the shape of a stranger label.
    fn resolve_name(&self, text: &str) -> Result<(AttendeeId, String), LedgerError> {
        if let Ok(n) = text.parse::<u32>() {
            if let Some(person) = self.roster.get(PersonId(n)) {
                return Ok((AttendeeId::Roster(person.id), person.display_name));
            }
        }
        if let Some(person) = self.roster.find_by_name(text) {
            return Ok((AttendeeId::Roster(person.id), person.display_name));
        }
        if SightingId::from_label(text).is_some() {
            return Err(LedgerError::ReservedName(text.to_string()));
        }
        match self.policy {
            ManualPolicy::OpenWorld => Ok((AttendeeId::AdHoc(text.to_string()), text.to_string())),
            ManualPolicy::RosterOnly => Err(LedgerError::UnknownManualTarget(text.to_string())),
        }
    }

    fn check_in(
        &mut self,
        attendee: AttendeeId,
        display_name: String,
        resolved: Option<SightingId>,
    ) -> CheckIn {
        if let Some(existing) = self.record_for(&attendee) {
            return CheckIn {
                record: existing.clone(),
                created: false,
                resolved,
            };
        }
        let record = self.insert(attendee, display_name, CheckInSource::Manual);
        tracing::info!(attendee = %record.attendee, order = record.checked_in_at, "checked in manually");
        CheckIn {
            record,
            created: true,
            resolved,
        }
    }

    fn insert(
        &mut self,
        attendee: AttendeeId,
        display_name: String,
        source: CheckInSource,
    ) -> AttendanceRecord {
        let record = AttendanceRecord {
            attendee: attendee.clone(),
            display_name,
            checked_in_at: self.tick(),
            source,
        };
        self.index.insert(attendee, self.records.len());
        self.records.push(record.clone());
        record
    }

    fn tick(&mut self) -> u64 {
        self.next_order += 1;
        self.next_order
    }

    fn publish(&mut self) {
        if self.presenters.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for presenter in &mut self.presenters {
            presenter.render(&snapshot);
        }
    }
}
