use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Roster-issued person identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub u32);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-scoped identifier of an unresolved sighting.
///
/// Allocated from a counter that only ever grows within a session, so the
/// derived "Stranger N" label is never handed out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SightingId(pub u64);

impl SightingId {
    /// Display label shown to the operator, e.g. "Stranger 3".
    pub fn label(&self) -> String {
        format!("{STRANGER_PREFIX} {}", self.0)
    }

    /// Parse text in the label namespace ("Stranger 3", "stranger  3").
    ///
    /// Returns the id whether or not such a sighting currently exists.
    pub fn from_label(text: &str) -> Option<SightingId> {
        let text = text.trim();
        let prefix = text.get(..STRANGER_PREFIX.len())?;
        if !prefix.eq_ignore_ascii_case(STRANGER_PREFIX) {
            return None;
        }
        let rest = &text[STRANGER_PREFIX.len()..];
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        rest.trim_start().parse().ok().map(SightingId)
    }
}

const STRANGER_PREFIX: &str = "Stranger";

impl fmt::Display for SightingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A roster entry. Issued by the roster and never mutated by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    #[serde(alias = "name")]
    pub display_name: String,
    /// Class or group the person belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// Roll or record number, as printed on the register.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll_number: Option<String>,
}

/// Key of the checked-in mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AttendeeId {
    /// A person from the roster.
    Roster(PersonId),
    /// A free-form name checked in without roster membership.
    /// Never in the "Stranger N" label namespace.
    AdHoc(String),
    /// A stranger checked in under their sighting label.
    Sighting(SightingId),
}

impl fmt::Display for AttendeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendeeId::Roster(id) => write!(f, "roster:{id}"),
            AttendeeId::AdHoc(name) => write!(f, "adhoc:{name}"),
            AttendeeId::Sighting(id) => write!(f, "sighting:{id}"),
        }
    }
}

/// How an attendance record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInSource {
    Recognized,
    Manual,
}

impl CheckInSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInSource::Recognized => "recognized",
            CheckInSource::Manual => "manual",
        }
    }
}

/// Check-in outcome for one attendee within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub attendee: AttendeeId,
    pub display_name: String,
    /// Logical order within the session, shared with sightings.
    pub checked_in_at: u64,
    pub source: CheckInSource,
}

/// A recognition event that matched nobody on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedSighting {
    pub id: SightingId,
    pub label: String,
    pub first_seen_at: u64,
}

impl UnresolvedSighting {
    pub fn new(id: SightingId, first_seen_at: u64) -> Self {
        Self {
            id,
            label: id.label(),
            first_seen_at,
        }
    }
}

/// Result of a single call to a recognition client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    /// The classifier found a roster match above its confidence threshold.
    Matched {
        person_id: PersonId,
        display_name: String,
    },
    /// No confident match. Someone was there, but not anyone we know.
    Unmatched,
    /// Transport or service failure. Never treated as a stranger.
    Failed { reason: String },
}

/// Category of the latest status message, for presenters that style by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Idle,
    Recognized,
    Unresolved,
    CheckedIn,
    AlreadyCheckedIn,
    Error,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusMessage {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new(StatusKind::Idle, "")
    }

    /// Whether this message reports a failure or a rejected request.
    pub fn is_error(&self) -> bool {
        matches!(self.kind, StatusKind::Error | StatusKind::Rejected)
    }
}

/// Observable session state handed to presenters after every ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub checked_in: Vec<AttendanceRecord>,
    pub unresolved: Vec<UnresolvedSighting>,
    pub status: StatusMessage,
}

/// A still image ready to be sent to a recognition service.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`, e.g. "image/jpeg".
    pub mime: String,
}

impl CapturedImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "image/jpeg".to_string(),
        }
    }

    /// Encode as a `data:` URL, the payload format the recognition service expects.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{encoded}", self.mime)
    }
}
