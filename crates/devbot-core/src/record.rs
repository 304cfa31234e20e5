//! Shared record shape: kinds, bookkeeping fields and the `TrackedRecord` trait.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::message::FeedEntry;

/// The two upstream datasets devbot follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    DevelopmentPermit,
    RezoningApplication,
}

const PERMIT_CLOSING_STATUSES: &[&str] = &["Released", "Cancelled", "Cancelled - Pending Refund"];
const REZONING_CLOSING_STATUSES: &[&str] = &["Approved", "Cancelled", "Refused"];

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::DevelopmentPermit, RecordKind::RezoningApplication];

    /// Tag mixed into the GUID hash so equal keys of different kinds never collide.
    pub const fn type_tag(self) -> &'static str {
        match self {
            RecordKind::DevelopmentPermit => "development-permit",
            RecordKind::RezoningApplication => "rezoning-application",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            RecordKind::DevelopmentPermit => "Development Permit",
            RecordKind::RezoningApplication => "Rezoning Application",
        }
    }

    /// Short noun used in lifecycle summaries.
    pub const fn label(self) -> &'static str {
        match self {
            RecordKind::DevelopmentPermit => "Permit",
            RecordKind::RezoningApplication => "Application",
        }
    }

    pub const fn snapshot_file(self) -> &'static str {
        match self {
            RecordKind::DevelopmentPermit => "development-permits.json",
            RecordKind::RezoningApplication => "rezoning-applications.json",
        }
    }

    /// Statuses that mark a record as terminal for notification purposes.
    pub const fn closing_statuses(self) -> &'static [&'static str] {
        match self {
            RecordKind::DevelopmentPermit => PERMIT_CLOSING_STATUSES,
            RecordKind::RezoningApplication => REZONING_CLOSING_STATUSES,
        }
    }

    /// Exact, case-sensitive membership test.
    pub fn is_closing_status(self, status: &str) -> bool {
        self.closing_statuses().contains(&status)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRecordKind(pub String);

impl fmt::Display for UnknownRecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown record kind '{}' (expected development-permit or rezoning-application)",
            self.0
        )
    }
}

impl std::error::Error for UnknownRecordKind {}

impl FromStr for RecordKind {
    type Err = UnknownRecordKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development-permit" | "permit" | "dp" => Ok(RecordKind::DevelopmentPermit),
            "rezoning-application" | "rezoning" | "ra" => Ok(RecordKind::RezoningApplication),
            other => Err(UnknownRecordKind(other.to_string())),
        }
    }
}

/// One observed status in a record's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Trimmed, lower-cased status.
    pub status: String,
    /// RFC 3339 instant of observation. Kept as text so a damaged entry never
    /// blocks loading the snapshot.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

impl StateChange {
    pub fn observed(status: String, at: DateTime<Utc>, decision: Option<String>) -> Self {
        Self {
            status,
            timestamp: at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            decision,
        }
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<chrono::FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp).ok()
    }
}

/// Bookkeeping devbot adds on top of the upstream schema.
///
/// Upstream JSON never carries these fields, so every one of them falls back
/// to its default (explicit `null` included).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tracking {
    #[serde(default, deserialize_with = "null_as_default")]
    pub rss_guid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state_history: Vec<StateChange>,
    #[serde(default)]
    pub github_discussion_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub github_discussion_closed: bool,
}

impl Tracking {
    pub fn has_handle(&self) -> bool {
        self.github_discussion_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

/// Behaviour shared by every record variant.
///
/// The reconciliation algorithm is written once against this trait; each
/// variant supplies its own closing statuses (through [`RecordKind`]) and its
/// own field-change predicate.
pub trait TrackedRecord: Clone {
    const KIND: RecordKind;

    fn key(&self) -> &str;
    fn status(&self) -> &str;

    fn decision(&self) -> Option<&str> {
        None
    }

    fn tracking(&self) -> &Tracking;
    fn tracking_mut(&mut self) -> &mut Tracking;

    /// One human-readable line per field that changed since `stored`.
    /// Status, decision and dates compare as exact text.
    fn field_changes(&self, stored: &Self) -> Vec<String>;

    /// Upstream date fields (`YYYY-MM-DDTHH:MM:SS.fff`) considered when
    /// picking a publication date.
    fn dated_fields(&self) -> Vec<&str>;

    /// Markdown body used for the first notification about a record.
    fn information_message(&self) -> String;

    /// Feed representation of the record's current state.
    fn feed_entry(&self, now: DateTime<Utc>) -> FeedEntry;
}
