//! Stable synthetic identifiers and per-record lifecycle history.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::message::{parse_upstream_date, title_case};
use crate::reconcile::find_by_key;
use crate::record::{StateChange, TrackedRecord};

const GUID_BYTES: usize = 16;

/// Deterministic GUID for a record: the first 16 bytes of
/// `sha256("<type_tag>:<natural_key>")`, hex encoded.
pub fn assign_guid(natural_key: &str, type_tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(type_tag.as_bytes());
    hasher.update(b":");
    hasher.update(natural_key.as_bytes());
    hex::encode(&hasher.finalize()[..GUID_BYTES])
}

fn normalize_status(status: &str) -> String {
    status.trim().to_lowercase()
}

/// Carries `stored`'s history onto `fetched` and appends an entry when the
/// normalized status differs from the last one recorded.
pub fn update_history<R: TrackedRecord>(fetched: &mut R, stored: Option<&R>, now: DateTime<Utc>) {
    if let Some(stored) = stored {
        fetched.tracking_mut().state_history = stored.tracking().state_history.clone();
    }

    let current = normalize_status(fetched.status());
    let changed = match fetched.tracking().state_history.last() {
        None => true,
        Some(last) => normalize_status(&last.status) != current,
    };
    if !changed {
        return;
    }

    let decision = fetched
        .decision()
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    fetched
        .tracking_mut()
        .state_history
        .push(StateChange::observed(current, now, decision));
}

/// Prepares a freshly fetched snapshot for diffing: GUIDs, notification
/// handles and history are carried forward from the stored snapshot, and
/// records seen for the first time get a new GUID.
pub fn annotate<R: TrackedRecord>(fetched: &mut [R], stored: &[R], now: DateTime<Utc>) {
    for record in fetched.iter_mut() {
        let counterpart = find_by_key(stored, record.key());

        let guid = match counterpart {
            Some(prev) if !prev.tracking().rss_guid.is_empty() => prev.tracking().rss_guid.clone(),
            _ => assign_guid(record.key(), R::KIND.type_tag()),
        };
        record.tracking_mut().rss_guid = guid;

        if let Some(prev) = counterpart {
            let tracking = record.tracking_mut();
            tracking.github_discussion_id = prev.tracking().github_discussion_id.clone();
            tracking.github_discussion_closed = prev.tracking().github_discussion_closed;
        }

        update_history(record, counterpart, now);
    }
}

/// Human-readable lifecycle, one numbered line per recorded status.
pub fn history_summary<R: TrackedRecord>(record: &R) -> String {
    let history = &record.tracking().state_history;
    if history.is_empty() {
        return "No state history available".to_string();
    }

    let mut summary = format!("{} {} lifecycle:\n", R::KIND.label(), record.key());
    for (i, state) in history.iter().enumerate() {
        summary.push_str(&format!("  {}. {}", i + 1, title_case(&state.status)));
        if let Some(at) = state.parsed_timestamp() {
            summary.push_str(&format!(" - {}", at.format("%b %-d, %Y %-I:%M %p")));
        }
        if let Some(decision) = state.decision.as_deref().filter(|d| !d.is_empty()) {
            summary.push_str(&format!(" (Decision: {decision})"));
        }
        summary.push('\n');
    }
    summary
}

/// Latest instant among the record's upstream dates and recorded history,
/// or `now` when none of them parse.
pub fn most_recent_timestamp<R: TrackedRecord>(record: &R, now: DateTime<Utc>) -> DateTime<Utc> {
    let upstream = record
        .dated_fields()
        .into_iter()
        .filter_map(parse_upstream_date)
        .map(|d| d.and_utc());
    let observed = record
        .tracking()
        .state_history
        .iter()
        .filter_map(StateChange::parsed_timestamp)
        .map(|d| d.with_timezone(&Utc));

    upstream.chain(observed).max().unwrap_or(now)
}
